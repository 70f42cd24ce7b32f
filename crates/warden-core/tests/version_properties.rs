//! 版本兼容策略的性质测试。
//!
//! # 教案式说明
//! - **Why**：兼容规则由“主版本相同 + 不低于最低版本 + 放行列表”三条组合而成，
//!   手写用例容易漏掉边界，借助 `proptest` 在整个版本空间上回归。
//! - **What**：每条性质独立断言，失败时 `proptest` 会收缩出最小反例。

use proptest::prelude::*;
use semver::{Version, VersionReq};
use warden_core::WardenError;
use warden_core::version::CompatibilityPolicy;

proptest! {
    /// 主版本不同的服务端一律拒绝（未命中放行列表时）。
    #[test]
    fn different_major_is_always_rejected(
        client_major in 0u64..50,
        client_minor in 0u64..50,
        remote_major in 0u64..50,
        remote_minor in 0u64..50,
        remote_patch in 0u64..50,
    ) {
        prop_assume!(client_major != remote_major);
        let policy = CompatibilityPolicy::new(Version::new(client_major, client_minor, 0));
        let remote = format!("{remote_major}.{remote_minor}.{remote_patch}");
        let rejected = matches!(
            policy.check(&remote),
            Err(WardenError::IncompatibleVersion { .. })
        );
        prop_assert!(rejected);
    }

    /// 同主版本下，是否兼容只取决于服务端次版本是否不低于客户端次版本。
    #[test]
    fn same_major_compares_minor(
        major in 0u64..50,
        client_minor in 0u64..50,
        remote_minor in 0u64..50,
        remote_patch in 0u64..50,
    ) {
        let policy = CompatibilityPolicy::new(Version::new(major, client_minor, 3));
        let remote = format!("{major}.{remote_minor}.{remote_patch}");
        prop_assert_eq!(policy.check(&remote).is_ok(), remote_minor >= client_minor);
    }

    /// 放行列表中的精确版本总是被接受。
    #[test]
    fn allow_list_overrides(
        client_major in 1u64..50,
        remote_major in 0u64..50,
        remote_minor in 0u64..50,
    ) {
        let requirement = VersionReq::parse(&format!("={remote_major}.{remote_minor}"))
            .expect("合法的精确需求");
        let policy = CompatibilityPolicy::new(Version::new(client_major, 99, 0)).allow(requirement);
        let remote = format!("{remote_major}.{remote_minor}.7");
        prop_assert!(policy.check(&remote).is_ok());
    }
}
