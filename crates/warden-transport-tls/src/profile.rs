//! 外部登录流程写出的 profile 记录，以及由其派生凭据与拨号提示的来源。
//!
//! profile 为 TOML 文件，示例：
//!
//! ```toml
//! addresses = ["auth.example.com:3025"]
//! proxy_address = "proxy.example.com:3080"
//! server_name = "auth.example.com"
//! key_dir = "keys/alice"
//! expires_at_unix = 1790000000
//! ```
//!
//! `key_dir` 为相对路径时相对于 profile 文件所在目录解析。

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use warden_core::error::WardenError;
use warden_transport_tcp::DialSpec;

use crate::credential::{Credential, CredentialFiles};
use crate::source::{CredentialSource, reject_expired, unavailable};

/// 解析后的 profile 记录。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    /// 候选拨号地址。
    pub addresses: Vec<String>,
    /// 隧道/代理转接提示。
    #[serde(default)]
    pub proxy_address: Option<String>,
    /// SNI 覆盖值。
    #[serde(default)]
    pub server_name: Option<String>,
    /// 本地密钥材料目录。
    pub key_dir: PathBuf,
    /// 登录会话的过期时间（Unix 秒）。
    #[serde(default)]
    pub expires_at_unix: Option<u64>,
    /// 登录用户，仅用于日志。
    #[serde(default)]
    pub username: Option<String>,
}

impl Profile {
    /// 从 TOML 文本解析；`base_dir` 用于解析相对的 `key_dir`。
    pub fn from_toml_str(raw: &str, base_dir: &Path) -> Result<Self, String> {
        let mut profile: Self =
            toml::from_str(raw).map_err(|err| format!("malformed profile: {err}"))?;
        if profile.addresses.is_empty() {
            return Err("profile lists no addresses".to_owned());
        }
        if profile.key_dir.is_relative() {
            profile.key_dir = base_dir.join(&profile.key_dir);
        }
        Ok(profile)
    }

    /// 从文件读取。
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| format!("cannot read profile {}: {err}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_toml_str(&raw, base_dir)
    }

    /// 会话过期时间。
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at_unix
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }

    /// 由 profile 派生拨号规格。
    pub fn dial_spec(&self) -> Result<DialSpec, WardenError> {
        let spec = DialSpec::new(self.addresses.iter().cloned())?;
        Ok(match &self.proxy_address {
            Some(proxy) => spec.with_proxy(proxy.clone()),
            None => spec,
        })
    }

    fn credential(&self) -> Result<Credential, String> {
        let (credential, _) = CredentialFiles::in_dir(&self.key_dir).load()?;
        Ok(match self.expires_at() {
            Some(expires_at) => credential.with_expiry(expires_at),
            None => credential,
        })
    }
}

/// 外部登录流程宣告“profile 已刷新”的句柄。
#[derive(Clone, Debug)]
pub struct ProfileRefreshHandle {
    refreshed: Arc<AtomicBool>,
}

impl ProfileRefreshHandle {
    /// 标记 profile 已被重新写出。
    pub fn mark_refreshed(&self) {
        self.refreshed.store(true, Ordering::Release);
    }

    /// 是否存在尚未被确认的刷新。
    pub fn is_pending(&self) -> bool {
        self.refreshed.load(Ordering::Acquire)
    }
}

/// 由 profile 记录派生凭据与拨号提示的来源。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - profile 由外部登录流程维护，本来源只读取其输出，不参与登录本身；
/// - profile 的重写时机只有登录流程知道，因此变化探测依赖显式的刷新宣告，而非文件轮询。
///
/// ## 契约（What）
/// - `changed`：仅当 [`ProfileRefreshHandle::mark_refreshed`] 之后尚未成功 `produce` 时为 `true`；
/// - `produce`：每次重新读取 profile 与密钥材料；成功即确认刷新，失败则保留刷新标记；
/// - 会话过期时返回 `CredentialUnavailable`。
pub struct ProfileSource {
    name: String,
    path: PathBuf,
    refreshed: Arc<AtomicBool>,
}

impl ProfileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("profile:{}", path.display()),
            path,
            refreshed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// profile 文件路径。
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 供外部登录流程使用的刷新句柄。
    pub fn refresh_handle(&self) -> ProfileRefreshHandle {
        ProfileRefreshHandle {
            refreshed: Arc::clone(&self.refreshed),
        }
    }

    /// 读取 profile 并派生拨号规格。
    pub fn dial_hint(&self) -> Result<DialSpec, WardenError> {
        self.profile()?.dial_spec()
    }

    /// 读取当前 profile。
    pub fn profile(&self) -> Result<Profile, WardenError> {
        Profile::load(&self.path).map_err(|reason| unavailable(&self.name, reason))
    }
}

impl CredentialSource for ProfileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> Result<Credential, WardenError> {
        let acknowledged = self.refreshed.swap(false, Ordering::AcqRel);
        let outcome = self.profile().and_then(|profile| {
            let credential = profile
                .credential()
                .map_err(|reason| unavailable(&self.name, reason))?;
            tracing::debug!(
                source = %self.name,
                user = profile.username.as_deref().unwrap_or("-"),
                "loaded credential from profile"
            );
            reject_expired(&self.name, credential)
        });
        if outcome.is_err() && acknowledged {
            self.refreshed.store(true, Ordering::Release);
        }
        outcome
    }

    fn changed(&self) -> bool {
        self.refreshed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ProfileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileSource")
            .field("path", &self.path)
            .field("refresh_pending", &self.changed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_key_dir_is_resolved_against_profile_dir() {
        let raw = r#"
            addresses = ["auth.example.com:3025"]
            key_dir = "keys/alice"
        "#;
        let profile =
            Profile::from_toml_str(raw, Path::new("/home/alice/.warden")).expect("合法 profile");
        assert_eq!(profile.key_dir, PathBuf::from("/home/alice/.warden/keys/alice"));
        assert!(profile.expires_at().is_none());
    }

    #[test]
    fn absolute_key_dir_is_kept() {
        let raw = r#"
            addresses = ["a:1"]
            key_dir = "/etc/warden/keys"
            expires_at_unix = 10
        "#;
        let profile = Profile::from_toml_str(raw, Path::new("/ignored")).expect("合法 profile");
        assert_eq!(profile.key_dir, PathBuf::from("/etc/warden/keys"));
        assert_eq!(profile.expires_at(), Some(UNIX_EPOCH + Duration::from_secs(10)));
    }

    #[test]
    fn profile_without_addresses_is_rejected() {
        let err = Profile::from_toml_str("addresses = []\nkey_dir = \"k\"", Path::new("."))
            .expect_err("空地址必须报错");
        assert!(err.contains("no addresses"));
    }

    #[test]
    fn dial_spec_carries_proxy_hint() {
        let raw = r#"
            addresses = ["auth.example.com:3025"]
            proxy_address = "proxy.example.com:3080"
            key_dir = "k"
        "#;
        let profile = Profile::from_toml_str(raw, Path::new(".")).expect("合法 profile");
        let spec = profile.dial_spec().expect("合法拨号规格");
        assert_eq!(spec.addresses(), ["auth.example.com:3025".to_owned()]);
        assert_eq!(spec.proxy(), Some("proxy.example.com:3080"));
    }

    #[test]
    fn refresh_flag_survives_failed_produce() {
        let source = ProfileSource::new("/nonexistent/profile.toml");
        let handle = source.refresh_handle();
        assert!(!source.changed());
        handle.mark_refreshed();
        assert!(source.changed());
        assert!(source.produce().is_err());
        assert!(source.changed(), "失败的产出不应确认刷新");
        assert!(handle.is_pending());
    }
}
