//! 凭据来源与凭据链在真实磁盘材料上的行为。

mod common;

use std::sync::Arc;
use std::time::SystemTime;

use common::TestPki;
use warden_core::error::WardenError;
use warden_transport_tls::{CredentialChain, CredentialSource, PathSource, ProfileSource};

#[test]
fn path_source_detects_rotated_material() -> anyhow::Result<()> {
    let pki = TestPki::new("warden test ca")?;
    let dir = tempfile::tempdir()?;
    let first = pki.write_client_dir(dir.path(), &pki)?;

    let source = PathSource::new(dir.path());
    assert!(source.changed(), "尚未产出时可读材料视为变化");
    let credential = source.produce()?;
    assert!(!source.changed(), "产出后指纹已缓存");
    assert_eq!(credential.chain()[0], first.cert_der);
    assert_eq!(credential.trust_anchor_count(), 1);

    // 仅重写相同内容不算变化。
    std::fs::write(dir.path().join("cert.pem"), &first.cert_pem)?;
    assert!(!source.changed());

    let second = pki.write_client_dir(dir.path(), &pki)?;
    assert!(source.changed(), "证书轮换必须被探测到");
    assert!(source.changed(), "探测本身不修改缓存");
    let rotated = source.produce()?;
    assert_eq!(rotated.chain()[0], second.cert_der);
    assert!(!source.changed());
    Ok(())
}

#[test]
fn path_source_reports_malformed_key() -> anyhow::Result<()> {
    let pki = TestPki::new("warden test ca")?;
    let dir = tempfile::tempdir()?;
    pki.write_client_dir(dir.path(), &pki)?;
    std::fs::write(dir.path().join("key.pem"), "garbage")?;

    let err = PathSource::new(dir.path())
        .produce()
        .expect_err("非法私钥必须报错");
    let WardenError::CredentialUnavailable { source_name, reason } = err else {
        panic!("期望 CredentialUnavailable");
    };
    assert!(source_name.starts_with("path:"));
    assert!(reason.contains("private key"), "原因应指出私钥：{reason}");
    Ok(())
}

#[test]
fn path_source_rejects_certificate_past_not_after() -> anyhow::Result<()> {
    let pki = TestPki::new("warden test ca")?;
    let dir = tempfile::tempdir()?;
    let lapsed = pki.issue_lapsed("warden-client")?;
    common::write_material(dir.path(), &lapsed, &pki)?;

    let err = PathSource::new(dir.path())
        .produce()
        .expect_err("证书有效期已过必须报错");
    let WardenError::CredentialUnavailable { reason, .. } = err else {
        panic!("期望 CredentialUnavailable");
    };
    assert!(reason.contains("expired"), "原因应指出过期：{reason}");

    // 换上有效证书后同一来源恢复产出。
    let fresh = pki.write_client_dir(dir.path(), &pki)?;
    let credential = PathSource::new(dir.path()).produce()?;
    assert_eq!(credential.chain()[0], fresh.cert_der);
    Ok(())
}

#[test]
fn profile_source_reads_key_dir_relative_to_profile() -> anyhow::Result<()> {
    let pki = TestPki::new("warden test ca")?;
    let home = tempfile::tempdir()?;
    let issued = pki.write_client_dir(&home.path().join("keys/alice"), &pki)?;
    let profile_path = home.path().join("profile.toml");
    std::fs::write(
        &profile_path,
        r#"
            addresses = ["auth.example.com:3025", "auth-2.example.com:3025"]
            proxy_address = "proxy.example.com:3080"
            key_dir = "keys/alice"
            username = "alice"
        "#,
    )?;

    let source = ProfileSource::new(&profile_path);
    let credential = source.produce()?;
    assert_eq!(credential.chain()[0], issued.cert_der);
    assert!(
        credential
            .expires_at()
            .is_some_and(|deadline| deadline > SystemTime::now()),
        "未声明会话过期时以叶证书 notAfter 为准"
    );

    let spec = source.dial_hint()?;
    assert_eq!(spec.addresses().len(), 2);
    assert_eq!(spec.proxy(), Some("proxy.example.com:3080"));

    assert!(!source.changed());
    let handle = source.refresh_handle();
    handle.mark_refreshed();
    assert!(source.changed());
    source.produce()?;
    assert!(!source.changed(), "成功产出即确认刷新");
    Ok(())
}

#[test]
fn expired_profile_is_unavailable() -> anyhow::Result<()> {
    let pki = TestPki::new("warden test ca")?;
    let home = tempfile::tempdir()?;
    pki.write_client_dir(&home.path().join("keys"), &pki)?;
    let profile_path = home.path().join("profile.toml");
    std::fs::write(
        &profile_path,
        "addresses = [\"a:1\"]\nkey_dir = \"keys\"\nexpires_at_unix = 1\n",
    )?;

    let err = ProfileSource::new(&profile_path)
        .produce()
        .expect_err("过期会话必须报错");
    assert!(err.to_string().contains("expired"));
    Ok(())
}

#[test]
fn chain_falls_back_from_profile_to_directory() -> anyhow::Result<()> {
    let pki = TestPki::new("warden test ca")?;
    let dir = tempfile::tempdir()?;
    let issued = pki.write_client_dir(&dir.path().join("ops"), &pki)?;

    let chain = CredentialChain::new(vec![
        Arc::new(ProfileSource::new(dir.path().join("missing-profile.toml"))),
        Arc::new(PathSource::new(dir.path().join("ops"))),
    ])?;
    let credential = chain.produce()?;
    assert_eq!(credential.chain()[0], issued.cert_der);
    assert!(
        chain
            .active_source()
            .is_some_and(|name| name.starts_with("path:"))
    );

    assert!(!chain.changed());
    pki.write_client_dir(&dir.path().join("ops"), &pki)?;
    assert!(chain.changed(), "链应转述当前来源的变化");
    Ok(())
}

#[test]
fn chain_aggregates_every_source_failure() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let chain = CredentialChain::new(vec![
        Arc::new(ProfileSource::new(dir.path().join("profile.toml"))),
        Arc::new(PathSource::new(dir.path().join("a"))),
        Arc::new(PathSource::new(dir.path().join("b"))),
    ])?;
    let err = chain.produce().expect_err("全部来源缺失");
    let WardenError::NoCredentialsAvailable { failures } = &err else {
        panic!("期望 NoCredentialsAvailable，实际为 {err:?}");
    };
    assert_eq!(failures.len(), 3);
    assert!(failures[0].source.starts_with("profile:"));
    assert!(failures[2].source.ends_with('b'));
    Ok(())
}
