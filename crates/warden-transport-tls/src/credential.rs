use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustls::crypto::aws_lc_rs;
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use sha2::{Digest, Sha256};
use warden_core::error::CoreError;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::map_config_error;

/// 一组 TLS 客户端身份材料：证书链、私钥与信任根。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 凭据一旦产出即不可变；热更新通过产出新的 `Credential` 替换旧值完成，而不是修改旧值；
/// - 内部以 `Arc` 共享，克隆只增加引用计数，便于在重载任务与握手之间传递。
///
/// ## 契约（What）
/// - 证书链与信任根均非空，私钥可被 `aws-lc-rs` 识别；
/// - `expires_at` 取叶证书 notAfter，与 [`Credential::with_expiry`] 附加的时间取较早者；
/// - [`Credential::client_config`] 每次构建新的 `ClientConfig`，互不共享会话状态。
#[derive(Clone)]
pub struct Credential {
    inner: Arc<Material>,
}

struct Material {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    roots: RootCertStore,
    expires_at: Option<SystemTime>,
    fingerprint: String,
}

impl Credential {
    /// 由 PEM 文本构造：`cert_pem` 为证书链（叶证书在前），`key_pem` 为私钥，`ca_pem` 为信任根。
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], ca_pem: &[u8]) -> Result<Self, String> {
        let chain = parse_certificates(cert_pem, "certificate")?;
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|err| format!("failed to parse private key: {err}"))?;
        let anchors = parse_certificates(ca_pem, "trust anchor")?;
        let mut roots = RootCertStore::empty();
        for anchor in anchors {
            roots
                .add(anchor)
                .map_err(|err| format!("failed to add trust anchor: {err}"))?;
        }
        Self::from_der(chain, key, roots)
    }

    /// 由已解析的 DER 材料构造。
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        roots: RootCertStore,
    ) -> Result<Self, String> {
        let Some(leaf) = chain.first() else {
            return Err("certificate chain is empty".to_owned());
        };
        if roots.is_empty() {
            return Err("trust anchor bundle is empty".to_owned());
        }
        let expires_at = leaf_not_after(leaf)?;
        let fingerprint = hex::encode(Sha256::digest(leaf.as_ref()));
        Ok(Self {
            inner: Arc::new(Material {
                chain,
                key,
                roots,
                expires_at: Some(expires_at),
                fingerprint,
            }),
        })
    }

    /// 附加过期时间，返回新的凭据值；已有过期时间更早时保留原值。
    pub fn with_expiry(self, expires_at: SystemTime) -> Self {
        let material = &self.inner;
        let expires_at = material
            .expires_at
            .map_or(expires_at, |current| current.min(expires_at));
        Self {
            inner: Arc::new(Material {
                chain: material.chain.clone(),
                key: material.key.clone_key(),
                roots: material.roots.clone(),
                expires_at: Some(expires_at),
                fingerprint: material.fingerprint.clone(),
            }),
        }
    }

    /// 材料声明的过期时间。
    pub fn expires_at(&self) -> Option<SystemTime> {
        self.inner.expires_at
    }

    /// 在 `now` 时刻是否已过期。
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.inner.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// 当前是否已过期。
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(SystemTime::now())
    }

    /// 叶证书 DER 的 SHA-256 指纹（十六进制小写）。
    pub fn fingerprint(&self) -> &str {
        &self.inner.fingerprint
    }

    /// 证书链。
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.inner.chain
    }

    /// 信任根数量。
    pub fn trust_anchor_count(&self) -> usize {
        self.inner.roots.len()
    }

    /// 构建携带客户端证书的 `ClientConfig`。
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, CoreError> {
        let material = &self.inner;
        let config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(map_config_error)?
            .with_root_certificates(material.roots.clone())
            .with_client_auth_cert(material.chain.clone(), material.key.clone_key())
            .map_err(map_config_error)?;
        Ok(Arc::new(config))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.inner.fingerprint)
            .field("chain_len", &self.inner.chain.len())
            .field("trust_anchors", &self.inner.roots.len())
            .field("expires_at", &self.inner.expires_at)
            .finish_non_exhaustive()
    }
}

fn parse_certificates(pem: &[u8], what: &str) -> Result<Vec<CertificateDer<'static>>, String> {
    let certificates = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("failed to parse {what} PEM: {err}"))?;
    if certificates.is_empty() {
        return Err(format!("no {what} found in PEM input"));
    }
    Ok(certificates)
}

/// 叶证书有效期的截止时刻。
fn leaf_not_after(leaf: &CertificateDer<'_>) -> Result<SystemTime, String> {
    let (_, certificate) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|err| format!("failed to parse leaf certificate: {err}"))?;
    let seconds = certificate.validity().not_after.timestamp();
    let offset = Duration::from_secs(seconds.unsigned_abs());
    let instant = if seconds >= 0 {
        UNIX_EPOCH.checked_add(offset)
    } else {
        UNIX_EPOCH.checked_sub(offset)
    };
    instant.ok_or_else(|| format!("leaf certificate notAfter {seconds} is out of range"))
}

/// 磁盘上的三件凭据材料：证书、私钥与信任根。
///
/// 默认文件名为 `cert.pem`、`key.pem`、`ca.pem`，均相对于 `dir`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialFiles {
    dir: PathBuf,
    cert: String,
    key: String,
    ca: String,
}

impl CredentialFiles {
    /// 以默认文件名描述目录下的材料。
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cert: "cert.pem".to_owned(),
            key: "key.pem".to_owned(),
            ca: "ca.pem".to_owned(),
        }
    }

    /// 覆盖三个文件名。
    pub fn with_names(
        mut self,
        cert: impl Into<String>,
        key: impl Into<String>,
        ca: impl Into<String>,
    ) -> Self {
        self.cert = cert.into();
        self.key = key.into();
        self.ca = ca.into();
        self
    }

    /// 材料所在目录。
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 三个文件的完整路径，顺序为证书、私钥、信任根。
    pub fn paths(&self) -> [PathBuf; 3] {
        [
            self.dir.join(&self.cert),
            self.dir.join(&self.key),
            self.dir.join(&self.ca),
        ]
    }

    /// 读取三个文件的原始内容。
    pub(crate) fn read(&self) -> Result<[Vec<u8>; 3], String> {
        let [cert, key, ca] = self.paths();
        Ok([read_file(&cert)?, read_file(&key)?, read_file(&ca)?])
    }

    /// 读取并解析为凭据，同时返回内容指纹。
    pub(crate) fn load(&self) -> Result<(Credential, [u8; 32]), String> {
        let contents = self.read()?;
        let fingerprint = content_fingerprint(&contents);
        let [cert, key, ca] = contents;
        let credential = Credential::from_pem(&cert, &key, &ca)?;
        Ok((credential, fingerprint))
    }

    /// 仅计算当前内容指纹，不解析。
    pub(crate) fn fingerprint(&self) -> Result<[u8; 32], String> {
        self.read().map(|contents| content_fingerprint(&contents))
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|err| format!("cannot read {}: {err}", path.display()))
}

/// 三个文件内容的 SHA-256 指纹；每段前置长度，避免拼接歧义。
fn content_fingerprint(contents: &[Vec<u8>; 3]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in contents {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    hasher.finalize().into()
}
