use std::fmt;
use std::time::SystemTime;

use parking_lot::Mutex;
use warden_core::error::WardenError;

use crate::credential::{Credential, CredentialFiles};

/// 产出传输凭据的单一策略。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 客户端只依赖“产出凭据”与“探测变化”两项能力，具体来源（静态、磁盘、profile）可任意替换；
/// - [`CredentialChain`](crate::CredentialChain) 同样实现本 trait，组合与单一来源对调用方透明。
///
/// ## 契约（What）
/// - `produce`：返回凭据，或以 `CredentialUnavailable` 说明缺失、格式错误或过期；
/// - `changed`：非阻塞、无副作用的探测，报告自上次成功 `produce` 以来底层材料是否变化；
/// - `name`：用于日志与聚合错误的稳定名称。
///
/// ## 风险与权衡（Trade-offs）
/// - 接口为同步调用：凭据材料体积很小，读取开销可忽略，换来实现与测试的简单。
pub trait CredentialSource: Send + Sync + 'static {
    /// 来源名称。
    fn name(&self) -> &str;

    /// 产出一份凭据。
    fn produce(&self) -> Result<Credential, WardenError>;

    /// 底层材料自上次成功产出以来是否变化。
    fn changed(&self) -> bool;
}

pub(crate) fn unavailable(source: &str, reason: impl Into<String>) -> WardenError {
    WardenError::CredentialUnavailable {
        source_name: source.to_owned(),
        reason: reason.into(),
    }
}

pub(crate) fn reject_expired(source: &str, credential: Credential) -> Result<Credential, WardenError> {
    if credential.is_expired_at(SystemTime::now()) {
        return Err(unavailable(source, "credential material has expired"));
    }
    Ok(credential)
}

/// 固定凭据来源，永不变化。
#[derive(Clone)]
pub struct StaticSource {
    name: String,
    credential: Credential,
}

impl StaticSource {
    pub fn new(credential: Credential) -> Self {
        Self::named("static", credential)
    }

    pub fn named(name: impl Into<String>, credential: Credential) -> Self {
        Self {
            name: name.into(),
            credential,
        }
    }
}

impl CredentialSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> Result<Credential, WardenError> {
        reject_expired(&self.name, self.credential.clone())
    }

    fn changed(&self) -> bool {
        false
    }
}

impl fmt::Debug for StaticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSource")
            .field("name", &self.name)
            .field("credential", &self.credential)
            .finish()
    }
}

/// 从磁盘目录读取凭据，并以内容指纹探测变化。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// - `produce` 读取证书、私钥、信任根三个文件，解析成功后缓存三者内容的 SHA-256 指纹；
/// - `changed` 重新计算指纹并与缓存比较，不解析、不修改缓存；
/// - 文件暂时不可读（例如轮换工具正在写入）时 `changed` 返回 `false`，等待下一轮探测。
///
/// ## 契约（What）
/// - 尚未成功产出过时，只要材料可读，`changed` 即返回 `true`。
pub struct PathSource {
    name: String,
    files: CredentialFiles,
    last_fingerprint: Mutex<Option<[u8; 32]>>,
}

impl PathSource {
    /// 以默认文件名（`cert.pem`、`key.pem`、`ca.pem`）监视目录。
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self::with_files(CredentialFiles::in_dir(dir))
    }

    /// 以自定义文件布局构造。
    pub fn with_files(files: CredentialFiles) -> Self {
        Self {
            name: format!("path:{}", files.dir().display()),
            files,
            last_fingerprint: Mutex::new(None),
        }
    }

    /// 文件布局。
    pub fn files(&self) -> &CredentialFiles {
        &self.files
    }
}

impl CredentialSource for PathSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> Result<Credential, WardenError> {
        let (credential, fingerprint) = self
            .files
            .load()
            .map_err(|reason| unavailable(&self.name, reason))?;
        let credential = reject_expired(&self.name, credential)?;
        *self.last_fingerprint.lock() = Some(fingerprint);
        tracing::debug!(source = %self.name, fingerprint = %credential.fingerprint(), "loaded credential material from disk");
        Ok(credential)
    }

    fn changed(&self) -> bool {
        let current = match self.files.fingerprint() {
            Ok(current) => current,
            Err(reason) => {
                tracing::debug!(source = %self.name, %reason, "credential material unreadable, skipping change check");
                return false;
            }
        };
        *self.last_fingerprint.lock() != Some(current)
    }
}

impl fmt::Debug for PathSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathSource")
            .field("name", &self.name)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}
