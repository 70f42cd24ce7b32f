use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use warden_core::error::{SourceFailure, WardenError};

use crate::credential::Credential;
use crate::source::CredentialSource;

const NONE_ACTIVE: usize = usize::MAX;

/// 固定顺序的凭据来源组合。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 客户端通常同时配置多种凭据来源（例如先读 profile，再回退到运维下发的目录）；
/// - 组合本身实现 [`CredentialSource`]，客户端无需区分单一来源与组合。
///
/// ## 逻辑（How）
/// - `produce` 依次调用每个来源，第一个成功者立即返回并记录其下标；
/// - 全部失败时返回 `NoCredentialsAvailable`，按顺序聚合每个来源的失败原因；
/// - `changed` 只询问上一次成功的来源；尚无成功记录时返回 `false`。
///
/// ## 契约（What）
/// - 构造时保证来源列表非空；
/// - 来源顺序即优先级，构造后不可变。
pub struct CredentialChain {
    sources: Vec<Arc<dyn CredentialSource>>,
    active: AtomicUsize,
    name: String,
}

impl CredentialChain {
    /// 以有序来源列表构造；列表为空时报错。
    pub fn new(sources: Vec<Arc<dyn CredentialSource>>) -> Result<Self, WardenError> {
        if sources.is_empty() {
            return Err(WardenError::config(
                "credential chain requires at least one source",
            ));
        }
        let name = format!(
            "chain[{}]",
            sources
                .iter()
                .map(|source| source.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            sources,
            active: AtomicUsize::new(NONE_ACTIVE),
            name,
        })
    }

    /// 只含一个来源的链。
    pub fn single(source: impl CredentialSource) -> Self {
        let source: Arc<dyn CredentialSource> = Arc::new(source);
        Self {
            name: format!("chain[{}]", source.name()),
            sources: vec![source],
            active: AtomicUsize::new(NONE_ACTIVE),
        }
    }

    /// 来源数量。
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// 构造保证非空，恒为 `false`。
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// 上一次成功产出凭据的来源。
    pub fn active_source(&self) -> Option<&str> {
        self.sources
            .get(self.active.load(Ordering::Acquire))
            .map(|source| source.name())
    }
}

impl CredentialSource for CredentialChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self) -> Result<Credential, WardenError> {
        let mut failures = Vec::new();
        for (index, source) in self.sources.iter().enumerate() {
            match source.produce() {
                Ok(credential) => {
                    self.active.store(index, Ordering::Release);
                    tracing::debug!(source = source.name(), index, "credential source selected");
                    return Ok(credential);
                }
                Err(err) => {
                    tracing::debug!(source = source.name(), error = %err, "credential source failed");
                    failures.push(SourceFailure {
                        source: source.name().to_owned(),
                        reason: failure_reason(err),
                    });
                }
            }
        }
        Err(WardenError::NoCredentialsAvailable { failures })
    }

    fn changed(&self) -> bool {
        self.sources
            .get(self.active.load(Ordering::Acquire))
            .is_some_and(|source| source.changed())
    }
}

/// 单一来源的失败原因；嵌套链的聚合错误直接展开为文案。
fn failure_reason(err: WardenError) -> String {
    match err {
        WardenError::CredentialUnavailable { reason, .. } => reason,
        other => other.to_string(),
    }
}

impl fmt::Debug for CredentialChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialChain")
            .field("name", &self.name)
            .field("active", &self.active_source())
            .finish()
    }
}
