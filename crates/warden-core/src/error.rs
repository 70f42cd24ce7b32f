//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 传输层、凭据层与工作流层产生的故障需要合流为稳定的错误码，日志与告警据此做精确分类；
//! - 领域层额外需要一份“可恢复 / 致命 / 单事件隔离”的分类表，驱动客户端的重载与监听器的状态迁移。
//!
//! ## 设计要求（What）
//! - [`CoreError`]：稳定错误码 + 人类可读消息 + 可选底层原因 + 结构化分类，面向传输与 RPC 调用；
//! - [`WardenError`]：领域错误分类，每个变体暴露稳定 `code()` 与默认 `category()`；
//! - 聚合型错误（凭据链、拨号）保留每个候选项的失败原因，便于排障。

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// 稳定错误码集合，遵循 `warden.<领域>.<语义>` 命名。
pub mod codes {
    pub const CREDENTIAL_UNAVAILABLE: &str = "warden.credential.unavailable";
    pub const NO_CREDENTIALS: &str = "warden.credential.none_available";
    pub const DIAL_FAILED: &str = "warden.dial.failed";
    pub const INCOMPATIBLE_VERSION: &str = "warden.client.incompatible_version";
    pub const RELOAD_FAILED: &str = "warden.client.reload_failed";
    pub const CLIENT_CLOSED: &str = "warden.client.closed";
    pub const PING_TIMEOUT: &str = "warden.client.ping_timeout";
    pub const PING_CANCELLED: &str = "warden.client.ping_cancelled";
    pub const HANDLER_FAILED: &str = "warden.workflow.handler_failed";
    pub const STREAM_FAULT: &str = "warden.workflow.stream_fault";
    pub const INVALID_STATE: &str = "warden.workflow.invalid_state";
    pub const RPC_FAILED: &str = "warden.rpc.failed";
    pub const CONFIG_INVALID: &str = "warden.config.invalid";
}

/// `ErrorCause` 封装底层原因，保持 `Send + Sync` 以方便跨线程传递。
pub type ErrorCause = Box<dyn StdError + Send + Sync + 'static>;

/// 统一返回值别名，默认错误类型为 [`WardenError`]。
pub type Result<T, E = WardenError> = std::result::Result<T, E>;

/// `CoreError` 表示传输与 RPC 层共享的稳定错误形态。
///
/// # 设计背景（Why）
/// - 套接字、TLS 握手与 RPC 调用的失败原因五花八门，上层只关心“错误码 + 是否可重试”；
/// - 通过 Builder 风格叠加分类与底层原因，保持构造点简洁。
///
/// # 契约说明（What）
/// - `code`：稳定字符串，`namespace.reason` 风格；
/// - `message`：面向排障人员的描述，不应包含密钥等敏感信息；
/// - `category`：未显式设置时为 [`ErrorCategory::NonRetryable`]。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    cause: Option<ErrorCause>,
    category: Option<ErrorCategory>,
}

impl CoreError {
    /// 构造核心错误。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
            category: None,
        }
    }

    /// 附带底层原因并返回新的核心错误。
    pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// 为错误标记结构化分类信息。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// 获取结构化错误分类；未设置时返回 [`ErrorCategory::NonRetryable`]。
    pub fn category(&self) -> ErrorCategory {
        self.category.clone().unwrap_or(ErrorCategory::NonRetryable)
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 获取底层原因。
    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn StdError + 'static))
    }
}

/// 错误分类枚举，驱动重试、告警与状态迁移策略。
///
/// - `Retryable`：携带退避建议 [`RetryAdvice`]；
/// - `Security`：证书、握手或授权违规；
/// - `Cancelled`/`Timeout`：由上下文取消或截止触发；
/// - `ProtocolViolation`：对端返回了无法理解的数据，通常需要关闭连接。
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable(RetryAdvice),
    NonRetryable,
    Security(SecurityClass),
    ProtocolViolation,
    Cancelled,
    Timeout,
}

/// 重试建议：调用方至少等待 `wait` 后再发起下一次尝试。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryAdvice {
    wait: Duration,
}

impl RetryAdvice {
    /// 构造“等待指定时长后重试”的建议。
    pub const fn after(wait: Duration) -> Self {
        Self { wait }
    }

    /// 建议的等待时长。
    pub const fn wait(&self) -> Duration {
        self.wait
    }
}

/// 安全类错误的细分。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityClass {
    Authentication,
    Authorization,
    Integrity,
    Unknown,
}

/// 凭据链中单个来源的失败记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFailure {
    /// 来源名称，例如 `path:/etc/warden/tls`。
    pub source: String,
    /// 失败原因。
    pub reason: String,
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.reason)
    }
}

/// 拨号阶段单个候选地址的失败记录。
#[derive(Debug)]
pub struct DialAttempt {
    /// 候选地址。
    pub address: String,
    /// 该地址的失败原因。
    pub error: CoreError,
}

impl fmt::Display for DialAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.error)
    }
}

/// 访问审批客户端的领域错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“构造期致命错误”“稳态可隔离错误”“监听器致命错误”显式区分，
///   调用方据此决定是中止构造、记录告警还是重建监听器；
/// - **契约 (What)**：
///   - `CredentialUnavailable` / `NoCredentialsAvailable`：凭据缺失、格式错误或过期，外部修复后可重试；
///   - `DialFailed`：所有候选地址不可达，可由调用方带退避重试；
///   - `IncompatibleVersion`：构造期致命，不重试；
///   - `ReloadFailed`：非致命，旧连接继续可用；
///   - `HandlerError`：仅影响单个事件；
///   - `StreamFault`：对单个监听器致命，需要重建监听器；
/// - **执行逻辑 (How)**：`code()` 返回稳定错误码，`category()` 给出默认处置策略。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WardenError {
    /// 单个凭据来源无法产出凭据。
    #[error("credential source `{source_name}` unavailable: {reason}")]
    CredentialUnavailable { source_name: String, reason: String },

    /// 凭据链中的所有来源均失败。
    #[error("no credentials available: {}", join_display(failures))]
    NoCredentialsAvailable { failures: Vec<SourceFailure> },

    /// 所有候选地址均拨号失败。
    #[error("dial failed: {}", join_display(attempts))]
    DialFailed { attempts: Vec<DialAttempt> },

    /// 服务端版本与客户端不兼容。
    #[error(
        "server version {remote} is incompatible with client {client} (minimum {minimum})"
    )]
    IncompatibleVersion {
        client: String,
        remote: String,
        minimum: String,
    },

    /// 凭据热重载失败，旧连接保持可用。
    #[error("reload failed: {source}")]
    ReloadFailed {
        #[source]
        source: Box<WardenError>,
    },

    /// 路由命中的处理器返回错误。
    #[error("handler for route `{route}` failed: {source}")]
    HandlerError {
        route: String,
        #[source]
        source: ErrorCause,
    },

    /// 事件流断开或返回错误，监听器进入 Faulted。
    #[error("access request stream fault: {detail}")]
    StreamFault {
        detail: String,
        #[source]
        cause: Option<CoreError>,
    },

    /// RPC 调用失败。
    #[error("rpc `{operation}` failed: {source}")]
    Rpc {
        operation: &'static str,
        #[source]
        source: CoreError,
    },

    /// 配置不合法。
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// 客户端已关闭。
    #[error("client is closed")]
    Closed,

    /// 组件处于不允许该操作的状态。
    #[error("operation requires state {expected}, but component is {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },
}

impl WardenError {
    /// 构造 RPC 调用失败错误的便捷方法。
    pub fn rpc(operation: &'static str, source: CoreError) -> Self {
        Self::Rpc { operation, source }
    }

    /// 构造配置错误的便捷方法。
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable { .. } => codes::CREDENTIAL_UNAVAILABLE,
            Self::NoCredentialsAvailable { .. } => codes::NO_CREDENTIALS,
            Self::DialFailed { .. } => codes::DIAL_FAILED,
            Self::IncompatibleVersion { .. } => codes::INCOMPATIBLE_VERSION,
            Self::ReloadFailed { .. } => codes::RELOAD_FAILED,
            Self::HandlerError { .. } => codes::HANDLER_FAILED,
            Self::StreamFault { .. } => codes::STREAM_FAULT,
            Self::Rpc { .. } => codes::RPC_FAILED,
            Self::Config { .. } => codes::CONFIG_INVALID,
            Self::Closed => codes::CLIENT_CLOSED,
            Self::InvalidState { .. } => codes::INVALID_STATE,
        }
    }

    /// 默认处置策略。
    ///
    /// - 凭据与拨号错误建议稍后重试（外部修复或网络恢复）；
    /// - 版本不兼容、配置错误与关闭状态不可重试；
    /// - RPC 错误沿用底层 [`CoreError`] 的分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::CredentialUnavailable { .. } | Self::NoCredentialsAvailable { .. } => {
                ErrorCategory::Retryable(RetryAdvice::after(Duration::from_secs(1)))
            }
            Self::DialFailed { .. } => {
                ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(100)))
            }
            Self::ReloadFailed { source } => source.category(),
            Self::Rpc { source, .. } => source.category(),
            Self::StreamFault { .. } => {
                ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(500)))
            }
            Self::IncompatibleVersion { .. }
            | Self::HandlerError { .. }
            | Self::Config { .. }
            | Self::Closed
            | Self::InvalidState { .. } => ErrorCategory::NonRetryable,
        }
    }

    /// 是否属于构造期必须立即中止的致命错误。
    pub fn is_fatal_to_construction(&self) -> bool {
        matches!(
            self,
            Self::IncompatibleVersion { .. } | Self::Config { .. }
        )
    }
}

fn join_display<T: fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "no candidates".to_owned();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
