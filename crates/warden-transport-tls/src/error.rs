use std::{borrow::Cow, io, time::Duration};

use rustls::{AlertDescription, Error as RustlsError};
use warden_core::error::{CoreError, ErrorCategory, RetryAdvice, SecurityClass};

/// TLS 客户端错误映射模块。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将 `rustls`/IO 层的错误统一映射到 [`ErrorCategory`]，上层据此决定重试、告警或放弃；
/// - 提供稳定错误码，使运维脚本无需解析底层库文案即可定位问题。
///
/// ## 逻辑（How）
/// - `OperationKind` 描述一类操作的错误码与默认文案；
/// - `map_handshake_error` 根据 `io::Error`（可能嵌套 `rustls::Error`）推导分类；
/// - `alert_to_category` 针对 TLS Alert 做进一步细化。
///
/// ## 风险与权衡（Trade-offs）
/// - 未穷举的 `rustls::Error` 与 Alert 默认视为可重试，避免误报安全事件。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const HANDSHAKE: OperationKind = OperationKind {
    code: "warden.transport.tls.handshake_failed",
    message: "tls handshake",
};

pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "warden.transport.tls.config_invalid",
    message: "tls client config",
};

pub(crate) const SERVER_NAME: OperationKind = OperationKind {
    code: "warden.transport.tls.server_name_invalid",
    message: "tls server name",
};

const CANCEL_CODE: &str = "warden.transport.tls.cancelled";
const TIMEOUT_CODE: &str = "warden.transport.tls.timeout";

/// 将握手阶段的 `io::Error` 映射为 [`CoreError`]。
pub(crate) fn map_handshake_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = categorize_with_rustls(&error);
    CoreError::new(
        kind.code,
        Cow::Owned(format!("{}: {}", kind.message, error)),
    )
    .with_category(category)
    .with_cause(error)
}

/// 将构建配置时的 `rustls::Error` 映射为 [`CoreError`]。
pub(crate) fn map_config_error(error: RustlsError) -> CoreError {
    CoreError::new(
        CONFIGURE.code,
        Cow::Owned(format!("{}: {}", CONFIGURE.message, error)),
    )
    .with_category(ErrorCategory::NonRetryable)
    .with_cause(error)
}

/// SNI 名称不合法。
pub(crate) fn invalid_server_name(name: &str) -> CoreError {
    CoreError::new(
        SERVER_NAME.code,
        format!("{}: `{name}` is neither a DNS name nor an IP address", SERVER_NAME.message),
    )
}

pub(crate) fn cancelled_error(kind: OperationKind) -> CoreError {
    let message = format!("{} cancelled", kind.message);
    CoreError::new(CANCEL_CODE, message).with_category(ErrorCategory::Cancelled)
}

pub(crate) fn timeout_error(kind: OperationKind) -> CoreError {
    let message = format!("{} timed out", kind.message);
    CoreError::new(TIMEOUT_CODE, message).with_category(ErrorCategory::Timeout)
}

fn categorize_with_rustls(error: &io::Error) -> ErrorCategory {
    if let Some(source) = error.get_ref()
        && let Some(rustls_error) = source.downcast_ref::<RustlsError>()
    {
        return categorize_rustls_error(rustls_error);
    }
    categorize_io_error(error)
}

fn categorize_rustls_error(error: &RustlsError) -> ErrorCategory {
    match error {
        RustlsError::InappropriateMessage { .. }
        | RustlsError::InappropriateHandshakeMessage { .. }
        | RustlsError::InvalidMessage(_)
        | RustlsError::PeerMisbehaved(_)
        | RustlsError::DecryptError
        | RustlsError::PeerSentOversizedRecord => ErrorCategory::Security(SecurityClass::Integrity),
        RustlsError::NoCertificatesPresented
        | RustlsError::InvalidCertificate(_)
        | RustlsError::UnsupportedNameType => {
            ErrorCategory::Security(SecurityClass::Authentication)
        }
        RustlsError::AlertReceived(alert) => alert_to_category(alert),
        RustlsError::NoApplicationProtocol => ErrorCategory::Security(SecurityClass::Unknown),
        _ => retryable(Duration::from_millis(60)),
    }
}

fn alert_to_category(alert: &AlertDescription) -> ErrorCategory {
    match alert {
        AlertDescription::BadCertificate
        | AlertDescription::UnsupportedCertificate
        | AlertDescription::CertificateRevoked
        | AlertDescription::CertificateExpired
        | AlertDescription::CertificateUnknown
        | AlertDescription::UnknownCA
        | AlertDescription::CertificateRequired => {
            ErrorCategory::Security(SecurityClass::Authentication)
        }
        AlertDescription::AccessDenied => ErrorCategory::Security(SecurityClass::Authorization),
        AlertDescription::DecodeError
        | AlertDescription::DecryptError
        | AlertDescription::HandshakeFailure
        | AlertDescription::IllegalParameter
        | AlertDescription::BadRecordMac
        | AlertDescription::UnexpectedMessage
        | AlertDescription::InsufficientSecurity
        | AlertDescription::ProtocolVersion => ErrorCategory::Security(SecurityClass::Integrity),
        _ => retryable(Duration::from_millis(40)),
    }
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut | ErrorKind::UnexpectedEof => retryable(Duration::from_millis(40)),
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe => retryable(Duration::from_millis(60)),
        _ => retryable(Duration::from_millis(25)),
    }
}

fn retryable(wait: Duration) -> ErrorCategory {
    ErrorCategory::Retryable(RetryAdvice::after(wait))
}
