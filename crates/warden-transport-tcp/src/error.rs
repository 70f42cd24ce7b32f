use std::borrow::Cow;
use std::io;
use std::time::Duration;

use warden_core::error::{CoreError, ErrorCategory, RetryAdvice};

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "warden.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const RESOLVE: OperationKind = OperationKind {
    code: "warden.transport.tcp.resolve_failed",
    message: "tcp resolve",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "warden.transport.tcp.configure_failed",
    message: "tcp configure",
};
pub(crate) const PROXY_HANDSHAKE: OperationKind = OperationKind {
    code: "warden.transport.proxy.handshake_failed",
    message: "proxy CONNECT",
};

const CANCEL_CODE: &str = "warden.transport.tcp.cancelled";
const TIMEOUT_CODE: &str = "warden.transport.tcp.timeout";
const PROXY_REJECTED_CODE: &str = "warden.transport.proxy.rejected";
const PROXY_MALFORMED_CODE: &str = "warden.transport.proxy.malformed_response";

/// 将 IO 错误映射为框架级 CoreError，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = categorize_io_error(&error);
    CoreError::new(
        kind.code,
        Cow::Owned(format!("{}: {}", kind.message, error)),
    )
    .with_category(category)
    .with_cause(error)
}

/// 构造取消错误。
pub(crate) fn cancelled_error(kind: OperationKind) -> CoreError {
    let message = format!("{} cancelled", kind.message);
    CoreError::new(CANCEL_CODE, message).with_category(ErrorCategory::Cancelled)
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind) -> CoreError {
    let message = format!("{} timed out", kind.message);
    CoreError::new(TIMEOUT_CODE, message).with_category(ErrorCategory::Timeout)
}

/// 代理以非 2xx 状态拒绝了 CONNECT。
pub(crate) fn proxy_rejected(status_line: &str) -> CoreError {
    CoreError::new(
        PROXY_REJECTED_CODE,
        format!("proxy rejected CONNECT: {status_line}"),
    )
    .with_category(ErrorCategory::NonRetryable)
}

/// 代理返回了无法解析的响应。
pub(crate) fn proxy_malformed(detail: impl Into<Cow<'static, str>>) -> CoreError {
    CoreError::new(PROXY_MALFORMED_CODE, detail).with_category(ErrorCategory::ProtocolViolation)
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    use io::ErrorKind;
    match error.kind() {
        ErrorKind::TimedOut => ErrorCategory::Timeout,
        ErrorKind::WouldBlock | ErrorKind::Interrupted => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(5)))
        }
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::AddrInUse
        | ErrorKind::AddrNotAvailable
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => {
            ErrorCategory::Retryable(RetryAdvice::after(Duration::from_millis(50)))
        }
        ErrorKind::PermissionDenied | ErrorKind::Unsupported => ErrorCategory::NonRetryable,
        _ => ErrorCategory::NonRetryable,
    }
}
