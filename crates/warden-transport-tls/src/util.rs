use std::future::Future;
use std::io;

use warden_core::contract::{Cancellation, Deadline};
use warden_core::error::CoreError;

use crate::error::{self, OperationKind};

/// 在取消与截止约束下执行一次 TLS 操作。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 复用拨号层的“取消/截止”治理语义，保证握手同样尊重调用方的上下文；
///
/// ## 契约（What）
/// - 截止已过或已取消时立即返回对应错误，不启动握手；
/// - Future 失败时由 `map_error` 映射为带稳定错误码的 [`CoreError`]。
pub(crate) async fn run_with_context<F, T, Map>(
    kind: OperationKind,
    deadline: Deadline,
    cancellation: &Cancellation,
    future: F,
    map_error: Map,
) -> Result<T, CoreError>
where
    F: Future<Output = io::Result<T>>,
    Map: Fn(OperationKind, io::Error) -> CoreError,
{
    if deadline.is_expired() {
        return Err(error::timeout_error(kind));
    }
    if cancellation.is_cancelled() {
        return Err(error::cancelled_error(kind));
    }

    let cancel = cancellation.cancelled();
    tokio::pin!(cancel);
    tokio::pin!(future);

    match deadline.instant() {
        Some(instant) => {
            let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(instant));
            tokio::pin!(sleep);
            tokio::select! {
                biased;
                _ = &mut cancel => Err(error::cancelled_error(kind)),
                _ = &mut sleep => Err(error::timeout_error(kind)),
                result = &mut future => result.map_err(|err| map_error(kind, err)),
            }
        }
        None => tokio::select! {
            biased;
            _ = &mut cancel => Err(error::cancelled_error(kind)),
            result = &mut future => result.map_err(|err| map_error(kind, err)),
        },
    }
}
