use std::future::Future;

use warden_core::contract::{Cancellation, Deadline};
use warden_core::error::CoreError;

use crate::error::{OperationKind, cancelled_error, timeout_error};

/// 在保留取消/截止语义的前提下执行一次拨号步骤。
///
/// # 教案级注释
/// - **意图（Why）**：拨号原语由调用方注入，Dialer 不能假设它自觉遵守截止时间，
///   因此在外层统一套上截止与取消；
/// - **逻辑（How）**：先短路已过期或已取消的情况，再以 `biased` 的 `select!` 让取消优先于超时、
///   超时优先于完成；
/// - **契约（What）**：取消返回 `Cancelled` 分类错误，超时返回 `Timeout` 分类错误，
///   否则原样返回 Future 的结果。
pub(crate) async fn run_with_context<F, T>(
    kind: OperationKind,
    deadline: Deadline,
    cancellation: &Cancellation,
    future: F,
) -> Result<T, CoreError>
where
    F: Future<Output = Result<T, CoreError>>,
{
    if deadline.is_expired() {
        return Err(timeout_error(kind));
    }
    if cancellation.is_cancelled() {
        return Err(cancelled_error(kind));
    }

    let cancel = cancellation.cancelled();
    tokio::pin!(cancel);
    tokio::pin!(future);

    match deadline.instant() {
        Some(target) => {
            let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(target));
            tokio::pin!(sleep);
            tokio::select! {
                biased;
                _ = &mut cancel => Err(cancelled_error(kind)),
                _ = &mut sleep => Err(timeout_error(kind)),
                result = &mut future => result,
            }
        }
        None => {
            tokio::select! {
                biased;
                _ = &mut cancel => Err(cancelled_error(kind)),
                result = &mut future => result,
            }
        }
    }
}

/// 在可取消的前提下休眠；被取消时返回 `false`。
pub(crate) async fn sleep_unless_cancelled(
    duration: std::time::Duration,
    cancellation: &Cancellation,
) -> bool {
    tokio::select! {
        biased;
        _ = cancellation.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
