use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warden_client::Client;
use warden_core::access::{AccessEvent, AccessEventKind, AccessRequest, Decision, RequestState};
use warden_core::contract::Cancellation;
use warden_core::error::WardenError;
use warden_core::rpc::AccessEventStream;

use crate::router::{Dispatch, RequestRouter};

/// 监听器生命周期状态。
///
/// `Stopped` 与 `Faulted` 均为终态；故障后需要构造新的监听器才能恢复监听。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatcherState {
    Idle,
    Watching,
    Stopped,
    Faulted,
}

impl WatcherState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Faulted)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Watching => "watching",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 非致命错误的接收端：处理器错误与回写失败都会送到这里，监听循环继续运行。
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, error: WardenError);
}

impl<F> ErrorSink for F
where
    F: Fn(WardenError) + Send + Sync + 'static,
{
    fn report(&self, error: WardenError) {
        self(error)
    }
}

/// 缺省错误接收端：以 warn 级事件记录。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: WardenError) {
        tracing::warn!(code = error.code(), error = %error, "workflow event failed");
    }
}

struct Shared {
    state: watch::Sender<WatcherState>,
    stop: Cancellation,
    fault: Mutex<Option<String>>,
}

impl Shared {
    fn transition(&self, next: WatcherState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "watcher state changed");
        }
    }

    fn fault_error(&self) -> WardenError {
        let detail = self
            .fault
            .lock()
            .clone()
            .unwrap_or_else(|| "watcher faulted".to_owned());
        WardenError::StreamFault {
            detail,
            cause: None,
        }
    }
}

/// 访问请求事件的监听器：订阅客户端事件流，按到达顺序交给路由器，并把决策回写服务端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 事件之间存在先后依赖（同一请求的“批准”不能晚于其后的“过期”被处理），
///   因此每个监听器只有一个读取任务，事件严格串行分发；
/// - 多个监听器各自持有订阅与任务，可以在同一个客户端上并行运行。
///
/// ## 逻辑（How）
/// - `start` 订阅事件流后派生读取任务；任务以 `biased` 的 `select!` 优先观察取消信号，
///   再等待下一个事件，等待期间取消可立即生效；
/// - 路由器给出批准或拒绝且请求仍为 `Pending` 时，通过客户端回写；回写同样可被取消；
/// - 流结束或流错误视为故障，任务以 `StreamFault` 结束。
///
/// ## 契约（What）
/// - 状态机：`Idle → Watching → Stopped | Faulted`，终态不可逆；
/// - 取消（调用方令牌或 [`close`](Self::close)）之后不再分发任何事件，缓冲中的事件被丢弃；
/// - 处理器错误与回写失败交给 [`ErrorSink`]，不终止监听；
/// - 流故障由 [`wait`](Self::wait) 以 `StreamFault` 返回给调用方。
pub struct WorkflowWatcher {
    client: Client,
    router: Arc<RequestRouter>,
    sink: Arc<dyn ErrorSink>,
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<Result<(), WardenError>>>>,
}

impl WorkflowWatcher {
    pub fn new(client: Client, router: Arc<RequestRouter>) -> Self {
        Self {
            client,
            router,
            sink: Arc::new(TracingErrorSink),
            shared: Arc::new(Shared {
                state: watch::Sender::new(WatcherState::Idle),
                stop: Cancellation::new(),
                fault: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// 替换错误接收端。
    pub fn with_error_sink(mut self, sink: impl ErrorSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    /// 当前状态。
    pub fn state(&self) -> WatcherState {
        *self.shared.state.borrow()
    }

    /// 订阅事件流并开始分发。
    ///
    /// - 只能从 `Idle` 调用一次，否则返回 `InvalidState`；
    /// - 订阅失败时监听器进入 `Faulted` 并返回 `StreamFault`；
    /// - 订阅期间被 [`close`](Self::close) 打断时放弃订阅，进入 `Stopped` 并返回 `Ok(())`；
    /// - `cancellation` 触发后监听器进入 `Stopped`。
    pub async fn start(&self, cancellation: Cancellation) -> Result<(), WardenError> {
        let mut actual = WatcherState::Idle;
        let claimed = self.shared.state.send_if_modified(|state| {
            actual = *state;
            if *state == WatcherState::Idle {
                *state = WatcherState::Watching;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(WardenError::InvalidState {
                expected: "idle",
                actual: actual.to_string(),
            });
        }
        tracing::info!(from = "idle", to = "watching", "watcher state changed");

        let subscribed = tokio::select! {
            biased;
            _ = self.shared.stop.cancelled() => None,
            subscribed = self.client.watch_access_requests() => Some(subscribed),
        };
        let stream = match subscribed {
            None => {
                self.shared.transition(WatcherState::Stopped);
                return Ok(());
            }
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                let detail = format!("subscription failed: {err}");
                *self.shared.fault.lock() = Some(detail.clone());
                self.shared.transition(WatcherState::Faulted);
                let cause = match err {
                    WardenError::Rpc { source, .. } => Some(source),
                    _ => None,
                };
                return Err(WardenError::StreamFault { detail, cause });
            }
        };

        let reader = EventLoop {
            client: self.client.clone(),
            router: Arc::clone(&self.router),
            sink: Arc::clone(&self.sink),
            external: cancellation,
            internal: self.shared.stop.clone(),
        };
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            let outcome = reader.run(stream).await;
            match &outcome {
                Ok(()) => shared.transition(WatcherState::Stopped),
                Err(err) => {
                    tracing::warn!(error = %err, "watcher faulted");
                    *shared.fault.lock() = Some(err.to_string());
                    shared.transition(WatcherState::Faulted);
                }
            }
            outcome
        });
        *self.task.lock() = Some(task);
        Ok(())
    }

    /// 等待监听结束：`Stopped` 返回 `Ok(())`，`Faulted` 返回 `StreamFault`。
    ///
    /// 尚未启动时返回 `InvalidState`。
    pub async fn wait(&self) -> Result<(), WardenError> {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            return match handle.await {
                Ok(outcome) => outcome,
                Err(join) => Err(WardenError::StreamFault {
                    detail: format!("watch task aborted: {join}"),
                    cause: None,
                }),
            };
        }
        let mut states = self.shared.state.subscribe();
        let state = match states.wait_for(|state| *state != WatcherState::Watching).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        match state {
            WatcherState::Idle => Err(WardenError::InvalidState {
                expected: "watching",
                actual: state.to_string(),
            }),
            WatcherState::Faulted => Err(self.shared.fault_error()),
            WatcherState::Watching | WatcherState::Stopped => Ok(()),
        }
    }

    /// 停止监听并释放订阅，幂等。
    ///
    /// 已进入 `Faulted` 的监听器保持该状态；未启动的监听器直接进入 `Stopped`；
    /// 与进行中的 `start` 并发时，等到监听器离开 `Watching` 才返回。
    pub async fn close(&self) -> Result<(), WardenError> {
        self.shared.stop.cancel();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            join_reader(handle).await;
        } else {
            // `start` 可能仍在订阅或尚未登记任务句柄。
            let mut states = self.shared.state.subscribe();
            let _ = states
                .wait_for(|state| *state != WatcherState::Watching)
                .await;
            let late = self.task.lock().take();
            if let Some(handle) = late {
                join_reader(handle).await;
            }
        }
        self.shared.state.send_if_modified(|state| {
            if *state == WatcherState::Idle {
                *state = WatcherState::Stopped;
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

async fn join_reader(handle: JoinHandle<Result<(), WardenError>>) {
    if let Err(join) = handle.await {
        tracing::debug!(error = %join, "watch task ended abnormally");
    }
}

impl Drop for WorkflowWatcher {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

impl fmt::Debug for WorkflowWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowWatcher")
            .field("state", &self.state())
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}

/// 读取任务持有的全部上下文。
struct EventLoop {
    client: Client,
    router: Arc<RequestRouter>,
    sink: Arc<dyn ErrorSink>,
    external: Cancellation,
    internal: Cancellation,
}

enum Flow {
    Continue,
    Stop,
}

impl EventLoop {
    fn is_cancelled(&self) -> bool {
        self.external.is_cancelled() || self.internal.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            _ = self.external.cancelled() => {}
            _ = self.internal.cancelled() => {}
        }
    }

    async fn run(self, mut stream: AccessEventStream) -> Result<(), WardenError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancelled() => return Ok(()),
                next = stream.next() => next,
            };
            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    return Err(WardenError::StreamFault {
                        detail: "event stream failed".to_owned(),
                        cause: Some(err),
                    });
                }
                None => {
                    return Err(WardenError::StreamFault {
                        detail: "event stream ended".to_owned(),
                        cause: None,
                    });
                }
            };
            // 处理器可能在同步执行期间触发取消。
            if self.is_cancelled() {
                return Ok(());
            }
            if let Flow::Stop = self.handle(event).await {
                return Ok(());
            }
        }
    }

    async fn handle(&self, event: AccessEvent) -> Flow {
        let (kind, request) = match (event.kind, event.request) {
            (AccessEventKind::Init, _) => {
                tracing::debug!("event stream confirmed");
                return Flow::Continue;
            }
            (kind, Some(request)) => (kind, request),
            (kind, None) => {
                tracing::debug!(?kind, "event without request ignored");
                return Flow::Continue;
            }
        };
        tracing::trace!(?kind, request = %request.id, "event received");

        let dispatch = match self.router.dispatch(&request) {
            Ok(dispatch) => dispatch,
            Err(err) => {
                self.sink.report(err);
                return Flow::Continue;
            }
        };
        let Dispatch::Handled { route, decision } = dispatch else {
            return Flow::Continue;
        };
        if !decision.requires_mutation() {
            return Flow::Continue;
        }
        if kind != AccessEventKind::Put || request.state != RequestState::Pending {
            tracing::debug!(
                request = %request.id,
                state = %request.state,
                route = %route,
                "decision on non-pending request skipped"
            );
            return Flow::Continue;
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Flow::Stop,
            outcome = self.apply(&request, &decision) => {
                if let Err(err) = outcome {
                    self.sink.report(err);
                }
                Flow::Continue
            }
        }
    }

    async fn apply(&self, request: &AccessRequest, decision: &Decision) -> Result<(), WardenError> {
        match decision {
            Decision::Approve { reason } => {
                self.client.approve(&request.id, reason.as_deref()).await?;
                tracing::info!(request = %request.id, "access request approved");
            }
            Decision::Deny { reason } => {
                self.client.deny(&request.id, reason.as_deref()).await?;
                tracing::info!(request = %request.id, "access request denied");
            }
            Decision::PassThrough => {}
        }
        Ok(())
    }
}
