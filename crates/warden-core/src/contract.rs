use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// 取消原语，统一表达跨模块的可中断性契约。
///
/// # 设计背景（Why）
/// - 后台重载循环与事件流读取任务都是长寿命任务，外部必须能够随时打断它们；
/// - 监听器在“等待下一条事件”时被阻塞，取消必须能及时唤醒该等待，而不是依赖忙轮询。
///
/// # 逻辑解析（How）
/// - 内部使用 [`AtomicBool`] 表达取消状态，并通过 [`Arc`] 支持多方共享；
/// - `cancel` 在首次成功设置取消位时返回 `true`，并通过 [`Notify`] 唤醒所有等待者；
/// - [`cancelled`](Self::cancelled) 先注册等待再复查标志位，避免“检查后、等待前”被取消导致的丢失唤醒。
///
/// # 契约说明（What）
/// - **前置条件**：构造时默认处于“未取消”状态；
/// - **后置条件**：一旦 `cancel` 成功，`is_cancelled` 全局可见，所有 `cancelled().await` 立即返回。
///
/// # 设计取舍与风险（Trade-offs）
/// - 取消是单向的，不支持重置；需要重新开始的组件应构造新的令牌；
/// - `child` 与父令牌共享同一原子位，取消任意一方都会影响全部派生者。
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancellationState>,
}

#[derive(Default)]
struct CancellationState {
    flag: AtomicBool,
    notify: Notify,
}

impl Cancellation {
    /// 创建处于“未取消”状态的取消令牌。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationState::default()),
        }
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// 将当前令牌标记为取消。
    ///
    /// 返回值为 `true` 表示本次调用首次触发取消；返回 `false` 表示之前已被取消。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 派生共享同一原子位的子令牌，用于跨模块传播取消语义。
    pub fn child(&self) -> Self {
        self.clone()
    }

    /// 等待取消发生；若已取消则立即返回。
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // 先登记等待者再检查标志位，`notify_waiters` 不会遗漏本次等待。
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// 基于单调时钟的截止时间。
///
/// - `Deadline::none()` 表示无截止；
/// - `remaining` 在已过期时返回 `Duration::ZERO`，调用方据此直接判定超时。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    /// 不设截止时间。
    pub const fn none() -> Self {
        Self { instant: None }
    }

    /// 在指定时刻截止。
    pub const fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    /// 从当前时刻起经过 `timeout` 后截止。
    pub fn after(timeout: Duration) -> Self {
        Self::at(Instant::now() + timeout)
    }

    /// 截止时刻。
    pub const fn instant(&self) -> Option<Instant> {
        self.instant
    }

    /// 是否已经过期。
    pub fn is_expired(&self) -> bool {
        self.instant.is_some_and(|target| target <= Instant::now())
    }

    /// 剩余时间；无截止时返回 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        self.instant
            .map(|target| target.saturating_duration_since(Instant::now()))
    }

    /// 取两个截止时间中更早的一个。
    pub fn min(self, other: Self) -> Self {
        match (self.instant, other.instant) {
            (Some(a), Some(b)) => Self::at(a.min(b)),
            (Some(_), None) => self,
            (None, _) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let token = Cancellation::new();
        assert!(!token.is_cancelled());
        assert!(token.cancel(), "首次取消应返回 true");
        assert!(!token.cancel(), "重复取消应返回 false");
        assert!(token.child().is_cancelled(), "子令牌共享取消位");
    }

    #[tokio::test]
    async fn cancelled_wakes_pending_waiter() {
        let token = Cancellation::new();
        let waiter = {
            let token = token.child();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("取消后等待者必须被及时唤醒")
            .expect("等待任务不应 panic");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_cancelled() {
        let token = Cancellation::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("已取消的令牌不应阻塞");
    }

    #[test]
    fn deadline_min_prefers_earlier_instant() {
        let now = Instant::now();
        let early = Deadline::at(now);
        let late = Deadline::at(now + Duration::from_secs(5));
        assert_eq!(early.min(late), early);
        assert_eq!(Deadline::none().min(late), late);
        assert!(early.is_expired());
        assert_eq!(Deadline::none().remaining(), None);
    }
}
