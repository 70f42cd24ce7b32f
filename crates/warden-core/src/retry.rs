use std::time::Duration;

use serde::Deserialize;

use crate::config::millis;

/// 指数退避策略。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 拨号失败在网络抖动时属于可恢复错误，但 `Dialer` 自身不做自动重试，
///   由调用方按本策略决定“再试几轮、每轮等多久”。
///
/// ## 契约（What）
/// - `max_attempts`：总尝试轮数（含首轮），为 0 时按 1 处理；
/// - `delay(n)`：第 `n` 次失败后的等待时长，`initial * multiplier^(n-1)`，不超过 `max`。
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Backoff {
    #[serde(with = "millis")]
    pub initial: Duration,
    #[serde(with = "millis")]
    pub max: Duration,
    pub multiplier: f64,
    pub max_attempts: u32,
}

impl Backoff {
    /// 只尝试一次、不重试的策略。
    pub const fn never() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
            multiplier: 1.0,
            max_attempts: 1,
        }
    }

    /// 有效尝试轮数。
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// 第 `failures` 次失败后的等待时长（`failures` 从 1 开始）。
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let scaled = self.initial.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(10), Duration::from_secs(2));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn never_means_single_attempt() {
        let backoff = Backoff {
            max_attempts: 0,
            ..Backoff::never()
        };
        assert_eq!(backoff.attempts(), 1);
    }
}
