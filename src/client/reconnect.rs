// resilient_ws_client/src/client/reconnect.rs

//! 重连策略：决定一次关闭之后是否重连，以及下一次重连前要等待多久。

use log::{info, warn};
use std::time::Duration;

/// 正常关闭。
pub const CLOSE_NORMAL: u16 = 1000;
/// 对端离开（例如页面关闭、服务下线）。
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// 未收到关闭帧的异常断开。
pub const CLOSE_ABNORMAL: u16 = 1006;

/// 退避延迟的上限。
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// 每次失败后延迟的放大倍数。
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// `next_attempt` 的决策结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// 等待 `delay` 后发起第 `attempt` 次重连。
    Retry { attempt: u32, delay: Duration },
    /// 次数已用尽，不再自动重连。
    Exhausted { attempts: u32, max_attempts: u32 },
}

/// 关闭码 1000 与 1001 表示有意的关闭，不重连；其余关闭码均视为可重试。
pub fn should_reconnect(close_code: u16) -> bool {
    !matches!(close_code, CLOSE_NORMAL | CLOSE_GOING_AWAY)
}

/// 第 `attempt` 次（从 1 开始）重连的延迟：`base * 1.5^(attempt-1)`，封顶 30 秒。
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let millis = base.as_millis() as f64 * BACKOFF_MULTIPLIER.powi(exponent);
    let capped = millis.min(MAX_RECONNECT_DELAY.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

/// 一个逻辑会话内的重连状态。
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempts: u32,
    max_attempts: u32,
    base_delay: Duration,
    current_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { attempts: 0, max_attempts, base_delay, current_delay: Duration::ZERO }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 最近一次计算出的延迟，尚未发生重连时为零。
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// 计算下一次重连。次数未用尽时计数加一并返回对应延迟。
    pub fn next_attempt(&mut self) -> ReconnectDecision {
        if self.attempts >= self.max_attempts {
            warn!("[重连策略] 已达到最大重连次数 ({})，停止自动重连", self.max_attempts);
            return ReconnectDecision::Exhausted {
                attempts: self.attempts,
                max_attempts: self.max_attempts,
            };
        }
        self.attempts += 1;
        self.current_delay = backoff_delay(self.base_delay, self.attempts);
        info!(
            "[重连策略] 第 {}/{} 次重连将在 {}ms 后进行",
            self.attempts,
            self.max_attempts,
            self.current_delay.as_millis()
        );
        ReconnectDecision::Retry { attempt: self.attempts, delay: self.current_delay }
    }

    /// 连接成功打开、显式重连或显式关闭时清零。
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intentional_close_codes_suppress_reconnect() {
        assert!(!should_reconnect(CLOSE_NORMAL));
        assert!(!should_reconnect(CLOSE_GOING_AWAY));
        for code in [CLOSE_ABNORMAL, 1002, 1008, 1011, 4000] {
            assert!(should_reconnect(code), "关闭码 {} 应触发重连", code);
        }
    }

    #[test]
    fn test_backoff_follows_multiplier_and_cap() {
        let base = Duration::from_millis(3000);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(3000));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(4500));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(6750));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(10125));
        assert_eq!(backoff_delay(base, 10), MAX_RECONNECT_DELAY);
    }

    #[test]
    fn test_consecutive_attempts_are_non_decreasing_until_exhausted() {
        let mut policy = ReconnectPolicy::new(8, Duration::from_millis(3000));
        let mut last = Duration::ZERO;
        for expected_attempt in 1..=8 {
            match policy.next_attempt() {
                ReconnectDecision::Retry { attempt, delay } => {
                    assert_eq!(attempt, expected_attempt);
                    assert!(delay >= last);
                    assert!(delay <= MAX_RECONNECT_DELAY);
                    last = delay;
                }
                other => panic!("第 {} 次不应耗尽: {:?}", expected_attempt, other),
            }
        }
        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::Exhausted { attempts: 8, max_attempts: 8 }
        );
        // 耗尽后计数不再增长
        assert_eq!(policy.attempts(), 8);
    }

    #[test]
    fn test_reset_restarts_backoff_from_base() {
        let mut policy = ReconnectPolicy::new(5, Duration::from_millis(100));
        policy.next_attempt();
        policy.next_attempt();
        assert_eq!(policy.current_delay(), Duration::from_millis(150));

        policy.reset();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::Retry { attempt: 1, delay: Duration::from_millis(100) }
        );
    }

    #[test]
    fn test_zero_max_attempts_never_retries() {
        let mut policy = ReconnectPolicy::new(0, Duration::from_millis(100));
        assert_eq!(
            policy.next_attempt(),
            ReconnectDecision::Exhausted { attempts: 0, max_attempts: 0 }
        );
    }
}
