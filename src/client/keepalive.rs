// resilient_ws_client/src/client/keepalive.rs

//! 保活定时器。
//!
//! 整个客户端生命周期只有一个定时器：构造时启动，`close`/`destroy` 时停止，
//! 无论自动重连还是显式 `reconnect()` 都不会重建它。
//! 连接不处于 Open 状态时，定时触发由调用方忽略即可。

use log::info;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

#[derive(Debug)]
pub struct Keepalive {
    interval: Option<Interval>,
    period: Duration,
}

impl Keepalive {
    /// 创建保活定时器，`enabled` 为 `false` 时定时器永不触发。
    ///
    /// 必须在 tokio 运行时上下文中调用。第一次触发发生在一个完整周期之后。
    pub fn new(enabled: bool, period: Duration) -> Self {
        let interval = (enabled && !period.is_zero()).then(|| {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        if interval.is_some() {
            info!("[保活] 保活定时器已启动，间隔: {}ms", period.as_millis());
        }
        Self { interval, period }
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    /// 停止定时器。返回 `true` 表示本次调用确实停止了一个运行中的定时器。
    pub fn stop(&mut self) -> bool {
        let was_active = self.interval.take().is_some();
        if was_active {
            info!("[保活] 保活定时器已停止 (间隔 {}ms)", self.period.as_millis());
        }
        was_active
    }

    /// 等待下一次触发；定时器已停止时永远挂起。
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}
