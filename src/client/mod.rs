// resilient_ws_client/src/client/mod.rs

//! WebSocket 客户端模块。
//!
//! 子模块分工：
//! - `transport`: 封装 `tokio-tungstenite` 连接，把 socket 上发生的事情翻译成事件；
//! - `session`: 同步状态机，负责状态流转、队列冲刷、分发与重连决策；
//! - `service`: 对外的 `TransportClient` 句柄以及驱动状态机的后台事件循环；
//! - `queue` / `reconnect` / `keepalive` / `dispatch` / `state`: 状态机使用的组成部分。

pub mod dispatch;
pub mod keepalive;
pub mod queue;
pub mod reconnect;
pub mod service;
pub mod session;
pub mod state;
pub mod transport;

pub use dispatch::{DispatchOutcome, HandlerRegistry, LifecycleEvent, LifecycleKind};
pub use queue::{PendingSend, SendReceipt, SendResult, MAX_SEND_ATTEMPTS};
pub use service::TransportClient;
pub use session::{Delivery, DEFAULT_CLOSE_REASON};
pub use state::{ClientState, ConnectionState};
