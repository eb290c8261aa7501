//! `resilient_ws_client` 是一个面向长连接场景的弹性 WebSocket 客户端。
//!
//! 它在单条 WebSocket 连接之上提供：
//! - 以 `type` 字段路由的 JSON 信封消息，以及精确类型 / 通配两级处理器；
//! - 未连接期间的出站消息队列，连接打开后按 FIFO 顺序冲刷，每条消息最多尝试 3 次；
//! - 非正常断开后的指数退避自动重连（上限 30 秒）；
//! - 基于 `__ping__` / `__pong__` 文本哨兵的应用层保活；
//! - 按分类注册、可叠加的错误事件处理器。
//!
//! 主要模块包括：
//! - `client`: 客户端句柄 `TransportClient` 及其内部组件。
//! - `config`: 客户端配置 `ClientConfig`，支持从 JSON 文件加载。
//! - `error`: 错误类型 `WsError`、`SendFailure` 与错误事件 `ErrorEvent`。
//! - `message`: 信封结构、保活哨兵与出站信封补全。

pub mod client;
pub mod config;
pub mod error;
pub mod message;

pub use client::{ClientState, ConnectionState, Delivery, PendingSend, SendReceipt, TransportClient};
pub use config::ClientConfig;
pub use error::{ErrorCategory, ErrorEvent, FailureReason, SendFailure, WsError};
pub use message::Envelope;
