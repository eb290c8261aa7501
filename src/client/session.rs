// resilient_ws_client/src/client/session.rs

//! 传输客户端的同步状态机。
//!
//! `ClientSession` 持有连接状态、出站队列、处理器注册表与重连策略，
//! 由外层事件循环把 socket 事件与应用调用逐个喂进来。它本身不做任何 I/O 等待：
//! 需要定时的动作（例如重连）以返回值的形式交给外层去调度。

use log::{debug, error, info, warn};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::client::dispatch::{HandlerRegistry, LifecycleEvent};
use crate::client::queue::{OutboundQueue, PendingSend};
use crate::client::reconnect::{should_reconnect, ReconnectDecision, ReconnectPolicy, CLOSE_NORMAL};
use crate::client::state::{ClientState, ConnectionState};
use crate::client::transport::{validate_url, FrameSink};
use crate::config::ClientConfig;
use crate::error::{ErrorEvent, FailureReason};
use crate::message::{classify_frame, InboundFrame, PING_FRAME, PONG_FRAME};

/// 关闭信号未携带原因时使用的描述。
pub const DEFAULT_CLOSE_REASON: &str = "Unknown reason";
/// `reconnect()` 关闭旧连接时使用的原因。
pub const RECONNECT_REASON: &str = "Reconnecting";

/// `send` 的结果：已打开时立即得到成败，否则得到排队消息的延迟结果。
#[derive(Debug)]
pub enum Delivery {
    Immediate(bool),
    Queued(PendingSend),
}

impl Delivery {
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued(_))
    }
}

pub struct ClientSession {
    url: String,
    state: ConnectionState,
    connection: Option<Box<dyn FrameSink>>,
    queue: OutboundQueue,
    handlers: HandlerRegistry,
    reconnect: ReconnectPolicy,
    auto_reconnect: bool,
    configured_auto_reconnect: bool,
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("queue_size", &self.queue.len())
            .field("reconnect", &self.reconnect)
            .field("auto_reconnect", &self.auto_reconnect)
            .finish()
    }
}

impl ClientSession {
    /// 新会话处于 Connecting 状态，外层应随即调用 `begin_connect`。
    pub fn new(url: impl Into<String>, config: &ClientConfig) -> Self {
        Self {
            url: url.into(),
            state: ConnectionState::Connecting,
            connection: None,
            queue: OutboundQueue::new(),
            handlers: HandlerRegistry::new(),
            reconnect: ReconnectPolicy::new(config.max_reconnect_attempts, config.reconnect_delay()),
            auto_reconnect: config.auto_reconnect,
            configured_auto_reconnect: config.auto_reconnect,
        }
    }

    pub fn handlers_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.handlers
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn state(&self) -> ClientState {
        ClientState {
            code: self.state.code(),
            text: self.state.text().to_string(),
            queue_size: self.queue.len(),
            reconnect_attempts: self.reconnect.attempts(),
            url: self.url.clone(),
        }
    }

    /// 进入 Connecting 状态并返回要连接的 URL。
    ///
    /// URL 非法时发出 `connect_error`，保持 Closed，且不安排重连。
    pub fn begin_connect(&mut self) -> Option<Url> {
        self.connection = None;
        match validate_url(&self.url) {
            Ok(url) => {
                info!("[传输客户端] 正在连接 {}", url);
                self.state = ConnectionState::Connecting;
                Some(url)
            }
            Err(e) => {
                error!("[传输客户端] 创建连接失败: {}", e);
                self.state = ConnectionState::Closed;
                self.handlers.emit_error(&ErrorEvent::ConnectError { error: e.to_string() });
                None
            }
        }
    }

    /// 底层连接已打开：重置重连计数、冲刷队列、发出 `open` 事件。
    pub fn handle_open(&mut self, connection: Box<dyn FrameSink>) {
        info!("[传输客户端] WebSocket 连接已建立: {}", self.url);
        self.state = ConnectionState::Open;
        self.connection = Some(connection);
        self.reconnect.reset();
        self.flush_queue();
        self.handlers.emit_lifecycle(&LifecycleEvent::Open);
    }

    /// 处理一个入站文本帧。
    pub fn handle_text(&mut self, text: &str) {
        match classify_frame(text) {
            Ok(InboundFrame::Ping) => {
                debug!("[传输客户端] 收到保活 ping，回复 pong");
                self.write_raw(PONG_FRAME);
            }
            Ok(InboundFrame::Pong) => debug!("[传输客户端] 收到保活 pong"),
            Ok(InboundFrame::Envelope(envelope)) => {
                debug!("[传输客户端] 收到消息，类型: {}", envelope.message_type);
                self.handlers.dispatch(&envelope);
            }
            Err(e) => {
                warn!("[传输客户端] 入站消息解析失败: {}，原始数据: {}", e, text);
                self.handlers.emit_error(&ErrorEvent::ParseError {
                    error: e.to_string(),
                    raw_data: text.to_string(),
                });
            }
        }
    }

    /// 传输层报告错误。不改变状态，关闭（如果有）会以单独的关闭信号到达。
    pub fn handle_transport_error(&mut self, detail: &str) {
        error!("[传输客户端] WebSocket 错误: {}", detail);
        self.handlers.emit_error(&ErrorEvent::WsError { error: detail.to_string() });
    }

    /// 底层连接已关闭。返回 `Some(delay)` 表示外层应在 `delay` 后调用 `on_reconnect_timer`。
    pub fn handle_close(&mut self, code: u16, reason: Option<String>) -> Option<Duration> {
        let reason = reason
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CLOSE_REASON.to_string());
        info!("[传输客户端] WebSocket 已关闭，关闭码: {}, 原因: {}", code, reason);

        self.state = ConnectionState::Closed;
        self.connection = None;
        self.handlers.emit_lifecycle(&LifecycleEvent::Close { code, reason: reason.clone() });
        self.handlers.emit_error(&ErrorEvent::WsClose { code, reason });

        if !(self.auto_reconnect && should_reconnect(code)) {
            return None;
        }
        match self.reconnect.next_attempt() {
            ReconnectDecision::Retry { delay, .. } => Some(delay),
            ReconnectDecision::Exhausted { attempts, max_attempts } => {
                error!("[传输客户端] 已达到最大重连次数 ({})", max_attempts);
                self.handlers
                    .emit_error(&ErrorEvent::MaxReconnectAttempts { attempts, max_attempts });
                None
            }
        }
    }

    /// 重连等待结束。连接仍未打开（也不在连接中）时才真正发起连接。
    pub fn on_reconnect_timer(&mut self) -> Option<Url> {
        match self.state {
            ConnectionState::Closed => {
                info!("[传输客户端] 重连等待结束，开始重连 ({}/{})", self.reconnect.attempts(), self.reconnect.max_attempts());
                self.begin_connect()
            }
            other => {
                debug!("[传输客户端] 重连等待结束时状态为 {}，跳过本次重连", other.text());
                None
            }
        }
    }

    /// 已打开时立即发送，否则入队。
    pub fn send(&mut self, payload: Value) -> Delivery {
        if self.state.is_open() && self.connection.is_some() {
            return Delivery::Immediate(self.send_immediately(&payload));
        }
        info!(
            "[传输客户端] 连接未打开，消息加入队列: {}",
            payload.get("type").and_then(Value::as_str).unwrap_or("unknown")
        );
        Delivery::Queued(self.queue.enqueue(payload))
    }

    /// 不排队的发送。未打开、序列化失败或写入失败时返回 `false`，后两种情况还会发出 `send_error`。
    pub fn send_immediately(&mut self, payload: &Value) -> bool {
        if !self.state.is_open() {
            return false;
        }
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        let result = serde_json::to_string(payload)
            .map_err(|e| e.to_string())
            .and_then(|text| connection.send_text(text).map_err(|e| e.to_string()));
        match result {
            Ok(()) => true,
            Err(detail) => {
                error!("[传输客户端] 发送消息失败: {}", detail);
                self.handlers.emit_error(&ErrorEvent::SendError { error: detail, data: payload.clone() });
                false
            }
        }
    }

    /// 载荷无法转换为 JSON 值时由外层调用，报告为 `send_error`。
    pub fn report_unserializable(&mut self, detail: String) {
        error!("[传输客户端] 载荷序列化失败: {}", detail);
        self.handlers.emit_error(&ErrorEvent::SendError { error: detail, data: Value::Null });
    }

    /// 保活定时器触发：仅在 Open 时发送 ping。
    pub fn keepalive_tick(&mut self) {
        if self.state.is_open() {
            self.write_raw(PING_FRAME);
        }
    }

    /// 显式关闭：禁用自动重连、请求关闭底层连接、以 "connection closed" 拒绝所有排队消息。
    ///
    /// 保活定时器与挂起的重连等待由外层事件循环负责取消。
    pub fn close(&mut self, code: u16, reason: &str) {
        info!("[传输客户端] 显式关闭，关闭码: {}, 原因: '{}'", code, reason);
        self.auto_reconnect = false;
        self.reconnect.reset();

        if self.state.is_open() {
            if let Some(connection) = self.connection.as_mut() {
                if let Err(e) = connection.close(code, reason) {
                    warn!("[传输客户端] 请求关闭底层连接失败: {}", e);
                }
            }
            self.state = ConnectionState::Closing;
        } else if self.state == ConnectionState::Connecting {
            // 握手尚未完成，不会再有关闭信号到达
            self.connection = None;
            self.state = ConnectionState::Closed;
            self.handlers.emit_lifecycle(&LifecycleEvent::Close { code, reason: reason.to_string() });
            self.handlers.emit_error(&ErrorEvent::WsClose { code, reason: reason.to_string() });
        }

        self.queue.reject_all(FailureReason::ConnectionClosed { code, reason: reason.to_string() });
    }

    /// 显式重连：以中性关闭码关闭当前连接，可选地更换 URL，重置计数并重新连接。
    ///
    /// 旧连接的关闭信号会随代号更替被丢弃，因此 `close`/`ws_close` 在这里立即发出。
    pub fn reconnect(&mut self, url: Option<String>) -> Option<Url> {
        info!("[传输客户端] 开始显式重连...");
        let replaces_live = self.connection.is_some()
            && matches!(self.state, ConnectionState::Open | ConnectionState::Closing);
        self.close(CLOSE_NORMAL, RECONNECT_REASON);
        if replaces_live {
            self.state = ConnectionState::Closed;
            let reason = RECONNECT_REASON.to_string();
            self.handlers
                .emit_lifecycle(&LifecycleEvent::Close { code: CLOSE_NORMAL, reason: reason.clone() });
            self.handlers.emit_error(&ErrorEvent::WsClose { code: CLOSE_NORMAL, reason });
        }
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            self.url = url;
        }
        self.reconnect.reset();
        self.auto_reconnect = self.configured_auto_reconnect;
        self.begin_connect()
    }

    /// 丢弃所有排队消息（以 `QueueCleared` 拒绝），返回数量。
    pub fn clear_queue(&mut self) -> usize {
        self.queue.reject_all(FailureReason::QueueCleared)
    }

    /// 关闭并清空所有处理器。
    pub fn destroy(&mut self) {
        self.close(CLOSE_NORMAL, "");
        self.handlers.clear();
    }

    fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Self { queue, connection, handlers, .. } = self;
        let report = queue.flush(|payload| {
            let Some(connection) = connection.as_mut() else {
                return false;
            };
            let result = serde_json::to_string(payload)
                .map_err(|e| e.to_string())
                .and_then(|text| connection.send_text(text).map_err(|e| e.to_string()));
            match result {
                Ok(()) => true,
                Err(detail) => {
                    handlers.emit_error(&ErrorEvent::SendError { error: detail, data: payload.clone() });
                    false
                }
            }
        });
        info!(
            "[传输客户端] 队列冲刷完成: 发送 {} 条, 保留 {} 条, 放弃 {} 条",
            report.sent, report.retained, report.expired
        );
    }

    fn write_raw(&mut self, frame: &str) {
        if let Some(connection) = self.connection.as_mut() {
            if let Err(e) = connection.send_text(frame.to_string()) {
                warn!("[传输客户端] 发送保活帧 {} 失败: {}", frame, e);
            }
        }
    }
}
