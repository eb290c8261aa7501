// resilient_ws_client/src/client/service.rs

//! 传输客户端服务：对外的 `TransportClient` 句柄与其背后的事件循环。
//!
//! 所有可变状态都归一个后台任务所有。socket 事件、保活定时、重连等待与应用调用
//! 都被串行地送进同一个 `select!` 循环，一次只处理一件事，因此处理器之间、
//! 处理器与连接状态之间不会并发执行，也不需要任何锁。
//!
//! `TransportClient` 可以随意克隆；注册处理器是非阻塞的，需要结果的操作（发送、
//! 查询状态、关闭等）是 `async` 的。所有句柄都被丢弃后，事件循环会关闭连接并退出。

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use url::Url;

use crate::client::dispatch::{
    ErrorHandler, LifecycleEvent, LifecycleHandler, LifecycleKind, MessageHandler,
};
use crate::client::keepalive::Keepalive;
use crate::client::reconnect::CLOSE_NORMAL;
use crate::client::session::{ClientSession, Delivery};
use crate::client::state::ClientState;
use crate::client::transport::{spawn_connection, TransportEvent, TransportEventKind};
use crate::config::ClientConfig;
use crate::error::{ErrorCategory, ErrorEvent, WsError};
use crate::message::{augment_envelope, Envelope};

enum Command {
    On(String, MessageHandler),
    OnAny(MessageHandler),
    OnError(Option<ErrorCategory>, ErrorHandler),
    OnLifecycle(LifecycleKind, LifecycleHandler),
    Send { payload: Value, reply: oneshot::Sender<Delivery> },
    SendImmediately { payload: Value, reply: oneshot::Sender<bool> },
    ReportUnserializable(String),
    State(oneshot::Sender<ClientState>),
    QueueSize(oneshot::Sender<usize>),
    ClearQueue(oneshot::Sender<usize>),
    Close { code: u16, reason: String, done: oneshot::Sender<()> },
    Reconnect { url: Option<String>, done: oneshot::Sender<()> },
    Destroy(oneshot::Sender<()>),
}

/// 弹性 WebSocket 传输客户端的句柄。
#[derive(Clone, Debug)]
pub struct TransportClient {
    commands: mpsc::UnboundedSender<Command>,
}

impl TransportClient {
    /// 创建客户端并立即发起首次连接。必须在 tokio 运行时中调用。
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Self {
        let url = url.into();
        info!("[传输客户端] 正在初始化，目标 URL: {}", url);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let actor = ClientActor {
            session: ClientSession::new(url, &config),
            keepalive: Keepalive::new(config.enable_ping, config.ping_interval()),
            commands: commands_rx,
            events_tx,
            events_rx,
            generation: 0,
            connection_task: None,
            handshake_pending: false,
            reconnect_timer: None,
        };
        tokio::spawn(actor.run());
        Self { commands: commands_tx }
    }

    /// 使用配置文件中的 URL 创建客户端。
    pub fn from_config(config: ClientConfig) -> Result<Self, WsError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| WsError::InvalidUrl("配置中缺少 url".to_string()))?;
        Ok(Self::new(url, config))
    }

    fn submit(&self, command: Command) -> Result<(), WsError> {
        self.commands.send(command).map_err(|_| WsError::ClientStopped)
    }

    fn register(&self, command: Command) -> &Self {
        if self.submit(command).is_err() {
            warn!("[传输客户端] 客户端任务已停止，处理器注册被忽略");
        }
        self
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, WsError> {
        let (tx, rx) = oneshot::channel();
        self.submit(build(tx))?;
        rx.await.map_err(|_| WsError::ClientStopped)
    }

    /// 为精确消息类型注册处理器，同一类型后注册的覆盖先注册的。
    pub fn on<F>(&self, message_type: impl Into<String>, handler: F) -> &Self
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        self.register(Command::On(message_type.into(), Box::new(handler)))
    }

    /// 注册通配消息处理器，只接收没有精确处理器的消息。
    pub fn on_any<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&Envelope) + Send + 'static,
    {
        self.register(Command::OnAny(Box::new(handler)))
    }

    /// 为某个错误分类追加处理器。
    pub fn on_error<F>(&self, category: ErrorCategory, handler: F) -> &Self
    where
        F: FnMut(&ErrorEvent) + Send + 'static,
    {
        self.register(Command::OnError(Some(category), Box::new(handler)))
    }

    /// 追加一个接收所有错误分类的处理器。
    pub fn on_any_error<F>(&self, handler: F) -> &Self
    where
        F: FnMut(&ErrorEvent) + Send + 'static,
    {
        self.register(Command::OnError(None, Box::new(handler)))
    }

    pub fn on_open<F>(&self, mut handler: F) -> &Self
    where
        F: FnMut() + Send + 'static,
    {
        self.register(Command::OnLifecycle(
            LifecycleKind::Open,
            Box::new(move |_| handler()),
        ))
    }

    pub fn on_close<F>(&self, mut handler: F) -> &Self
    where
        F: FnMut(u16, &str) + Send + 'static,
    {
        self.register(Command::OnLifecycle(
            LifecycleKind::Close,
            Box::new(move |event| {
                if let LifecycleEvent::Close { code, reason } = event {
                    handler(*code, reason);
                }
            }),
        ))
    }

    pub fn on_unhandled<F>(&self, mut handler: F) -> &Self
    where
        F: FnMut(&str, &Value) + Send + 'static,
    {
        self.register(Command::OnLifecycle(
            LifecycleKind::Unhandled,
            Box::new(move |event| {
                if let LifecycleEvent::Unhandled { message_type, data } = event {
                    handler(message_type, data);
                }
            }),
        ))
    }

    /// 发送载荷：已连接时立即发送，否则排队并返回延迟结果。
    ///
    /// 载荷无法转换为 JSON 时不会排队，而是发出 `send_error` 并返回 `Immediate(false)`。
    pub async fn send<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Delivery, WsError> {
        match serde_json::to_value(payload) {
            Ok(payload) => self.request(|reply| Command::Send { payload, reply }).await,
            Err(e) => {
                self.submit(Command::ReportUnserializable(e.to_string()))?;
                Ok(Delivery::Immediate(false))
            }
        }
    }

    /// 不排队的发送，未连接或失败时返回 `false`。
    pub async fn send_immediately<T: Serialize + ?Sized>(&self, payload: &T) -> Result<bool, WsError> {
        match serde_json::to_value(payload) {
            Ok(payload) => self.request(|reply| Command::SendImmediately { payload, reply }).await,
            Err(e) => {
                self.submit(Command::ReportUnserializable(e.to_string()))?;
                Ok(false)
            }
        }
    }

    /// 补齐 `type`、`timestamp`、`messageId` 后发送。
    pub async fn send_safe(&self, message_type: &str, payload: Value) -> Result<Delivery, WsError> {
        let envelope = augment_envelope(message_type, payload);
        self.request(|reply| Command::Send { payload: envelope, reply }).await
    }

    pub async fn state(&self) -> Result<ClientState, WsError> {
        self.request(Command::State).await
    }

    pub async fn queue_size(&self) -> Result<usize, WsError> {
        self.request(Command::QueueSize).await
    }

    /// 丢弃所有排队消息，返回丢弃的数量。
    pub async fn clear_queue(&self) -> Result<usize, WsError> {
        self.request(Command::ClearQueue).await
    }

    /// 显式关闭：停止保活、取消挂起的重连、拒绝所有排队消息。
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), WsError> {
        let reason = reason.to_string();
        self.request(|done| Command::Close { code, reason, done }).await
    }

    /// 以正常关闭码 (1000) 和空原因关闭。
    pub async fn close_normal(&self) -> Result<(), WsError> {
        self.close(CLOSE_NORMAL, "").await
    }

    /// 关闭当前连接并重新连接，可选地切换到新的 URL。
    pub async fn reconnect(&self, url: Option<&str>) -> Result<(), WsError> {
        let url = url.map(str::to_string);
        self.request(|done| Command::Reconnect { url, done }).await
    }

    /// 关闭连接并清空所有处理器。
    pub async fn destroy(&self) -> Result<(), WsError> {
        self.request(Command::Destroy).await
    }
}

/// 后台事件循环持有的全部状态。
struct ClientActor {
    session: ClientSession,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    generation: u64,
    connection_task: Option<JoinHandle<()>>,
    handshake_pending: bool,
    keepalive: Keepalive,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
}

impl ClientActor {
    async fn run(mut self) {
        let url = self.session.begin_connect();
        self.start_connection(url);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = self.keepalive.tick() => self.session.keepalive_tick(),
                _ = wait_for_timer(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    let url = self.session.on_reconnect_timer();
                    self.start_connection(url);
                }
            }
        }

        info!("[传输客户端] 所有句柄均已释放，关闭客户端");
        self.teardown(true);
    }

    /// 以新代号启动连接；旧连接若仍在握手则直接中止，已打开的旧连接随写入句柄释放而关闭。
    fn start_connection(&mut self, url: Option<Url>) {
        self.supersede_connection();
        let Some(url) = url else {
            return;
        };
        self.generation += 1;
        self.handshake_pending = true;
        self.connection_task = Some(spawn_connection(url, self.generation, self.events_tx.clone()));
    }

    fn supersede_connection(&mut self) {
        if let Some(task) = self.connection_task.take() {
            if self.handshake_pending {
                debug!("[传输客户端] 中止仍在握手的连接 (代号 {})", self.generation);
                task.abort();
            }
        }
        if self.handshake_pending {
            // 使已在通道中的旧事件失效
            self.generation += 1;
            self.handshake_pending = false;
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        if event.generation != self.generation {
            debug!("[传输客户端] 丢弃被替换连接 (代号 {}) 的事件", event.generation);
            return;
        }
        match event.kind {
            TransportEventKind::Opened(connection) => {
                self.handshake_pending = false;
                self.session.handle_open(Box::new(connection));
            }
            TransportEventKind::Text(text) => self.session.handle_text(&text),
            TransportEventKind::Error(detail) => self.session.handle_transport_error(&detail),
            TransportEventKind::Closed { code, reason } => {
                self.handshake_pending = false;
                self.connection_task = None;
                if let Some(delay) = self.session.handle_close(code, reason) {
                    // 新的等待总是替换旧的等待
                    self.reconnect_timer = Some(Box::pin(sleep(delay)));
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::On(message_type, handler) => {
                self.session.handlers_mut().on(message_type, handler);
            }
            Command::OnAny(handler) => {
                self.session.handlers_mut().on_any(handler);
            }
            Command::OnError(category, handler) => self.session.handlers_mut().on_error(category, handler),
            Command::OnLifecycle(kind, handler) => {
                self.session.handlers_mut().on_lifecycle(kind, handler);
            }
            Command::Send { payload, reply } => {
                let _ = reply.send(self.session.send(payload));
            }
            Command::SendImmediately { payload, reply } => {
                let _ = reply.send(self.session.send_immediately(&payload));
            }
            Command::ReportUnserializable(detail) => self.session.report_unserializable(detail),
            Command::State(reply) => {
                let _ = reply.send(self.session.state());
            }
            Command::QueueSize(reply) => {
                let _ = reply.send(self.session.queue_size());
            }
            Command::ClearQueue(reply) => {
                let _ = reply.send(self.session.clear_queue());
            }
            Command::Close { code, reason, done } => {
                self.session.close(code, &reason);
                self.teardown(false);
                let _ = done.send(());
            }
            Command::Reconnect { url, done } => {
                self.reconnect_timer = None;
                // 保活定时器保持原样：显式关闭后的重连不会恢复 ping
                let url = self.session.reconnect(url);
                self.start_connection(url);
                let _ = done.send(());
            }
            Command::Destroy(done) => {
                self.teardown(true);
                let _ = done.send(());
            }
        }
    }

    /// 唯一的取消点：停止保活、取消挂起的重连、中止仍在握手的连接。
    fn teardown(&mut self, destroy: bool) {
        if destroy {
            self.session.destroy();
        }
        self.keepalive.stop();
        if self.reconnect_timer.take().is_some() {
            debug!("[传输客户端] 已取消挂起的重连");
        }
        if self.handshake_pending {
            self.supersede_connection();
        }
    }
}

async fn wait_for_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending::<()>().await,
    }
}
