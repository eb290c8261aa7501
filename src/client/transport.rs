// resilient_ws_client/src/client/transport.rs

//! 客户端 WebSocket 传输层。
//!
//! 本模块把 `tokio-tungstenite` 的连接封装成两样东西：
//! - `ClientConnection`：一个只能写入文本帧 / 关闭帧的句柄（实现 `FrameSink`）；
//! - 一个后台会话任务：负责握手、把写入句柄送来的帧写到 socket，
//!   并把读到的内容翻译成 `TransportEvent` 交给上层的单一事件循环。
//!
//! 每个连接都带有一个代号 (generation)。上层在重连后只处理最新代号的事件，
//! 被替换掉的连接产生的事件一律丢弃。

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::protocol::{CloseFrame, Message},
    tungstenite::Error as TungsteniteError,
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

use crate::client::reconnect::CLOSE_ABNORMAL;
use crate::error::WsError;

/// 收到不带状态码的关闭帧时使用的关闭码。
pub const CLOSE_NO_STATUS: u16 = 1005;

/// 一个可能经过 TLS 加密的 TCP WebSocket 流。
pub type ClientWsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 向当前连接写帧的抽象。写入是非阻塞的：成功只表示帧已交给连接的发送通道。
pub trait FrameSink: Send {
    fn send_text(&mut self, text: String) -> Result<(), WsError>;
    fn close(&mut self, code: u16, reason: &str) -> Result<(), WsError>;
}

/// 底层连接上发生的事情。
#[derive(Debug)]
pub enum TransportEventKind {
    Opened(ClientConnection),
    Text(String),
    Error(String),
    Closed { code: u16, reason: Option<String> },
}

/// 带代号的传输事件。
#[derive(Debug)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

/// 一个活动连接的写入端。丢弃它会让会话任务发送关闭帧并结束。
#[derive(Debug)]
pub struct ClientConnection {
    ws_tx: mpsc::UnboundedSender<Message>,
}

impl FrameSink for ClientConnection {
    fn send_text(&mut self, text: String) -> Result<(), WsError> {
        debug!("[传输层] 写入文本帧: {}", text);
        self.ws_tx.send(Message::Text(text)).map_err(|_| WsError::SendErrorClosed)
    }

    fn close(&mut self, code: u16, reason: &str) -> Result<(), WsError> {
        info!("[传输层] 请求关闭连接，关闭码: {}, 原因: '{}'", code, reason);
        let frame = CloseFrame { code: CloseCode::from(code), reason: Cow::Owned(reason.to_string()) };
        self.ws_tx.send(Message::Close(Some(frame))).map_err(|_| WsError::SendErrorClosed)
    }
}

/// 解析并校验目标 URL，只接受 `ws` 与 `wss`。
pub fn validate_url(url_str: &str) -> Result<Url, WsError> {
    let url = Url::parse(url_str)
        .map_err(|e| WsError::InvalidUrl(format!("无效的 WebSocket URL '{}': {}", url_str, e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(WsError::InvalidUrl(format!(
            "不支持的协议 '{}'，WebSocket URL 必须以 ws:// 或 wss:// 开头",
            other
        ))),
    }
}

/// 在后台发起一次连接，并在连接存续期间持续上报事件。
///
/// 握手失败时依次上报 `Error` 与 `Closed { code: 1006 }`，与连接中途断开的表现一致。
pub fn spawn_connection(
    url: Url,
    generation: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let emit = |kind: TransportEventKind| {
            // 事件循环已退出时无需再上报
            let _ = events.send(TransportEvent { generation, kind });
        };

        info!("[传输层] 开始连接 {} (代号 {})", url, generation);
        let ws_stream = match connect_async(url.as_str()).await {
            Ok((ws_stream, response)) => {
                info!("[传输层] 已连接到 {} (HTTP 状态码: {})", url, response.status());
                debug!("[传输层] 握手响应头: {:?}", response.headers());
                ws_stream
            }
            Err(e) => {
                error!("[传输层] 连接到 {} 失败: {}", url, e);
                emit(TransportEventKind::Error(e.to_string()));
                emit(TransportEventKind::Closed { code: CLOSE_ABNORMAL, reason: Some(e.to_string()) });
                return;
            }
        };

        let (ws_tx, ws_rx) = mpsc::unbounded_channel();
        emit(TransportEventKind::Opened(ClientConnection { ws_tx }));
        let (code, reason) = run_connection(ws_stream, ws_rx, &emit).await;
        emit(TransportEventKind::Closed { code, reason });
        debug!("[传输层] 连接会话结束 (代号 {})", generation);
    })
}

/// 连接的主循环：转发写入端送来的帧，翻译读到的帧。返回最终的关闭码与原因。
async fn run_connection<F>(
    ws_stream: ClientWsStream,
    mut ws_rx: mpsc::UnboundedReceiver<Message>,
    emit: &F,
) -> (u16, Option<String>)
where
    F: Fn(TransportEventKind),
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut close_frame: Option<(u16, Option<String>)> = None;

    loop {
        tokio::select! {
            outbound = ws_rx.recv() => match outbound {
                Some(message) => {
                    if let Err(e) = ws_sender.send(message).await {
                        error!("[传输层] 写入帧失败: {}", e);
                        emit(TransportEventKind::Error(e.to_string()));
                    }
                }
                None => {
                    // 写入句柄已被丢弃，说明该连接已被替换
                    debug!("[传输层] 写入句柄已释放，关闭被替换的连接");
                    let _ = ws_sender.close().await;
                    return (CLOSE_ABNORMAL, Some("connection superseded".to_string()));
                }
            },
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => emit(TransportEventKind::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    debug!("[传输层] 收到关闭帧: {:?}", frame);
                    close_frame = Some(match frame {
                        Some(f) => {
                            let reason = (!f.reason.is_empty()).then(|| f.reason.to_string());
                            (u16::from(f.code), reason)
                        }
                        None => (CLOSE_NO_STATUS, None),
                    });
                }
                Some(Ok(Message::Binary(bin))) => {
                    debug!("[传输层] 忽略二进制帧，长度: {} 字节", bin.len());
                }
                Some(Ok(other)) => {
                    // Ping/Pong 控制帧由 tungstenite 自动处理
                    debug!("[传输层] 收到控制帧: {:?}", other);
                }
                Some(Err(TungsteniteError::ConnectionClosed | TungsteniteError::AlreadyClosed)) | None => {
                    return close_frame.unwrap_or((CLOSE_ABNORMAL, None));
                }
                Some(Err(e)) => {
                    error!("[传输层] 读取帧时发生错误: {}", e);
                    emit(TransportEventKind::Error(e.to_string()));
                    return close_frame.unwrap_or((CLOSE_ABNORMAL, None));
                }
            },
        }
    }
}
