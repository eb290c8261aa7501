// resilient_ws_client/src/error.rs

//! 定义传输客户端使用的错误类型。
//!
//! - `WsError`：库内可失败函数统一返回的错误类型。
//! - `SendFailure`：排队消息的延迟结果被拒绝时携带的错误（附带原始载荷）。
//! - `ErrorCategory` / `ErrorEvent`：通过错误处理器分发的错误事件，
//!   它们不会作为 `Err` 返回给公共操作的调用方。

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// 传输客户端的统一错误类型。
#[derive(Error, Debug)]
pub enum WsError {
    /// 当收到的文本帧无法解析为合法信封时返回。
    #[error("反序列化错误: {0}")]
    DeserializationError(String),

    /// 当尝试向已关闭的写入通道发送帧时发生。
    #[error("发送错误: 通道已关闭")]
    SendErrorClosed,

    /// 无效的 URL 格式或不支持的协议。
    #[error("无效的URL: {0}")]
    InvalidUrl(String),

    /// 客户端后台任务已经结束，句柄无法再与之通信。
    #[error("客户端任务已停止")]
    ClientStopped,
}

/// 排队消息被拒绝的原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// 连续多次冲刷均发送失败。
    RetriesExhausted { attempts: u32 },
    /// 客户端被显式关闭，队列被清空。
    ConnectionClosed { code: u16, reason: String },
    /// 调用方通过 `clear_queue` 丢弃了该消息。
    QueueCleared,
    /// 客户端后台任务在结算前已退出。
    ClientDropped,
}

/// 排队发送的失败结果，携带原始载荷以便调用方重试或记录。
#[derive(Error, Debug, Clone, PartialEq)]
#[error("消息发送失败: {reason:?}")]
pub struct SendFailure {
    pub reason: FailureReason,
    pub payload: Value,
}

/// 错误事件的分类。每个分类可以注册任意多个处理器，另有一个通配分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    ConnectError,
    ParseError,
    WsError,
    WsClose,
    SendError,
    MaxReconnectAttempts,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ConnectError => "connect_error",
            ErrorCategory::ParseError => "parse_error",
            ErrorCategory::WsError => "ws_error",
            ErrorCategory::WsClose => "ws_close",
            ErrorCategory::SendError => "send_error",
            ErrorCategory::MaxReconnectAttempts => "max_reconnect_attempts",
        }
    }
}

/// 分发给错误处理器的事件。
///
/// 序列化后的形状为 `{ "type": "<分类>", ...详情 }`，便于直接转发给日志或前端。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorEvent {
    /// 创建底层连接失败（例如 URL 非法）。
    ConnectError { error: String },
    /// 入站帧不是合法信封。
    ParseError {
        error: String,
        #[serde(rename = "rawData")]
        raw_data: String,
    },
    /// 底层传输报告的错误，本身不关闭连接。
    WsError { error: String },
    /// 每一次关闭都会产生，无论是否正常。
    WsClose { code: u16, reason: String },
    /// 某条载荷序列化或写入失败。
    SendError { error: String, data: Value },
    /// 重连退避已用尽。
    MaxReconnectAttempts {
        attempts: u32,
        #[serde(rename = "maxAttempts")]
        max_attempts: u32,
    },
}

impl ErrorEvent {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorEvent::ConnectError { .. } => ErrorCategory::ConnectError,
            ErrorEvent::ParseError { .. } => ErrorCategory::ParseError,
            ErrorEvent::WsError { .. } => ErrorCategory::WsError,
            ErrorEvent::WsClose { .. } => ErrorCategory::WsClose,
            ErrorEvent::SendError { .. } => ErrorCategory::SendError,
            ErrorEvent::MaxReconnectAttempts { .. } => ErrorCategory::MaxReconnectAttempts,
        }
    }
}
