// resilient_ws_client/src/client/state.rs

//! 连接状态枚举与对外暴露的状态快照。

use serde::Serialize;

/// 当前连接所处的状态，与生命周期事件严格同步。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// 数值编码，沿用 WebSocket readyState 的约定 (0..=3)。
    pub fn code(&self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// `state()` 查询返回的快照。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub code: u8,
    pub text: String,
    pub queue_size: usize,
    pub reconnect_attempts: u32,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_codes_follow_ready_state() {
        let all = [
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ];
        for (expected, state) in all.iter().enumerate() {
            assert_eq!(state.code() as usize, expected);
        }
        assert!(ConnectionState::Open.is_open());
        assert_eq!(ConnectionState::Closing.text(), "CLOSING");
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let snapshot = ClientState {
            code: 1,
            text: "OPEN".into(),
            queue_size: 2,
            reconnect_attempts: 0,
            url: "ws://localhost".into(),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["queueSize"], 2);
        assert_eq!(value["reconnectAttempts"], 0);
    }
}
