// resilient_ws_client/src/config.rs

//! 传输客户端的配置管理模块。
//!
//! 配置项与 JSON 配置文件中的键一一对应（camelCase），所有字段都有默认值，
//! 因此配置文件只需写出需要覆盖的部分。时间类配置统一以毫秒为单位。

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// 默认最大自动重连次数。
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
/// 默认重连退避基准延迟（毫秒）。
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
/// 默认保活间隔（毫秒）。
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;

/// 传输客户端配置。
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// 可选的目标 URL，主要供探针程序从配置文件读取。
    pub url: Option<String>,
    /// 自动重连的最大次数，0 表示从不自动重连。
    pub max_reconnect_attempts: u32,
    /// 退避基准延迟（毫秒）。
    #[serde(rename = "reconnectDelay")]
    pub reconnect_delay_ms: u64,
    /// 异常关闭后是否自动重连。
    pub auto_reconnect: bool,
    /// 是否启用保活定时器。
    pub enable_ping: bool,
    /// 保活间隔（毫秒）。
    #[serde(rename = "pingInterval")]
    pub ping_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            auto_reconnect: true,
            enable_ping: true,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
        }
    }
}

impl ClientConfig {
    /// 从 JSON 配置文件加载配置，缺失的键使用默认值。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 '{}'，请检查路径与权限。", path.display()))?;
        let config: ClientConfig = serde_json::from_str(&raw).with_context(|| {
            format!("解析配置文件 '{}' 失败，请确认内容为合法的 JSON。", path.display())
        })?;
        log::info!(
            "[客户端配置] 已从 '{}' 加载配置: 最大重连 {} 次, 基准延迟 {}ms, 保活 {} ({}ms)",
            path.display(),
            config.max_reconnect_attempts,
            config.reconnect_delay_ms,
            config.enable_ping,
            config.ping_interval_ms
        );
        Ok(config)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_ping(mut self, enabled: bool, interval: Duration) -> Self {
        self.enable_ping = enabled;
        self.ping_interval_ms = interval.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay(), Duration::from_millis(3000));
        assert!(config.auto_reconnect);
        assert!(config.enable_ping);
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("创建临时文件失败");
        write!(file, r#"{{ "url": "ws://127.0.0.1:9000/ws", "reconnectDelay": 500, "enablePing": false }}"#).unwrap();

        let config = ClientConfig::load(file.path()).expect("加载配置失败");
        assert_eq!(config.url.as_deref(), Some("ws://127.0.0.1:9000/ws"));
        assert_eq!(config.reconnect_delay_ms, 500);
        assert!(!config.enable_ping);
        assert_eq!(config.max_reconnect_attempts, DEFAULT_MAX_RECONNECT_ATTEMPTS);
        assert_eq!(config.ping_interval_ms, DEFAULT_PING_INTERVAL_MS);
    }

    #[test]
    fn test_load_reports_missing_and_malformed_files() {
        let missing = ClientConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(format!("{:#}", missing).contains("无法读取配置文件"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let malformed = ClientConfig::load(file.path()).unwrap_err();
        assert!(format!("{:#}", malformed).contains("解析配置文件"));
    }
}
