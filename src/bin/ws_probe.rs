// resilient_ws_client/src/bin/ws_probe.rs

//! 命令行探针：连接到指定的 WebSocket 服务，打印收到的每一条信封消息。
//!
//! 用法：
//! - `ws_probe ws://127.0.0.1:8088/ws`
//! - `ws_probe --config probe_config.json`（URL 与其余选项均从配置文件读取）
//!
//! 连接建立后会发送一条 `hello` 消息，按 Ctrl-C 正常关闭连接并退出。

use anyhow::{bail, Context, Result};
use log::{error, info, warn, LevelFilter};
use serde_json::json;

use resilient_ws_client::{ClientConfig, Delivery, TransportClient};

fn parse_args() -> Result<ClientConfig> {
    let mut args = std::env::args().skip(1);
    match (args.next(), args.next()) {
        (Some(flag), Some(path)) if flag == "--config" => {
            let config = ClientConfig::load(&path)?;
            if config.url.is_none() {
                bail!("配置文件 '{}' 中缺少 url", path);
            }
            Ok(config)
        }
        (Some(url), None) if !url.starts_with("--") => Ok(ClientConfig { url: Some(url), ..ClientConfig::default() }),
        _ => bail!("用法: ws_probe <ws-url> | ws_probe --config <配置文件路径>"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("resilient_ws_client", LevelFilter::Debug)
        .parse_default_env()
        .try_init()
        .context("初始化 env_logger 日志服务失败")?;

    let config = parse_args()?;
    let client = TransportClient::from_config(config).context("创建传输客户端失败")?;
    info!("[探针] 客户端已创建，等待连接...");

    client
        .on_any(|envelope| info!("[探针] 收到消息 '{}': {}", envelope.message_type, envelope.data))
        .on_open(|| info!("[探针] 连接已打开"))
        .on_close(|code, reason| warn!("[探针] 连接已关闭，关闭码: {}, 原因: {}", code, reason))
        .on_any_error(|event| {
            let detail = serde_json::to_string(event).unwrap_or_else(|_| format!("{:?}", event));
            error!("[探针] 错误事件: {}", detail);
        });

    match client.send_safe("hello", json!({})).await? {
        Delivery::Immediate(sent) => info!("[探针] hello 已直接发送: {}", sent),
        Delivery::Queued(pending) => {
            let client = client.clone();
            tokio::spawn(async move {
                match pending.await {
                    Ok(receipt) => info!("[探针] hello 已在连接打开后发送: {}", receipt.payload),
                    Err(failure) => warn!("[探针] hello 未能发送: {}", failure),
                }
                if let Ok(state) = client.state().await {
                    info!("[探针] 当前状态: {} (队列 {} 条)", state.text, state.queue_size);
                }
            });
        }
    }

    tokio::signal::ctrl_c().await.context("监听 Ctrl-C 信号失败")?;
    info!("[探针] 收到 Ctrl-C，正在关闭连接...");
    client.close_normal().await?;
    client.destroy().await?;
    info!("[探针] 已退出");
    Ok(())
}
