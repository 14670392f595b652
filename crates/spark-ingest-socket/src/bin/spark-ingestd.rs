//! 套接字接入守护进程：按 TOML 配置监听，逐帧打印收到的消息，Ctrl-C 时优雅停机。
//!
//! # 使用方法
//! ```bash
//! cargo run --bin spark-ingestd -- ingest.toml --address unix:///tmp/spark.socket
//! ```
//! - `ingest.toml`：可选，`SocketConsumerConfig` 的 TOML 表示，缺省时全部使用默认值；
//! - `--address`：可选，覆盖配置文件中的 `Address`。
//!
//! # 设计要点（Why）
//! - 日志级别通过 `RUST_LOG` 控制，缺省为 `info`；
//! - 停机顺序与库内 [`ConsumerHandle::shutdown`] 一致：先停止接受，再关闭连接，最后等待所有任务退出。

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use spark_ingest_socket::{ChannelSink, ConsumerHandle, SocketConsumer, SocketConsumerConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 下游通道容量；通道写满时连接处理器挂起，形成背压。
const SINK_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    install_tracing();

    let config = load_config()?;
    let consumer = SocketConsumer::from_config(&config, {
        let (sink, receiver) = ChannelSink::channel(SINK_CAPACITY);
        tokio::spawn(print_frames(receiver));
        sink
    })
    .context("invalid socket consumer configuration")?;

    let handle = consumer.spawn();
    wait_for_stop(&handle).await;
    handle.shutdown().await;
    info!("spark-ingestd stopped");
    Ok(())
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config() -> Result<SocketConsumerConfig> {
    let mut args = env::args().skip(1);
    let mut config_path = None;
    let mut address = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--address" => {
                let value = args.next().context("--address requires a value")?;
                address = Some(value);
            }
            flag if flag.starts_with("--") => bail!("unknown flag: {flag}"),
            path => {
                if config_path.is_some() {
                    bail!("unexpected argument: {path}");
                }
                config_path = Some(PathBuf::from(path));
            }
        }
    }

    let mut config = match config_path {
        Some(path) => SocketConsumerConfig::from_path(&path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SocketConsumerConfig::default(),
    };
    if let Some(address) = address {
        config = config.with_address(address);
    }
    Ok(config)
}

async fn print_frames(mut receiver: mpsc::Receiver<Bytes>) {
    while let Some(frame) = receiver.recv().await {
        info!(len = frame.len(), payload = %String::from_utf8_lossy(&frame), "frame received");
    }
}

async fn wait_for_stop(handle: &ConsumerHandle) {
    let token = handle.shutdown_token();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(err) = signal {
                warn!(error = %err, "failed to listen for ctrl-c, stopping");
            } else {
                info!("stop requested");
            }
        }
        _ = token.cancelled() => {}
    }
}
