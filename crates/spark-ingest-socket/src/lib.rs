#![deny(unsafe_code)]

//! `spark-ingest-socket` 通过 TCP、UDP 或 Unix 域套接字接收字节流，分帧后投递给下游。
//!
//! # 教案背景（Why）
//! - 路由管线需要一个能长期驻留的接入端：对端会断开、重连、发送半截或错乱的帧，
//!   接入端必须把这些都限制在单个连接内处理，监听本身只在显式停机时结束；
//! - 分帧算法来自 `spark-codec-frame`，本 crate 负责把它接到真实套接字上。
//!
//! # 使用概览（How）
//! 1. 反序列化 [`SocketConsumerConfig`] 并调用 [`SocketConsumerConfig::resolve`]，配置错误在此暴露；
//! 2. 选择下游 [`FrameSink`]（如 [`ChannelSink`]），构造 [`SocketConsumer`] 并 `spawn`；
//! 3. 通过 [`ConsumerHandle::shutdown`] 停止，返回时所有连接处理器均已退出。
//!
//! # 合约说明（What）
//! - 启用确认时网络地址使用 TCP，否则使用 UDP；`unix://` 地址始终使用 Unix 流式套接字；
//! - 同一连接内的帧按到达顺序投递，确认在下游接收之后回写；
//! - 绑定与接受失败按固定间隔无限重试，直到停机。

mod addr;
mod config;
mod connection;
mod consumer;
mod datagram;
mod error;
mod listener;
mod registry;
mod shutdown;
mod sink;
mod unix;
mod util;

pub use crate::addr::{DEFAULT_ADDRESS, Endpoint, LocalEndpoint, Transport, UNIX_PREFIX};
pub use crate::config::{
    AckPolicy, Limits, ResolvedConfig, SocketConsumerConfig, UnixSocketPolicy,
};
pub use crate::consumer::{ConsumerHandle, SocketConsumer};
pub use crate::error::{ConfigError, OperationKind, SocketError};
pub use crate::registry::{ConnectionRegistry, Registration};
pub use crate::shutdown::{ShutdownCoordinator, ShutdownToken, WorkerGroup, WorkerGuard};
pub use crate::sink::{ChannelSink, FnSink, FrameSink, SinkError};
pub use spark_codec_frame::{ByteOrder, FramingMode, LengthWidth};
