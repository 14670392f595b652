use std::future::Future;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// 下游拒收帧时的错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("downstream closed")]
    Closed,
    #[error("{0}")]
    Rejected(String),
}

/// 已切分帧的投递目标。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 接入层只负责把字节流还原为消息，消息之后交给谁由宿主决定；
///   以 trait 隔离下游，使连接处理器可以在测试中直接替换为内存通道或失败注入。
///
/// ## 契约（What）
/// - `enqueue` 返回 `Ok(())` 即视为下游已接收，连接处理器据此回写确认；
/// - 返回错误时处理器回写否定确认并关闭连接；
/// - 实现必须可跨任务共享，多个连接会并发调用同一个实例。
///
/// ## 注意事项（Trade-offs）
/// - `enqueue` 可以挂起以施加背压，挂起期间该连接不会继续读取；
///   停机或连接被关闭时挂起的投递会被放弃，该帧不保证送达。
pub trait FrameSink: Send + Sync + 'static {
    fn enqueue(&self, frame: Bytes) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// 基于有界 `mpsc` 通道的投递目标。
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<Bytes>) -> Self {
        Self { sender }
    }

    /// 创建容量为 `capacity` 的通道，返回投递端与接收端。
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self::new(sender), receiver)
    }
}

impl FrameSink for ChannelSink {
    async fn enqueue(&self, frame: Bytes) -> Result<(), SinkError> {
        self.sender.send(frame).await.map_err(|_| SinkError::Closed)
    }
}

/// 以同步闭包实现的投递目标，适合测试与轻量适配。
pub struct FnSink<F> {
    handler: F,
}

impl<F> FnSink<F>
where
    F: Fn(Bytes) -> Result<(), SinkError> + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> FrameSink for FnSink<F>
where
    F: Fn(Bytes) -> Result<(), SinkError> + Send + Sync + 'static,
{
    async fn enqueue(&self, frame: Bytes) -> Result<(), SinkError> {
        (self.handler)(frame)
    }
}
