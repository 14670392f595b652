use std::future::Future;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use spark_codec_frame::FrameDecoder;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tracing::{debug, error, warn};

use crate::consumer::ConsumerContext;
use crate::error::{READ, SocketError, WRITE_ACK};
use crate::registry::Registration;
use crate::shutdown::{ShutdownToken, WorkerGuard};
use crate::sink::FrameSink;
use crate::util::{run_until_cancelled, run_with_deadline};

/// 单个 UDP 数据报的最大长度。
const MAX_DATAGRAM: usize = 64 * 1024;

/// 一次读操作的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fill {
    Data(usize),
    Closed,
}

/// 连接处理器所需的最小传输能力：读入分帧缓冲、回写确认。
pub(crate) trait FrameTransport: Send {
    fn fill(
        &mut self,
        decoder: &mut FrameDecoder,
    ) -> impl Future<Output = io::Result<Fill>> + Send;

    fn acknowledge(&mut self, payload: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

/// 面向连接的流式传输（TCP / Unix）。
pub(crate) struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> FrameTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn fill(&mut self, decoder: &mut FrameDecoder) -> io::Result<Fill> {
        let read = self.stream.read_buf(decoder.read_buf_mut()).await?;
        if read == 0 {
            return Ok(Fill::Closed);
        }
        Ok(Fill::Data(read))
    }

    async fn acknowledge(&mut self, payload: &[u8]) -> io::Result<()> {
        self.stream.write_all(payload).await?;
        self.stream.flush().await
    }
}

/// 数据报传输：所有数据报追加到同一个分帧缓冲，没有回写通道。
pub(crate) struct DatagramTransport {
    socket: UdpSocket,
    scratch: Vec<u8>,
}

impl DatagramTransport {
    pub(crate) fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            scratch: vec![0; MAX_DATAGRAM],
        }
    }
}

impl FrameTransport for DatagramTransport {
    async fn fill(&mut self, decoder: &mut FrameDecoder) -> io::Result<Fill> {
        let (read, _) = self.socket.recv_from(&mut self.scratch).await?;
        decoder.extend_from_slice(&self.scratch[..read]);
        Ok(Fill::Data(read))
    }

    async fn acknowledge(&mut self, _payload: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

/// 一次“读取 + 投递”周期的统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Cycle {
    delivered: usize,
    bad: usize,
    /// 投递等待期间观察到停机或连接关闭。
    cancelled: bool,
}

/// 驱动单个连接的读取、分帧、投递与确认。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每个连接独占一个分帧器与一个任务，连接之间互不影响；
/// - 读操作带截止时间，使处理器即便在空闲连接上也能周期性观察停机信号。
///
/// ## 逻辑（How）
/// 1. 在 `ReadTimoutSec` 截止时间内读入分帧缓冲；到期视为“暂无数据”继续循环；
/// 2. 排空分帧器，逐帧交给下游；投递可被停机或连接关闭打断；坏帧累加连续错误计数，成功投递清零；
/// 3. 周期内出现坏帧时回写一次否定确认并保持连接；否则在至少投递一帧后回写确认；
/// 4. 下游拒收、致命分帧错误、连续坏帧超限或传输错误：记录日志，回写否定确认，关闭连接。
///
/// ## 契约（What）
/// - 创建即登记为在途工作单元，退出时（无论原因）自动注销；
/// - 流式连接同时持有注册表凭据，退出时从活跃连接表移除；
/// - 停机或对端断开导致的退出不产生错误日志。
pub(crate) struct ConnectionHandler<K, T> {
    ctx: Arc<ConsumerContext<K>>,
    transport: T,
    decoder: FrameDecoder,
    peer: String,
    close: ShutdownToken,
    consecutive_errors: u32,
    _registration: Option<Registration>,
    _worker: WorkerGuard,
}

impl<K, T> ConnectionHandler<K, T>
where
    K: FrameSink,
    T: FrameTransport,
{
    pub(crate) fn new(
        ctx: Arc<ConsumerContext<K>>,
        transport: T,
        peer: String,
        registration: Option<Registration>,
    ) -> Self {
        let decoder = FrameDecoder::new(ctx.config.framing.clone())
            .with_max_frame_len(ctx.config.limits.max_frame_size);
        let close = registration
            .as_ref()
            .map(Registration::close_token)
            .unwrap_or_default();
        let worker = ctx.workers.enter();
        Self {
            ctx,
            transport,
            decoder,
            peer,
            close,
            consecutive_errors: 0,
            _registration: registration,
            _worker: worker,
        }
    }

    pub(crate) async fn serve(mut self) {
        debug!(peer = %self.peer, "connection opened");
        loop {
            let filled = run_with_deadline(
                &self.ctx.shutdown,
                &self.close,
                self.ctx.config.read_timeout,
                READ,
                self.transport.fill(&mut self.decoder),
            )
            .await;
            match filled {
                Ok(Some(Fill::Data(_))) => {}
                Ok(Some(Fill::Closed)) | Ok(None) => break,
                Err(err) if err.is_timeout() => continue,
                Err(err) => {
                    self.abort(err).await;
                    break;
                }
            }

            match self.dispatch().await {
                Ok(cycle) if cycle.cancelled => break,
                Ok(cycle) => {
                    let ack = if cycle.bad > 0 {
                        self.ctx.config.ack.failure().cloned()
                    } else if cycle.delivered > 0 {
                        self.ctx.config.ack.success().cloned()
                    } else {
                        None
                    };
                    if !self.send_ack(ack).await {
                        break;
                    }
                }
                Err(err) => {
                    self.abort(err).await;
                    break;
                }
            }
        }
        debug!(peer = %self.peer, "connection closed");
    }

    async fn dispatch(&mut self) -> Result<Cycle, SocketError> {
        let mut cycle = Cycle::default();
        loop {
            match self.decoder.decode() {
                Ok(Some(frame)) => {
                    let enqueue = self.ctx.sink.enqueue(frame);
                    let Some(enqueued) =
                        run_until_cancelled(&self.ctx.shutdown, &self.close, enqueue).await
                    else {
                        cycle.cancelled = true;
                        return Ok(cycle);
                    };
                    enqueued?;
                    self.consecutive_errors = 0;
                    cycle.delivered += 1;
                }
                Ok(None) => return Ok(cycle),
                Err(err) => {
                    let err = SocketError::from(err);
                    if !err.is_bad_frame() {
                        return Err(err);
                    }
                    self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                    cycle.bad += 1;
                    error!(
                        peer = %self.peer,
                        code = err.code(),
                        error = %err,
                        "discarding malformed frame data"
                    );
                    if self.consecutive_errors > self.ctx.config.limits.max_frame_errors {
                        return Err(SocketError::TooManyFrameErrors {
                            count: self.consecutive_errors,
                        });
                    }
                }
            }
        }
    }

    /// 回写确认；返回 `false` 表示连接应当关闭。
    async fn send_ack(&mut self, payload: Option<Bytes>) -> bool {
        let Some(payload) = payload else {
            return true;
        };
        let written = run_with_deadline(
            &self.ctx.shutdown,
            &self.close,
            self.ctx.config.ack.timeout(),
            WRITE_ACK,
            self.transport.acknowledge(&payload),
        )
        .await;
        match written {
            Ok(Some(())) => true,
            Ok(None) => false,
            Err(err) if err.is_timeout() => {
                warn!(peer = %self.peer, code = err.code(), "acknowledge write timed out");
                true
            }
            Err(err) if err.is_disconnect() => false,
            Err(err) => {
                error!(peer = %self.peer, code = err.code(), error = %err, "acknowledge failed");
                false
            }
        }
    }

    async fn abort(&mut self, err: SocketError) {
        if self.ctx.shutdown.is_cancelled() || self.close.is_cancelled() || err.is_disconnect() {
            return;
        }
        error!(
            peer = %self.peer,
            code = err.code(),
            error = %err,
            "transfer failed"
        );
        let nack = self.ctx.config.ack.failure().cloned();
        self.send_ack(nack).await;
    }
}
