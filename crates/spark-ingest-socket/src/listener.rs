use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{error, info, warn};

use crate::addr::{Endpoint, LocalEndpoint, UNIX_PREFIX};
use crate::connection::{ConnectionHandler, StreamTransport};
use crate::consumer::ConsumerContext;
use crate::error::{ACCEPT, BIND, SocketError, map_io_error};
use crate::shutdown::WorkerGuard;
use crate::sink::FrameSink;
use crate::unix::{bind_unix, remove_socket_file};
use crate::util::sleep_unless_cancelled;

/// 已绑定的流式监听器：生命周期循环只依赖这三项能力。
pub(crate) trait Acceptor: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn local_endpoint(&self) -> io::Result<LocalEndpoint>;

    /// 接受一个连接，返回流与对端标识。
    fn accept(&self) -> impl Future<Output = io::Result<(Self::Stream, String)>> + Send;

    /// 关闭监听并释放其占用的系统资源。
    fn close(self) -> impl Future<Output = ()> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn local_endpoint(&self) -> io::Result<LocalEndpoint> {
        self.local_addr().map(LocalEndpoint::Inet)
    }

    async fn accept(&self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        Ok((stream, peer.to_string()))
    }

    async fn close(self) {}
}

/// Unix 流式监听；关闭时删除套接字文件。
pub(crate) struct UnixAcceptor {
    listener: UnixListener,
    path: PathBuf,
}

impl Acceptor for UnixAcceptor {
    type Stream = UnixStream;

    fn local_endpoint(&self) -> io::Result<LocalEndpoint> {
        Ok(LocalEndpoint::Unix(self.path.clone()))
    }

    async fn accept(&self) -> io::Result<(UnixStream, String)> {
        let (stream, _) = self.listener.accept().await?;
        Ok((stream, format!("{UNIX_PREFIX}{}", self.path.display())))
    }

    async fn close(self) {
        drop(self.listener);
        remove_socket_file(&self.path).await;
    }
}

/// 按端点种类选择绑定方式，进入流式监听的生命周期循环。
pub(crate) async fn run<K: FrameSink>(ctx: Arc<ConsumerContext<K>>, worker: WorkerGuard) {
    match ctx.config.endpoint.clone() {
        Endpoint::Tcp(address) => {
            let bind = move || {
                let address = address.clone();
                async move {
                    TcpListener::bind(address.as_str())
                        .await
                        .map_err(|err| map_io_error(BIND, err))
                }
            };
            lifecycle(ctx, worker, bind).await;
        }
        Endpoint::Unix(path) => {
            let policy = ctx.config.unix;
            let bind = move || {
                let path = path.clone();
                async move {
                    let listener = bind_unix(&path, policy).await?;
                    Ok(UnixAcceptor { listener, path })
                }
            };
            lifecycle(ctx, worker, bind).await;
        }
        Endpoint::Udp(address) => {
            error!(address = %address, "stream listener needs a tcp or unix endpoint");
            drop(worker);
        }
    }
}

/// 流式监听的生命周期循环：绑定 → 接受 → 出错拆除 → 退避 → 重新绑定。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 绑定失败与接受失败都不应终止进程，唯一的终止条件是显式停机；
/// - 接受失败意味着监听器本身可能已不可用，因此整体重建而不是原地重试。
///
/// ## 逻辑（How）
/// 1. 绑定失败：记录错误，按 `ReconnectAfterSec` 固定退避后重试；
/// 2. 绑定成功：发布本地端点，进入接受循环；每个连接先登记再派生独立任务；
/// 3. 接受失败或停机：关闭监听、向全部已登记连接发出关闭信号、撤销端点发布；
/// 4. 未停机则退避后回到步骤 1。
///
/// ## 契约（What）
/// - `worker` 在循环结束时释放，停机协调器据此确认监听任务已退出；
/// - 任意阶段观察到停机都不再重试。
async fn lifecycle<K, A, B, Fut>(ctx: Arc<ConsumerContext<K>>, worker: WorkerGuard, mut bind: B)
where
    K: FrameSink,
    A: Acceptor,
    B: FnMut() -> Fut,
    Fut: Future<Output = Result<A, SocketError>>,
{
    let _worker = worker;
    let address = ctx.config.endpoint.to_string();
    while ctx.shutdown.is_active() {
        let listener = match bind().await {
            Ok(listener) => listener,
            Err(err) => {
                error!(address = %address, code = err.code(), error = %err, "socket bind failed");
                if !sleep_unless_cancelled(&ctx.shutdown, ctx.config.reconnect_after).await {
                    break;
                }
                continue;
            }
        };

        match listener.local_endpoint() {
            Ok(local) => {
                info!(address = %local, "listening");
                ctx.publish(Some(local));
            }
            Err(err) => warn!(address = %address, error = %err, "local address unavailable"),
        }

        accept_loop(&ctx, &listener, &address).await;

        listener.close().await;
        ctx.registry.close_all();
        ctx.publish(None);

        if !sleep_unless_cancelled(&ctx.shutdown, ctx.config.reconnect_after).await {
            break;
        }
    }
    info!(address = %address, "listener stopped");
}

async fn accept_loop<K: FrameSink, A: Acceptor>(
    ctx: &Arc<ConsumerContext<K>>,
    listener: &A,
    address: &str,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok(_) if ctx.shutdown.is_cancelled() => return,
            Ok((stream, peer)) => spawn_connection(ctx, stream, peer),
            Err(source) => {
                if ctx.shutdown.is_active() {
                    let err = map_io_error(ACCEPT, source);
                    error!(
                        address = %address,
                        code = err.code(),
                        error = %err,
                        "socket accept failed"
                    );
                }
                return;
            }
        }
    }
}

/// 登记连接并派生处理任务；登记先于派生，停机时不会漏掉刚接受的连接。
fn spawn_connection<K, S>(ctx: &Arc<ConsumerContext<K>>, stream: S, peer: String)
where
    K: FrameSink,
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let registration = ctx.registry.register(peer.clone());
    let handler = ConnectionHandler::new(
        Arc::clone(ctx),
        StreamTransport::new(stream),
        peer,
        Some(registration),
    );
    tokio::spawn(handler.serve());
}
