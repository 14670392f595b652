use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{error, info};

use crate::addr::{Endpoint, LocalEndpoint, Transport};
use crate::connection::{ConnectionHandler, DatagramTransport};
use crate::consumer::ConsumerContext;
use crate::error::{BIND, map_io_error};
use crate::shutdown::WorkerGuard;
use crate::sink::FrameSink;
use crate::util::sleep_unless_cancelled;

/// UDP 的生命周期循环：绑定后直接在该套接字上运行连接处理器。
///
/// 没有逐客户端的连接，也不使用活跃连接表；处理器退出后丢弃套接字，退避后重新绑定。
pub(crate) async fn run<K: FrameSink>(ctx: Arc<ConsumerContext<K>>, worker: WorkerGuard) {
    let _worker = worker;
    let Endpoint::Udp(address) = &ctx.config.endpoint else {
        error!(address = %ctx.config.endpoint, "datagram listener needs a udp endpoint");
        return;
    };

    while ctx.shutdown.is_active() {
        match UdpSocket::bind(address.as_str()).await {
            Ok(socket) => {
                let peer = match socket.local_addr() {
                    Ok(local) => {
                        info!(address = %local, "listening");
                        ctx.publish(Some(LocalEndpoint::Inet(local)));
                        format!("{}://{local}", Transport::Udp.scheme())
                    }
                    Err(_) => ctx.config.endpoint.to_string(),
                };
                let handler = ConnectionHandler::new(
                    Arc::clone(&ctx),
                    DatagramTransport::new(socket),
                    peer,
                    None,
                );
                handler.serve().await;
                ctx.publish(None);
            }
            Err(source) => {
                let err = map_io_error(BIND, source);
                error!(address = %address, code = err.code(), error = %err, "socket bind failed");
            }
        }

        if !sleep_unless_cancelled(&ctx.shutdown, ctx.config.reconnect_after).await {
            break;
        }
    }
    info!(address = %address, "listener stopped");
}
