//! UDP 接入：未配置确认时网络地址走数据报，所有数据报共享同一个分帧缓冲。
//!
//! # 教案式说明
//! - **Why**：UDP 没有连接概念，单个帧可能被发送方拆成多个数据报；
//! - **How**：向接入端发送若干数据报，其中一帧跨越两个数据报；
//! - **What**：帧按到达顺序投递，且没有注册任何活跃连接。

use std::time::Duration;

use bytes::Bytes;
use spark_ingest_socket::{ChannelSink, SocketConsumer, SocketConsumerConfig, Transport};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test(flavor = "multi_thread")]
async fn datagrams_are_framed_in_order() {
    let config = SocketConsumerConfig::default()
        .with_address("127.0.0.1:0")
        .resolve()
        .expect("配置应当合法")
        .with_read_timeout(Duration::from_millis(200));
    assert_eq!(config.endpoint.transport(), Transport::Udp);

    let (sink, mut frames) = ChannelSink::channel(16);
    let handle = SocketConsumer::new(config, sink).spawn();
    let local = timeout(WAIT, handle.wait_bound())
        .await
        .expect("应当在超时前绑定")
        .expect("监听任务不应提前退出");
    let target = local.socket_addr().expect("UDP 端点应有网络地址");

    let client = UdpSocket::bind("127.0.0.1:0").await.expect("绑定客户端");
    client.send_to(b"one\ntwo\n", target).await.expect("发送");
    client.send_to(b"thr", target).await.expect("发送");
    client.send_to(b"ee\n", target).await.expect("发送");

    for expected in [&b"one"[..], b"two", b"three"] {
        let frame = timeout(WAIT, frames.recv())
            .await
            .expect("应当在超时前收到帧")
            .expect("通道保持打开");
        assert_eq!(frame, Bytes::copy_from_slice(expected));
    }
    assert_eq!(handle.active_connections(), 0);

    timeout(WAIT, handle.shutdown())
        .await
        .expect("停机应当在超时前完成");
    assert!(handle.local_addr().is_none());
}
