use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::addr::{LocalEndpoint, Transport};
use crate::config::{ResolvedConfig, SocketConsumerConfig};
use crate::error::ConfigError;
use crate::registry::ConnectionRegistry;
use crate::shutdown::{ShutdownCoordinator, ShutdownToken, WorkerGroup};
use crate::sink::FrameSink;
use crate::{datagram, listener};

/// 监听任务与连接处理器共享的运行期上下文。
pub(crate) struct ConsumerContext<K> {
    pub(crate) config: ResolvedConfig,
    pub(crate) sink: K,
    pub(crate) shutdown: ShutdownToken,
    pub(crate) workers: WorkerGroup,
    pub(crate) registry: ConnectionRegistry,
    bound: watch::Sender<Option<LocalEndpoint>>,
}

impl<K> ConsumerContext<K> {
    pub(crate) fn new(config: ResolvedConfig, sink: K) -> Self {
        let (bound, _) = watch::channel(None);
        Self {
            config,
            sink,
            shutdown: ShutdownToken::new(),
            workers: WorkerGroup::new(),
            registry: ConnectionRegistry::new(),
            bound,
        }
    }

    /// 发布（或撤销）当前绑定的本地端点。
    pub(crate) fn publish(&self, local: Option<LocalEndpoint>) {
        self.bound.send_replace(local);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<LocalEndpoint>> {
        self.bound.subscribe()
    }
}

/// 套接字接入的入口：持有校验后的配置与下游，`spawn` 后在后台运行。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 宿主只需要“启动”与“停止”两个动作，监听重建、连接派生与停机屏障都封装在内部；
///
/// ## 契约（What）
/// - 必须在 Tokio 运行时内调用 [`SocketConsumer::spawn`]；
/// - UDP 端点启动数据报循环，TCP/Unix 端点启动流式监听循环；
/// - 返回的 [`ConsumerHandle`] 是停止运行的唯一途径，丢弃句柄不会停止后台任务。
pub struct SocketConsumer<K> {
    config: ResolvedConfig,
    sink: K,
}

impl<K: FrameSink> SocketConsumer<K> {
    pub fn new(config: ResolvedConfig, sink: K) -> Self {
        Self { config, sink }
    }

    /// 校验原始配置后构造。
    pub fn from_config(config: &SocketConsumerConfig, sink: K) -> Result<Self, ConfigError> {
        Ok(Self::new(config.resolve()?, sink))
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// 在当前运行时上启动后台监听任务。
    pub fn spawn(self) -> ConsumerHandle {
        let ctx = Arc::new(ConsumerContext::new(self.config, self.sink));
        let bound = ctx.subscribe();
        let coordinator = ShutdownCoordinator::new(
            ctx.shutdown.clone(),
            ctx.registry.clone(),
            ctx.workers.clone(),
        );
        info!(
            address = %ctx.config.endpoint,
            partitioner = ctx.config.framing.name(),
            "starting socket consumer"
        );

        // 在派生之前登记监听任务，保证停机屏障一定覆盖它。
        let worker = ctx.workers.enter();
        match ctx.config.endpoint.transport() {
            Transport::Udp => tokio::spawn(datagram::run(ctx, worker)),
            Transport::Tcp | Transport::Unix => tokio::spawn(listener::run(ctx, worker)),
        };

        ConsumerHandle { coordinator, bound }
    }
}

/// 运行中接入的控制句柄。
#[derive(Clone, Debug)]
pub struct ConsumerHandle {
    coordinator: ShutdownCoordinator,
    bound: watch::Receiver<Option<LocalEndpoint>>,
}

impl ConsumerHandle {
    /// 当前绑定的本地端点；尚未绑定或正在重建时为 `None`。
    pub fn local_addr(&self) -> Option<LocalEndpoint> {
        self.bound.borrow().clone()
    }

    /// 等待首次（或下一次）绑定成功；后台任务全部退出后返回 `None`。
    pub async fn wait_bound(&self) -> Option<LocalEndpoint> {
        let mut bound = self.bound.clone();
        let local = match bound.wait_for(Option::is_some).await {
            Ok(local) => local.clone(),
            Err(_) => None,
        };
        local
    }

    /// 当前登记的活跃流式连接数。
    pub fn active_connections(&self) -> usize {
        self.coordinator.registry().len()
    }

    pub fn is_active(&self) -> bool {
        self.coordinator.token().is_active()
    }

    /// 共享的停机令牌，可交给宿主的其他组件观察。
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.coordinator.token().clone()
    }

    /// 停止接入并等待所有监听任务与连接处理器退出；可重复调用。
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
