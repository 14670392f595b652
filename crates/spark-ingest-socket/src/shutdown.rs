use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::info;

use crate::registry::ConnectionRegistry;

/// 可跨任务共享的一次性取消信号。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 监听循环、连接处理器与退避等待都需要观察同一个“停止”事实；
///   原子位提供无锁的同步查询，`Notify` 让挂起中的任务立即醒来。
///
/// ## 逻辑（How）
/// - `cancel` 通过 `compare_exchange` 保证只有第一次调用生效并返回 `true`；
/// - `cancelled` 先登记等待者再检查标志位，避免检查与登记之间错过通知。
///
/// ## 契约（What）
/// - 状态单调：一旦取消不可恢复；
/// - 克隆体共享同一状态。
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    inner: Arc<TokenState>,
}

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// 尚未取消。
    pub fn is_active(&self) -> bool {
        !self.is_cancelled()
    }

    /// 触发取消；仅首次调用返回 `true`。
    pub fn cancel(&self) -> bool {
        let first = self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// 等待取消发生；已取消时立即返回。
    pub async fn cancelled(&self) {
        let mut notified = pin!(self.inner.notify.notified());
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// 在途工作单元计数，用于关闭时等待所有任务退出。
#[derive(Clone, Debug, Default)]
pub struct WorkerGroup {
    inner: Arc<GroupState>,
}

#[derive(Debug, Default)]
struct GroupState {
    active: AtomicUsize,
    idle: Notify,
}

impl WorkerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个工作单元；守卫释放时自动注销。
    pub fn enter(&self) -> WorkerGuard {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        WorkerGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// 等待计数归零。
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// 工作单元守卫，随连接处理器或监听任务一起移动。
#[derive(Debug)]
pub struct WorkerGuard {
    inner: Arc<GroupState>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self.inner.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// 串联停机流程：广播停止、关闭全部连接、等待所有任务退出。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 停机必须在返回前保证“没有任何处理器仍在读写”，
///   否则宿主可能在下游已释放后仍收到帧；
///
/// ## 逻辑（How）
/// 1. 取消全局令牌：监听循环停止接受、退避等待立即结束；
/// 2. 逐个取消已登记连接的关闭令牌，挂起在读上的处理器随即退出；
/// 3. 等待 [`WorkerGroup`] 归零。
///
/// ## 契约（What）
/// - 幂等：重复调用只会再次等待，不会重复记录日志；
/// - 返回后 [`ConnectionRegistry::len`] 为零。
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    token: ShutdownToken,
    registry: ConnectionRegistry,
    workers: WorkerGroup,
}

impl ShutdownCoordinator {
    pub fn new(token: ShutdownToken, registry: ConnectionRegistry, workers: WorkerGroup) -> Self {
        Self {
            token,
            registry,
            workers,
        }
    }

    pub fn token(&self) -> &ShutdownToken {
        &self.token
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub async fn shutdown(&self) {
        if self.token.cancel() {
            info!(
                connections = self.registry.len(),
                "socket consumer shutting down"
            );
        }
        self.registry.close_all();
        self.workers.wait_idle().await;
    }
}
