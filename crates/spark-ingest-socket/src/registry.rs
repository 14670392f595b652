use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::shutdown::ShutdownToken;

/// 活跃连接表，供停机与监听重建时批量关闭。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 关闭流式连接需要打断挂起在读上的处理器，而套接字本身归处理器所有；
///   注册表只保存每个连接的关闭令牌，由处理器自行在令牌触发后释放套接字。
///
/// ## 契约（What）
/// - 连接在被派生到独立任务之前登记，处理器退出时通过 [`Registration`] 的 `Drop` 注销；
/// - [`ConnectionRegistry::close_all`] 只发出信号，不等待处理器退出。
#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

#[derive(Debug, Default)]
struct RegistryState {
    next_id: u64,
    clients: HashMap<u64, RegisteredClient>,
}

#[derive(Debug)]
struct RegisteredClient {
    peer: String,
    close: ShutdownToken,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新连接，返回其注销守卫。
    pub fn register(&self, peer: String) -> Registration {
        let close = ShutdownToken::new();
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        state.clients.insert(
            id,
            RegisteredClient {
                peer,
                close: close.clone(),
            },
        );
        Registration {
            id,
            close,
            registry: self.clone(),
        }
    }

    /// 向所有已登记连接发出关闭信号，返回信号数量。
    pub fn close_all(&self) -> usize {
        let state = self.inner.lock();
        for client in state.clients.values() {
            if client.close.cancel() {
                debug!(peer = %client.peer, "closing client connection");
            }
        }
        state.clients.len()
    }

    /// 当前登记的连接数。
    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.inner.lock().clients.remove(&id);
    }
}

/// 单个连接的登记凭据，释放时自动注销。
#[derive(Debug)]
pub struct Registration {
    id: u64,
    close: ShutdownToken,
    registry: ConnectionRegistry,
}

impl Registration {
    /// 该连接的关闭令牌。
    pub fn close_token(&self) -> ShutdownToken {
        self.close.clone()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
