use std::future::Future;
use std::io;
use std::time::Duration;

use crate::error::{OperationKind, SocketError, map_io_error, timeout_error};
use crate::shutdown::ShutdownToken;

/// 在保留取消/超时语义的前提下执行 IO Future。
///
/// - 任一令牌取消时返回 `Ok(None)`，调用方据此静默退出；
/// - 超时返回 [`SocketError::Timeout`]，IO 失败按 `kind` 分类。
pub(crate) async fn run_with_deadline<F, T>(
    shutdown: &ShutdownToken,
    close: &ShutdownToken,
    deadline: Duration,
    kind: OperationKind,
    future: F,
) -> Result<Option<T>, SocketError>
where
    F: Future<Output = io::Result<T>>,
{
    if shutdown.is_cancelled() || close.is_cancelled() {
        return Ok(None);
    }
    let sleep = tokio::time::sleep(deadline);
    tokio::pin!(sleep);
    tokio::pin!(future);
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Ok(None),
        _ = close.cancelled() => Ok(None),
        _ = &mut sleep => Err(timeout_error(kind)),
        result = &mut future => result.map(Some).map_err(|err| map_io_error(kind, err)),
    }
}

/// 执行不受截止时间约束的 Future（如向有界下游投递），任一令牌取消时放弃并返回 `None`。
pub(crate) async fn run_until_cancelled<F>(
    shutdown: &ShutdownToken,
    close: &ShutdownToken,
    future: F,
) -> Option<F::Output>
where
    F: Future,
{
    if shutdown.is_cancelled() || close.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        _ = close.cancelled() => None,
        output = future => Some(output),
    }
}

/// 睡眠 `backoff`，期间若停机则提前返回 `false`。
pub(crate) async fn sleep_unless_cancelled(shutdown: &ShutdownToken, backoff: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(backoff) => shutdown.is_active(),
    }
}
