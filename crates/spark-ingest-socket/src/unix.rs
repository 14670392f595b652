use std::fs::{self, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::net::UnixListener;
use tracing::{debug, warn};

use crate::config::UnixSocketPolicy;
use crate::error::{BIND, CHMOD, REMOVE_STALE, SocketError, map_io_error};

/// 残留套接字文件的探测结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StaleSocket {
    /// 仍有进程在该路径上监听，不能删除。
    Live,
    /// 确认为残留文件并已删除。
    Removed,
    /// 探测时文件已被第三方移除，清理了探测留下的占位文件。
    Vanished,
}

/// 绑定 Unix 流式监听并设置权限位。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 1. 直接绑定；路径已存在且策略允许清理时，在阻塞线程池中探测并删除残留文件后重试一次；
/// 2. 绑定成功后按 `permissions` 执行 chmod，失败则关闭监听并删除刚创建的文件。
///
/// ## 契约（What）
/// - 探测到路径上仍有活跃监听者时保留文件，返回原始绑定错误交由重连退避处理；
/// - 返回的监听器已具备配置的权限位；
/// - 所有文件系统调用都不占用运行时的工作线程。
pub(crate) async fn bind_unix(
    path: &Path,
    policy: UnixSocketPolicy,
) -> Result<UnixListener, SocketError> {
    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        Err(err) if err.kind() == io::ErrorKind::AddrInUse && policy.remove_stale => {
            let stale = path.to_path_buf();
            let outcome = tokio::task::spawn_blocking(move || clear_stale_socket(&stale))
                .await
                .map_err(|join| map_io_error(REMOVE_STALE, io::Error::other(join)))??;
            if outcome == StaleSocket::Live {
                return Err(map_io_error(BIND, err));
            }
            UnixListener::bind(path).map_err(|err| map_io_error(BIND, err))?
        }
        Err(err) => return Err(map_io_error(BIND, err)),
    };

    let permissions = Permissions::from_mode(policy.permissions);
    if let Err(err) = tokio::fs::set_permissions(path, permissions).await {
        drop(listener);
        remove_socket_file(path).await;
        return Err(map_io_error(CHMOD, err));
    }
    Ok(listener)
}

/// 判定并清理残留的套接字文件。
///
/// 全部为阻塞调用，异步上下文中须经 `spawn_blocking` 执行。
/// 先尝试连接以排除仍在服务的监听者，再以独占创建探测文件是否存在：
/// 已存在即为残留，删除之；创建成功说明文件在探测前已被第三方移除，删除占位文件。
pub(crate) fn clear_stale_socket(path: &Path) -> Result<StaleSocket, SocketError> {
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        debug!(path = %path.display(), "unix socket is still served");
        return Ok(StaleSocket::Live);
    }

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            warn!(path = %path.display(), "removing stale unix socket");
            fs::remove_file(path).map_err(|err| map_io_error(REMOVE_STALE, err))?;
            Ok(StaleSocket::Removed)
        }
        Ok(probe) => {
            drop(probe);
            warn!(path = %path.display(), "unix socket was removed by a third party");
            fs::remove_file(path).map_err(|err| map_io_error(REMOVE_STALE, err))?;
            Ok(StaleSocket::Vanished)
        }
        Err(err) => Err(map_io_error(REMOVE_STALE, err)),
    }
}

/// 删除监听留下的套接字文件，文件不存在时静默忽略。
pub(crate) async fn remove_socket_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove unix socket"),
    }
}
