use std::io;
use std::num::ParseIntError;
use std::path::PathBuf;

use spark_codec_frame::{FrameError, ModeError};
use thiserror::Error;

use crate::sink::SinkError;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.ingest.socket.bind_failed",
    message: "socket bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.ingest.socket.accept_failed",
    message: "socket accept",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "spark.ingest.socket.read_failed",
    message: "socket read",
};
pub(crate) const WRITE_ACK: OperationKind = OperationKind {
    code: "spark.ingest.socket.ack_failed",
    message: "acknowledge write",
};
pub(crate) const CHMOD: OperationKind = OperationKind {
    code: "spark.ingest.socket.chmod_failed",
    message: "unix socket chmod",
};
pub(crate) const REMOVE_STALE: OperationKind = OperationKind {
    code: "spark.ingest.socket.remove_stale_failed",
    message: "unix socket cleanup",
};

const TIMEOUT_CODE: &str = "spark.ingest.socket.timeout";
const SINK_CODE: &str = "spark.ingest.socket.sink_rejected";
const FRAME_ERRORS_CODE: &str = "spark.ingest.socket.frame_errors_exceeded";

/// 套接字接入的运行期错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接处理器需要据错误类别决定“继续读 / 关闭连接 / 静默退出”，
///   因此错误值必须携带可判定的分类，而不是只有文本。
///
/// ## 契约（What）
/// - [`SocketError::Io`]：底层 IO 失败，`kind` 标识发生在哪一步；
/// - [`SocketError::Timeout`]：读/写截止时间到期，对读而言属于良性“暂无数据”；
/// - [`SocketError::Frame`]：分帧失败，是否致命由 [`FrameError::is_fatal`] 决定；
/// - [`SocketError::Sink`]：下游拒收，连接随后关闭；
/// - [`SocketError::TooManyFrameErrors`]：连续坏帧超过上限，强制断开。
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("{}: {source}", .kind.message)]
    Io {
        kind: OperationKind,
        #[source]
        source: io::Error,
    },
    #[error("{} timed out", .kind.message)]
    Timeout { kind: OperationKind },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("downstream rejected frame: {0}")]
    Sink(#[from] SinkError),
    #[error("{count} consecutive bad frames, closing connection")]
    TooManyFrameErrors { count: u32 },
}

impl SocketError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { kind, .. } => kind.code,
            Self::Timeout { .. } => TIMEOUT_CODE,
            Self::Frame(err) => err.code(),
            Self::Sink(_) => SINK_CODE,
            Self::TooManyFrameErrors { .. } => FRAME_ERRORS_CODE,
        }
    }

    /// 对端断开或本端已关闭导致的错误，处理器静默退出即可。
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io { source, .. } => is_disconnect_kind(source.kind()),
            _ => false,
        }
    }

    /// 截止时间到期。
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// 可在同一连接上继续读取的坏帧错误。
    pub fn is_bad_frame(&self) -> bool {
        matches!(self, Self::Frame(err) if !err.is_fatal())
    }
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    use io::ErrorKind;
    matches!(
        kind,
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
    )
}

/// 将 IO 错误映射为带操作分类的 [`SocketError`]。
pub(crate) fn map_io_error(kind: OperationKind, source: io::Error) -> SocketError {
    SocketError::Io { kind, source }
}

/// 构造超时错误。
pub(crate) fn timeout_error(kind: OperationKind) -> SocketError {
    SocketError::Timeout { kind }
}

/// 配置阶段错误：全部在打开任何套接字之前抛出。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown partitioner: {0}")]
    UnknownPartitioner(String),
    #[error("invalid partitioner parameters: {0}")]
    InvalidMode(#[from] ModeError),
    #[error("invalid permissions {value:?}: {source}")]
    InvalidPermissions {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("permissions {0:o} exceed 0o7777")]
    PermissionsOutOfRange(u32),
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read configuration {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
