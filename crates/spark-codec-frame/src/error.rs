use thiserror::Error;

/// 坏帧数据的稳定错误码。
pub const BAD_DATA: &str = "spark.codec.frame.bad_data";
/// 帧超过上限的稳定错误码。
pub const TOO_LARGE: &str = "spark.codec.frame.too_large";
/// 无法重同步的稳定错误码。
pub const UNSYNCHRONIZABLE: &str = "spark.codec.frame.unsynchronizable";

/// 分帧过程中的错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 连接处理器需要区分“可以继续读”的坏帧与“必须断开”的错误，
///   因此错误本身携带分类，而不是让调用方去匹配字符串。
///
/// ## 契约（What）
/// - [`FrameError::BadData`]：非致命。返回前解码器已经丢弃了无法解析的前导字节，
///   下一次解码从重同步点继续，`discarded` 记录被丢弃的字节数；
/// - [`FrameError::TooLarge`]：致命。帧长度（或尚未闭合的部分帧）超过了配置上限；
/// - [`FrameError::Unsynchronizable`]：致命。当前模式下没有可定义的重同步点。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad frame data: {reason} ({discarded} bytes discarded)")]
    BadData {
        reason: &'static str,
        discarded: usize,
    },
    #[error("frame length {len} exceeds limit {limit}")]
    TooLarge { len: usize, limit: usize },
    #[error("{mode} stream cannot be resynchronized: {reason}")]
    Unsynchronizable {
        mode: &'static str,
        reason: &'static str,
    },
}

impl FrameError {
    /// 返回稳定错误码，便于日志聚合。
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadData { .. } => BAD_DATA,
            Self::TooLarge { .. } => TOO_LARGE,
            Self::Unsynchronizable { .. } => UNSYNCHRONIZABLE,
        }
    }

    /// 是否要求关闭连接。
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BadData { .. })
    }
}
