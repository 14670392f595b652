#![deny(unsafe_code)]

//! `spark-codec-frame` 把无界字节流切分为离散的应用消息。
//!
//! # 教案背景（Why）
//! - 套接字读到的字节块与消息边界没有对应关系，接入层需要一个与传输无关、可单测的分帧算法；
//! - 四种分区器（分隔符、ASCII 长度前缀、二进制长度前缀、定长）覆盖日志流与二进制协议的常见封帧方式。
//!
//! # 使用概览（How）
//! - 通过 [`FramingMode`] 的构造函数在配置阶段确定分区器与参数；
//! - 每个连接创建一个 [`FrameDecoder`]，把新读到的字节交给 [`FrameDecoder::feed`]，
//!   或直接读入 [`FrameDecoder::read_buf_mut`] 后调用 [`FrameDecoder::drain`]。
//!
//! # 合约说明（What）
//! - 帧按字节到达顺序产出，切片方式不影响产出结果；
//! - 错误分类见 [`FrameError`]：坏帧可继续，其余错误要求断开连接。

mod decoder;
mod error;
mod mode;

pub use crate::decoder::{FrameDecoder, INITIAL_CAPACITY};
pub use crate::error::{BAD_DATA, FrameError, TOO_LARGE, UNSYNCHRONIZABLE};
pub use crate::mode::{
    ByteOrder, DEFAULT_DELIMITER, FramingMode, LengthWidth, ModeError, expand_escapes,
};
