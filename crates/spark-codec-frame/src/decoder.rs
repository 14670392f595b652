use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::error::FrameError;
use crate::mode::{ByteOrder, FramingMode, LengthWidth};

/// 读缓冲的初始容量，同时也是满载时的最小增长步长。
pub const INITIAL_CAPACITY: usize = 256;

/// `u64::MAX` 的十进制位数；超过该位数的数字串不可能是合法长度。
const MAX_ASCII_DIGITS: usize = 20;

/// 单连接独占的增量分帧器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 字节流的读边界与应用消息边界无关，分帧器负责把任意切片序列还原为完整消息；
/// - 每个连接持有独立实例，缓冲与游标从不跨任务共享，因此内部无需加锁。
///
/// ## 逻辑（How）
/// - 新数据追加到 `buffer` 尾部，`decode` 每次最多切出一帧；
/// - 已切出的字节通过 `split_to`/`advance` 从缓冲头部移除，缓冲中只保留未消费数据；
/// - 分隔符模式额外维护 `scanned` 游标，避免每次新数据到达时重复扫描已确认不含分隔符的前缀。
///
/// ## 契约（What）
/// - `Ok(None)` 表示“需要更多数据”，缓冲内容保持不变；
/// - `Err(FrameError::BadData { .. })` 返回前已丢弃无法解析的前导字节，调用方可以继续解码；
/// - 其余错误为致命错误，调用方应关闭连接。
///
/// ## 注意事项（Trade-offs）
/// - 缓冲默认无上限，恶意对端可以持续发送不闭合的帧撑大内存；
///   通过 [`FrameDecoder::with_max_frame_len`] 设置上限后，超限即返回 [`FrameError::TooLarge`]。
#[derive(Debug)]
pub struct FrameDecoder {
    mode: FramingMode,
    buffer: BytesMut,
    scanned: usize,
    max_frame_len: Option<usize>,
}

impl FrameDecoder {
    /// 以默认初始容量创建分帧器。
    pub fn new(mode: FramingMode) -> Self {
        Self::with_capacity(mode, INITIAL_CAPACITY)
    }

    /// 以指定初始容量创建分帧器。
    pub fn with_capacity(mode: FramingMode, capacity: usize) -> Self {
        Self {
            mode,
            buffer: BytesMut::with_capacity(capacity),
            scanned: 0,
            max_frame_len: None,
        }
    }

    /// 设置单帧长度上限；`None` 表示不限制。
    pub fn with_max_frame_len(mut self, limit: Option<usize>) -> Self {
        self.max_frame_len = limit;
        self
    }

    pub fn mode(&self) -> &FramingMode {
        &self.mode
    }

    /// 当前缓冲中尚未消费的字节数。
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 缓冲是否为空。
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 追加新到达的字节。
    pub fn extend_from_slice(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// 暴露可直接作为读目标的缓冲，满载时先按当前容量倍增。
    ///
    /// 供连接处理器把套接字数据直接读入分帧缓冲，省去一次拷贝。
    pub fn read_buf_mut(&mut self) -> &mut BytesMut {
        if self.buffer.len() == self.buffer.capacity() {
            let grow = self.buffer.capacity().max(INITIAL_CAPACITY);
            self.buffer.reserve(grow);
        }
        &mut self.buffer
    }

    /// 尝试切出一帧。
    pub fn decode(&mut self) -> Result<Option<Bytes>, FrameError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let limit = self.max_frame_len;
        match &self.mode {
            FramingMode::Delimiter { delimiter } => {
                decode_delimited(&mut self.buffer, &mut self.scanned, delimiter, limit)
            }
            FramingMode::AsciiLengthPrefixed { offset, delimiter } => {
                decode_ascii(&mut self.buffer, *offset, delimiter, limit)
            }
            FramingMode::BinaryLengthPrefixed {
                offset,
                width,
                order,
            } => decode_binary(&mut self.buffer, *offset, *width, *order, limit),
            FramingMode::FixedSize { size } => decode_fixed(&mut self.buffer, *size, limit),
        }
    }

    /// 连续解码直到需要更多数据，逐帧交给 `emit`，返回本次产出的帧数。
    ///
    /// 出错时已产出的帧不会回滚；坏帧错误返回后缓冲已完成重同步。
    pub fn drain<F>(&mut self, mut emit: F) -> Result<usize, FrameError>
    where
        F: FnMut(Bytes),
    {
        let mut emitted = 0;
        while let Some(frame) = self.decode()? {
            emit(frame);
            emitted += 1;
        }
        Ok(emitted)
    }

    /// 追加一段数据并立即排空，等价于 `extend_from_slice` + `drain`。
    pub fn feed<F>(&mut self, chunk: &[u8], emit: F) -> Result<usize, FrameError>
    where
        F: FnMut(Bytes),
    {
        self.extend_from_slice(chunk);
        self.drain(emit)
    }
}

fn decode_delimited(
    buffer: &mut BytesMut,
    scanned: &mut usize,
    delimiter: &[u8],
    limit: Option<usize>,
) -> Result<Option<Bytes>, FrameError> {
    if delimiter.is_empty() {
        return Err(FrameError::Unsynchronizable {
            mode: "delimiter",
            reason: "empty delimiter",
        });
    }
    // 分隔符可能跨越上一次扫描的末尾，回退 `len - 1` 字节重新比较。
    let start = scanned.saturating_sub(delimiter.len() - 1);
    match find(&buffer[start..], delimiter) {
        Some(relative) => {
            let position = start + relative;
            *scanned = 0;
            check_limit(position, limit)?;
            let frame = buffer.split_to(position).freeze();
            buffer.advance(delimiter.len());
            Ok(Some(frame))
        }
        None => {
            *scanned = buffer.len();
            if let Some(limit) = limit
                && buffer.len() > limit.saturating_add(delimiter.len())
            {
                return Err(FrameError::TooLarge {
                    len: buffer.len(),
                    limit,
                });
            }
            Ok(None)
        }
    }
}

fn decode_ascii(
    buffer: &mut BytesMut,
    offset: usize,
    delimiter: &[u8],
    limit: Option<usize>,
) -> Result<Option<Bytes>, FrameError> {
    if delimiter.is_empty() {
        return Err(FrameError::Unsynchronizable {
            mode: "ascii",
            reason: "empty delimiter",
        });
    }
    if buffer.len() <= offset {
        return Ok(None);
    }

    let digits = buffer[offset..]
        .iter()
        .take_while(|byte| byte.is_ascii_digit())
        .count();
    if digits > MAX_ASCII_DIGITS {
        return Err(resync_ascii(
            buffer,
            offset,
            delimiter,
            "length prefix has too many digits",
        ));
    }
    let digits_end = offset + digits;
    if digits_end == buffer.len() {
        return Ok(None);
    }
    if digits == 0 {
        return Err(resync_ascii(
            buffer,
            offset,
            delimiter,
            "expected ascii digits at offset",
        ));
    }

    let available = (buffer.len() - digits_end).min(delimiter.len());
    if buffer[digits_end..digits_end + available] != delimiter[..available] {
        return Err(resync_ascii(
            buffer,
            offset,
            delimiter,
            "length prefix is not followed by the delimiter",
        ));
    }
    if available < delimiter.len() {
        return Ok(None);
    }

    let Some(len) = parse_decimal(&buffer[offset..digits_end]) else {
        return Err(resync_ascii(
            buffer,
            offset,
            delimiter,
            "length prefix overflows",
        ));
    };
    check_limit(len, limit)?;

    let payload_start = digits_end + delimiter.len();
    let Some(end) = payload_start.checked_add(len) else {
        return Err(resync_ascii(
            buffer,
            offset,
            delimiter,
            "length prefix overflows",
        ));
    };
    if buffer.len() < end {
        return Ok(None);
    }
    buffer.advance(payload_start);
    Ok(Some(buffer.split_to(len).freeze()))
}

/// 丢弃 `offset` 之后首个分隔符（含）之前的全部字节；缓冲中尚无分隔符时清空缓冲。
fn resync_ascii(
    buffer: &mut BytesMut,
    offset: usize,
    delimiter: &[u8],
    reason: &'static str,
) -> FrameError {
    let discarded = match find(&buffer[offset..], delimiter) {
        Some(relative) => offset + relative + delimiter.len(),
        None => buffer.len(),
    };
    buffer.advance(discarded);
    debug!(reason, discarded, "ascii partitioner resynchronized");
    FrameError::BadData { reason, discarded }
}

fn decode_binary(
    buffer: &mut BytesMut,
    offset: usize,
    width: LengthWidth,
    order: ByteOrder,
    limit: Option<usize>,
) -> Result<Option<Bytes>, FrameError> {
    let mode = match order {
        ByteOrder::Little => "binary_le",
        ByteOrder::Big => "binary_be",
    };
    let header = offset
        .checked_add(width.bytes())
        .ok_or(FrameError::Unsynchronizable {
            mode,
            reason: "offset overflows",
        })?;
    if buffer.len() < header {
        return Ok(None);
    }

    let raw = width.read(&buffer[offset..header], order);
    let len = usize::try_from(raw).map_err(|_| FrameError::Unsynchronizable {
        mode,
        reason: "length prefix exceeds addressable memory",
    })?;
    check_limit(len, limit)?;
    let end = header
        .checked_add(len)
        .ok_or(FrameError::Unsynchronizable {
            mode,
            reason: "length prefix exceeds addressable memory",
        })?;
    if buffer.len() < end {
        return Ok(None);
    }
    buffer.advance(header);
    Ok(Some(buffer.split_to(len).freeze()))
}

fn decode_fixed(
    buffer: &mut BytesMut,
    size: usize,
    limit: Option<usize>,
) -> Result<Option<Bytes>, FrameError> {
    if size == 0 {
        return Err(FrameError::Unsynchronizable {
            mode: "fixed",
            reason: "zero frame size",
        });
    }
    check_limit(size, limit)?;
    if buffer.len() < size {
        return Ok(None);
    }
    Ok(Some(buffer.split_to(size).freeze()))
}

fn check_limit(len: usize, limit: Option<usize>) -> Result<(), FrameError> {
    match limit {
        Some(limit) if len > limit => Err(FrameError::TooLarge { len, limit }),
        _ => Ok(()),
    }
}

fn parse_decimal(digits: &[u8]) -> Option<usize> {
    digits.iter().try_fold(0usize, |acc, digit| {
        acc.checked_mul(10)?
            .checked_add(usize::from(digit - b'0'))
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    match needle {
        [] => None,
        [byte] => haystack.iter().position(|candidate| candidate == byte),
        _ => haystack
            .windows(needle.len())
            .position(|window| window == needle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeError;

    fn collect(decoder: &mut FrameDecoder, chunk: &[u8]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        decoder
            .feed(chunk, |frame| frames.push(frame))
            .expect("decode succeeds");
        frames
    }

    #[test]
    fn delimiter_splits_single_chunk() {
        let mut decoder = FrameDecoder::new(FramingMode::default());
        let frames = collect(&mut decoder, b"abc\ndef\n");
        assert_eq!(frames, vec![Bytes::from("abc"), Bytes::from("def")]);
        assert!(decoder.is_empty(), "不应产生尾随空帧或残留字节");
    }

    #[test]
    fn delimiter_is_fragmentation_independent() {
        let mut decoder = FrameDecoder::new(FramingMode::default());
        let mut frames = collect(&mut decoder, b"ab");
        assert!(frames.is_empty());
        frames.extend(collect(&mut decoder, b"c\nde"));
        frames.extend(collect(&mut decoder, b"f\n"));
        assert_eq!(frames, vec![Bytes::from("abc"), Bytes::from("def")]);
    }

    #[test]
    fn multi_byte_delimiter_across_chunks() {
        let mode = FramingMode::delimiter("\r\n").expect("valid delimiter");
        let mut decoder = FrameDecoder::new(mode);
        assert!(collect(&mut decoder, b"hello\r").is_empty());
        let frames = collect(&mut decoder, b"\nworld\r\n");
        assert_eq!(frames, vec![Bytes::from("hello"), Bytes::from("world")]);
    }

    #[test]
    fn consecutive_delimiters_emit_empty_frame() {
        let mut decoder = FrameDecoder::new(FramingMode::default());
        let frames = collect(&mut decoder, b"a\n\nb\n");
        assert_eq!(
            frames,
            vec![Bytes::from("a"), Bytes::new(), Bytes::from("b")]
        );
    }

    #[test]
    fn fixed_retains_partial_tail() {
        let mut decoder = FrameDecoder::new(FramingMode::fixed(4).expect("size"));
        let frames = collect(&mut decoder, b"0123456789");
        assert_eq!(frames, vec![Bytes::from("0123"), Bytes::from("4567")]);
        assert_eq!(decoder.buffered(), 2);
        assert!(collect(&mut decoder, b"a").is_empty());
        let frames = collect(&mut decoder, b"b");
        assert_eq!(frames, vec![Bytes::from("89ab")]);
        assert!(decoder.is_empty());
    }

    #[test]
    fn binary_big_endian_prefix() {
        let mode = FramingMode::binary(0, LengthWidth::W32, ByteOrder::Big);
        let mut decoder = FrameDecoder::new(mode);
        assert!(collect(&mut decoder, &[0, 0, 0, 5, b'h', b'e']).is_empty());
        assert_eq!(decoder.buffered(), 6, "截断负载应保留全部字节");
        let frames = collect(&mut decoder, b"llo");
        assert_eq!(frames, vec![Bytes::from("hello")]);
    }

    #[test]
    fn binary_little_endian_with_offset() {
        let mode = FramingMode::binary(2, LengthWidth::W16, ByteOrder::Little);
        let mut decoder = FrameDecoder::new(mode);
        let frames = collect(&mut decoder, &[0xAA, 0xBB, 3, 0, b'x', b'y', b'z']);
        assert_eq!(frames, vec![Bytes::from("xyz")]);
        assert!(decoder.is_empty());
    }

    #[test]
    fn binary_zero_length_frame() {
        let mode = FramingMode::binary(0, LengthWidth::W8, ByteOrder::Little);
        let mut decoder = FrameDecoder::new(mode);
        let frames = collect(&mut decoder, &[0, 1, b'k']);
        assert_eq!(frames, vec![Bytes::new(), Bytes::from("k")]);
    }

    #[test]
    fn ascii_length_prefix() {
        let mode = FramingMode::ascii(0, "\n").expect("valid");
        let mut decoder = FrameDecoder::new(mode);
        let frames = collect(&mut decoder, b"5\nhello3\nabc");
        assert_eq!(frames, vec![Bytes::from("hello"), Bytes::from("abc")]);
    }

    #[test]
    fn ascii_with_offset_discards_header() {
        let mode = FramingMode::ascii(2, ":").expect("valid");
        let mut decoder = FrameDecoder::new(mode);
        let frames = collect(&mut decoder, b"##4:ping");
        assert_eq!(frames, vec![Bytes::from("ping")]);
    }

    #[test]
    fn ascii_waits_for_digits_and_delimiter() {
        let mode = FramingMode::ascii(0, "\r\n").expect("valid");
        let mut decoder = FrameDecoder::new(mode);
        assert!(collect(&mut decoder, b"1").is_empty());
        assert!(collect(&mut decoder, b"2\r").is_empty());
        assert!(collect(&mut decoder, b"\nhello world").is_empty());
        let frames = collect(&mut decoder, b"!");
        assert_eq!(frames, vec![Bytes::from("hello world!")]);
    }

    #[test]
    fn ascii_bad_digits_resynchronize_on_delimiter() {
        let mode = FramingMode::ascii(0, "\n").expect("valid");
        let mut decoder = FrameDecoder::new(mode);
        decoder.extend_from_slice(b"xx\n2\nok");
        let err = decoder.decode().expect_err("bad data");
        assert_eq!(
            err,
            FrameError::BadData {
                reason: "expected ascii digits at offset",
                discarded: 3
            }
        );
        assert!(!err.is_fatal());
        assert_eq!(decoder.decode(), Ok(Some(Bytes::from("ok"))));
    }

    #[test]
    fn ascii_bad_terminator_is_reported() {
        let mode = FramingMode::ascii(0, "\n").expect("valid");
        let mut decoder = FrameDecoder::new(mode);
        decoder.extend_from_slice(b"12x");
        let err = decoder.decode().expect_err("bad data");
        assert_eq!(err.code(), crate::error::BAD_DATA);
        assert!(decoder.is_empty(), "缓冲中没有分隔符时应整体丢弃");
    }

    #[test]
    fn drain_emits_frames_before_bad_data() {
        let mode = FramingMode::ascii(0, "\n").expect("valid");
        let mut decoder = FrameDecoder::new(mode);
        let mut frames = Vec::new();
        let result = decoder.feed(b"1\naZ\n1\nb", |frame| frames.push(frame));
        assert!(matches!(result, Err(FrameError::BadData { .. })));
        assert_eq!(frames, vec![Bytes::from("a")]);
        let emitted = decoder.drain(|frame| frames.push(frame)).expect("resynced");
        assert_eq!(emitted, 1);
        assert_eq!(frames, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[test]
    fn frame_limit_is_fatal() {
        let mode = FramingMode::binary(0, LengthWidth::W8, ByteOrder::Big);
        let mut decoder = FrameDecoder::new(mode).with_max_frame_len(Some(4));
        decoder.extend_from_slice(&[9]);
        let err = decoder.decode().expect_err("too large");
        assert_eq!(err, FrameError::TooLarge { len: 9, limit: 4 });
        assert!(err.is_fatal());
    }

    #[test]
    fn unterminated_delimiter_frame_hits_limit() {
        let mut decoder =
            FrameDecoder::new(FramingMode::default()).with_max_frame_len(Some(3));
        decoder.extend_from_slice(b"abcdef");
        assert!(matches!(
            decoder.decode(),
            Err(FrameError::TooLarge { limit: 3, .. })
        ));
    }

    #[test]
    fn read_buffer_grows_when_full() {
        let mut decoder = FrameDecoder::with_capacity(FramingMode::default(), 4);
        decoder.extend_from_slice(b"abcd");
        let before = decoder.buffered();
        let buffer = decoder.read_buf_mut();
        assert!(buffer.capacity() > before, "满载后必须腾出可读空间");
        assert_eq!(buffer.len(), before);
    }

    #[test]
    fn mode_errors_surface_from_constructors() {
        assert_eq!(FramingMode::ascii(0, ""), Err(ModeError::EmptyDelimiter));
    }
}
