use bytes::Bytes;
use thiserror::Error;

/// 默认分隔符：单个换行符。
pub const DEFAULT_DELIMITER: &[u8] = b"\n";

/// 二进制长度前缀的字节序。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// 小端序，对应 `binary` 与 `binary_le` 分区器。
    Little,
    /// 大端序，对应 `binary_be` 分区器。
    Big,
}

/// 二进制长度前缀的宽度，仅允许 1/2/4/8 字节。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LengthWidth {
    W8,
    W16,
    W32,
    W64,
}

impl LengthWidth {
    /// 由字节数构造宽度；不受支持的取值返回 [`ModeError::UnsupportedWidth`]。
    pub fn from_bytes(size: usize) -> Result<Self, ModeError> {
        match size {
            1 => Ok(Self::W8),
            2 => Ok(Self::W16),
            4 => Ok(Self::W32),
            8 => Ok(Self::W64),
            other => Err(ModeError::UnsupportedWidth(other)),
        }
    }

    /// 长度字段所占字节数。
    pub const fn bytes(self) -> usize {
        match self {
            Self::W8 => 1,
            Self::W16 => 2,
            Self::W32 => 4,
            Self::W64 => 8,
        }
    }

    /// 按给定字节序读取长度字段。
    ///
    /// 调用方需保证 `field.len() == self.bytes()`。
    pub(crate) fn read(self, field: &[u8], order: ByteOrder) -> u64 {
        let mut raw = [0u8; 8];
        let width = self.bytes();
        match order {
            ByteOrder::Little => {
                raw[..width].copy_from_slice(&field[..width]);
                u64::from_le_bytes(raw)
            }
            ByteOrder::Big => {
                raw[8 - width..].copy_from_slice(&field[..width]);
                u64::from_be_bytes(raw)
            }
        }
    }
}

/// 分帧模式：在配置阶段一次性确定，运行期不可变。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以封闭的标签联合替代“标志位组合”，让非法组合（例如 fixed + 大端序）在类型层面无法表达；
/// - 每个变体只携带自己需要的参数，解码器据此选择算法分支，无需运行期再做参数校验。
///
/// ## 契约（What）
/// - `Delimiter`：按分隔符切分，分隔符不计入帧；
/// - `AsciiLengthPrefixed`：从 `offset` 起读取十进制数字直到分隔符，随后的 `length` 字节为负载；
/// - `BinaryLengthPrefixed`：从 `offset` 起读取定宽整数作为负载长度，长度字段不计入帧；
/// - `FixedSize`：每帧恰好 `size` 字节，首尾相接。
///
/// ## 注意事项（Trade-offs）
/// - `offset` 之前的字节在 ASCII/二进制模式下被视为头部噪声直接丢弃，不会出现在帧中。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramingMode {
    Delimiter {
        delimiter: Bytes,
    },
    AsciiLengthPrefixed {
        offset: usize,
        delimiter: Bytes,
    },
    BinaryLengthPrefixed {
        offset: usize,
        width: LengthWidth,
        order: ByteOrder,
    },
    FixedSize {
        size: usize,
    },
}

impl FramingMode {
    /// 构造分隔符模式，空分隔符无法定位帧边界，因此被拒绝。
    pub fn delimiter(delimiter: impl Into<Bytes>) -> Result<Self, ModeError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(ModeError::EmptyDelimiter);
        }
        Ok(Self::Delimiter { delimiter })
    }

    /// 构造 ASCII 长度前缀模式。
    ///
    /// 分隔符同时充当坏帧后的重同步锚点，因此同样不允许为空。
    pub fn ascii(offset: usize, delimiter: impl Into<Bytes>) -> Result<Self, ModeError> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(ModeError::EmptyDelimiter);
        }
        Ok(Self::AsciiLengthPrefixed { offset, delimiter })
    }

    /// 构造二进制长度前缀模式。
    pub fn binary(offset: usize, width: LengthWidth, order: ByteOrder) -> Self {
        Self::BinaryLengthPrefixed {
            offset,
            width,
            order,
        }
    }

    /// 构造定长模式，长度为 0 的帧没有意义。
    pub fn fixed(size: usize) -> Result<Self, ModeError> {
        if size == 0 {
            return Err(ModeError::ZeroSize);
        }
        Ok(Self::FixedSize { size })
    }

    /// 稳定的模式名称，用于日志字段与错误信息。
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delimiter { .. } => "delimiter",
            Self::AsciiLengthPrefixed { .. } => "ascii",
            Self::BinaryLengthPrefixed {
                order: ByteOrder::Little,
                ..
            } => "binary_le",
            Self::BinaryLengthPrefixed {
                order: ByteOrder::Big,
                ..
            } => "binary_be",
            Self::FixedSize { .. } => "fixed",
        }
    }
}

impl Default for FramingMode {
    fn default() -> Self {
        Self::Delimiter {
            delimiter: Bytes::from_static(DEFAULT_DELIMITER),
        }
    }
}

/// 构造 [`FramingMode`] 时的参数错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    #[error("delimiter must not be empty")]
    EmptyDelimiter,
    #[error("fixed frame size must be greater than zero")]
    ZeroSize,
    #[error("binary length width {0} is not supported (expected 1, 2, 4 or 8)")]
    UnsupportedWidth(usize),
}

/// 展开配置字符串中的 `\n`、`\r`、`\t` 转义字面量。
///
/// 其余反斜杠序列原样保留。
pub fn expand_escapes(raw: &str) -> String {
    raw.replace("\\n", "\n")
        .replace("\\r", "\r")
        .replace("\\t", "\t")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_reads_both_byte_orders() {
        assert_eq!(LengthWidth::W16.read(&[0x01, 0x02], ByteOrder::Little), 0x0201);
        assert_eq!(LengthWidth::W16.read(&[0x01, 0x02], ByteOrder::Big), 0x0102);
        assert_eq!(LengthWidth::W8.read(&[0xff], ByteOrder::Big), 0xff);
        assert_eq!(
            LengthWidth::W64.read(&[0, 0, 0, 0, 0, 0, 0, 7], ByteOrder::Big),
            7
        );
    }

    #[test]
    fn unsupported_width_is_rejected() {
        assert_eq!(
            LengthWidth::from_bytes(3),
            Err(ModeError::UnsupportedWidth(3))
        );
    }

    #[test]
    fn escapes_expand_control_sequences() {
        assert_eq!(expand_escapes("\\r\\n"), "\r\n");
        assert_eq!(expand_escapes("a\\tb"), "a\tb");
        assert_eq!(expand_escapes("\\x"), "\\x");
    }

    #[test]
    fn empty_delimiter_and_zero_size_fail() {
        assert_eq!(FramingMode::delimiter(""), Err(ModeError::EmptyDelimiter));
        assert_eq!(FramingMode::fixed(0), Err(ModeError::ZeroSize));
    }
}
