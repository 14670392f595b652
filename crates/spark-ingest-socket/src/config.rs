use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use spark_codec_frame::{ByteOrder, FramingMode, LengthWidth, expand_escapes};

use crate::addr::{DEFAULT_ADDRESS, Endpoint};
use crate::error::ConfigError;

const NEGATIVE_ACK_PREFIX: &str = "NOT ";

/// 套接字接入的原始配置，键名与部署文件保持一致。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 部署文件沿用 `Address`、`Partitioner` 等 PascalCase 键名，
///   结构体通过 `serde(rename_all)` 直接映射，未知键（例如插件类型、路由名）被忽略；
/// - 原始配置只做反序列化，所有校验集中在 [`SocketConsumerConfig::resolve`]，
///   保证非法配置在打开任何套接字之前失败。
///
/// ## 契约（What）
/// - 默认值：`Address=":5880"`、`Partitioner="delimiter"`、`Delimiter="\n"`、`Offset=0`、
///   `Size` 对二进制模式为 4、对定长模式为 1、`Acknowledge=""`、
///   `ReconnectAfterSec=2`、`AckTimoutSec=2`、`ReadTimoutSec=5`、
///   `Permissions="0770"`、`RemoveOldSocket=true`；
/// - 加固项：`MaxFrameSize=0`（不限制）、`MaxFrameErrors=16`；
/// - 兼容项：`Runlength=true` 等价于 `Partitioner="ascii"`。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", default)]
pub struct SocketConsumerConfig {
    pub address: String,
    pub partitioner: String,
    pub delimiter: String,
    pub offset: usize,
    pub size: Option<usize>,
    pub acknowledge: String,
    pub reconnect_after_sec: u64,
    // 键名拼写与既有部署文件保持一致。
    #[serde(rename = "AckTimoutSec")]
    pub ack_timeout_sec: u64,
    #[serde(rename = "ReadTimoutSec")]
    pub read_timeout_sec: u64,
    pub permissions: String,
    pub remove_old_socket: bool,
    pub max_frame_size: usize,
    pub max_frame_errors: u32,
    pub runlength: bool,
}

impl Default for SocketConsumerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_owned(),
            partitioner: "delimiter".to_owned(),
            delimiter: "\n".to_owned(),
            offset: 0,
            size: None,
            acknowledge: String::new(),
            reconnect_after_sec: 2,
            ack_timeout_sec: 2,
            read_timeout_sec: 5,
            permissions: "0770".to_owned(),
            remove_old_socket: true,
            max_frame_size: 0,
            max_frame_errors: 16,
            runlength: false,
        }
    }
}

impl SocketConsumerConfig {
    /// 从 TOML 文本反序列化。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// 读取并反序列化 TOML 配置文件。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_partitioner(mut self, partitioner: impl Into<String>) -> Self {
        self.partitioner = partitioner.into();
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_acknowledge(mut self, acknowledge: impl Into<String>) -> Self {
        self.acknowledge = acknowledge.into();
        self
    }

    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = permissions.into();
        self
    }

    pub fn with_remove_old_socket(mut self, remove: bool) -> Self {
        self.remove_old_socket = remove;
        self
    }

    /// 校验并解析为运行期配置。
    ///
    /// # 教案级注释
    ///
    /// ## 逻辑（How）
    /// 1. 展开分隔符中的 `\n`/`\r`/`\t` 转义；
    /// 2. 按分区器名称（大小写不敏感）构造 [`FramingMode`]，参数非法时立即失败；
    /// 3. 结合确认策略解析地址，推导传输种类；
    /// 4. 以八进制解析 `Permissions`。
    ///
    /// ## 契约（What）
    /// - 返回的 [`ResolvedConfig`] 不再包含任何未校验字段；
    /// - 错误一律为 [`ConfigError`]，此时尚未打开任何套接字。
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        let delimiter = Bytes::from(expand_escapes(&self.delimiter));
        let framing = self.framing_mode(delimiter)?;
        let ack = AckPolicy::new(
            &self.acknowledge,
            Duration::from_secs(self.ack_timeout_sec),
        );
        let endpoint = Endpoint::parse(&self.address, ack.is_enabled())?;
        let permissions = parse_permissions(&self.permissions)?;

        Ok(ResolvedConfig {
            endpoint,
            framing,
            ack,
            read_timeout: Duration::from_secs(self.read_timeout_sec),
            reconnect_after: Duration::from_secs(self.reconnect_after_sec),
            unix: UnixSocketPolicy {
                permissions,
                remove_stale: self.remove_old_socket,
            },
            limits: Limits {
                max_frame_size: (self.max_frame_size > 0).then_some(self.max_frame_size),
                max_frame_errors: self.max_frame_errors,
            },
        })
    }

    fn framing_mode(&self, delimiter: Bytes) -> Result<FramingMode, ConfigError> {
        let mut partitioner = self.partitioner.to_ascii_lowercase();
        if self.runlength && partitioner == "delimiter" {
            partitioner = "ascii".to_owned();
        }
        let mode = match partitioner.as_str() {
            "delimiter" => FramingMode::delimiter(delimiter)?,
            "ascii" => FramingMode::ascii(self.offset, delimiter)?,
            "binary" | "binary_le" => FramingMode::binary(
                self.offset,
                LengthWidth::from_bytes(self.size.unwrap_or(4))?,
                ByteOrder::Little,
            ),
            "binary_be" => FramingMode::binary(
                self.offset,
                LengthWidth::from_bytes(self.size.unwrap_or(4))?,
                ByteOrder::Big,
            ),
            "fixed" => FramingMode::fixed(self.size.unwrap_or(1))?,
            _ => return Err(ConfigError::UnknownPartitioner(self.partitioner.clone())),
        };
        Ok(mode)
    }
}

fn parse_permissions(raw: &str) -> Result<u32, ConfigError> {
    let mode = u32::from_str_radix(raw.trim(), 8).map_err(|source| {
        ConfigError::InvalidPermissions {
            value: raw.to_owned(),
            source,
        }
    })?;
    if mode > 0o7777 {
        return Err(ConfigError::PermissionsOutOfRange(mode));
    }
    Ok(mode)
}

/// 确认回写策略。
///
/// 未配置确认串时不产生任何回写流量。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckPolicy {
    success: Option<Bytes>,
    failure: Option<Bytes>,
    timeout: Duration,
}

impl AckPolicy {
    /// 以确认串与写超时构造策略，空串表示禁用。
    pub fn new(acknowledge: &str, timeout: Duration) -> Self {
        if acknowledge.is_empty() {
            return Self::disabled();
        }
        Self {
            success: Some(Bytes::copy_from_slice(acknowledge.as_bytes())),
            failure: Some(Bytes::from(format!("{NEGATIVE_ACK_PREFIX}{acknowledge}"))),
            timeout,
        }
    }

    pub fn disabled() -> Self {
        Self {
            success: None,
            failure: None,
            timeout: Duration::from_secs(2),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.success.is_some()
    }

    /// 成功时回写的字节，原样发送，不追加分隔符。
    pub fn success(&self) -> Option<&Bytes> {
        self.success.as_ref()
    }

    /// 失败时回写的字节：`"NOT " + 确认串`。
    pub fn failure(&self) -> Option<&Bytes> {
        self.failure.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Unix 套接字文件的卫生策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnixSocketPolicy {
    /// 绑定成功后设置的权限位。
    pub permissions: u32,
    /// 绑定因文件已存在失败时，是否尝试清理残留文件。
    pub remove_stale: bool,
}

/// 单连接的加固限制。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// 单帧长度上限，`None` 表示不限制。
    pub max_frame_size: Option<usize>,
    /// 同一连接上允许的连续坏帧数，超出即断开。
    pub max_frame_errors: u32,
}

/// 校验后的运行期配置，构造后不可变。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub endpoint: Endpoint,
    pub framing: FramingMode,
    pub ack: AckPolicy,
    pub read_timeout: Duration,
    pub reconnect_after: Duration,
    pub unix: UnixSocketPolicy,
    pub limits: Limits,
}

impl ResolvedConfig {
    /// 覆盖读超时，主要供测试缩短等待。
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// 覆盖重连退避间隔。
    pub fn with_reconnect_after(mut self, backoff: Duration) -> Self {
        self.reconnect_after = backoff;
        self
    }

    /// 覆盖确认写超时。
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack.timeout = timeout;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Transport;
    use std::path::PathBuf;

    #[test]
    fn defaults_match_documented_values() {
        let resolved = SocketConsumerConfig::default().resolve().expect("resolve");
        assert_eq!(resolved.endpoint, Endpoint::Udp("0.0.0.0:5880".into()));
        assert_eq!(resolved.framing, FramingMode::default());
        assert!(!resolved.ack.is_enabled());
        assert_eq!(resolved.read_timeout, Duration::from_secs(5));
        assert_eq!(resolved.reconnect_after, Duration::from_secs(2));
        assert_eq!(resolved.ack.timeout(), Duration::from_secs(2));
        assert_eq!(resolved.unix.permissions, 0o770);
        assert!(resolved.unix.remove_stale);
        assert_eq!(resolved.limits.max_frame_size, None);
    }

    #[test]
    fn toml_keys_use_deployment_names() {
        let raw = r#"
            Type = "consumer.Socket"
            Address = "unix:///tmp/spark.socket"
            Partitioner = "BINARY_BE"
            Size = 2
            Offset = 3
            Acknowledge = "OK"
            AckTimoutSec = 7
            ReadTimoutSec = 9
            Permissions = "0600"
            RemoveOldSocket = false
        "#;
        let config = SocketConsumerConfig::from_toml_str(raw).expect("parse");
        let resolved = config.resolve().expect("resolve");
        assert_eq!(
            resolved.endpoint,
            Endpoint::Unix(PathBuf::from("/tmp/spark.socket"))
        );
        assert_eq!(
            resolved.framing,
            FramingMode::binary(3, LengthWidth::W16, ByteOrder::Big)
        );
        assert_eq!(resolved.ack.success().map(|b| &b[..]), Some(&b"OK"[..]));
        assert_eq!(resolved.ack.failure().map(|b| &b[..]), Some(&b"NOT OK"[..]));
        assert_eq!(resolved.ack.timeout(), Duration::from_secs(7));
        assert_eq!(resolved.read_timeout, Duration::from_secs(9));
        assert_eq!(resolved.unix.permissions, 0o600);
        assert!(!resolved.unix.remove_stale);
    }

    #[test]
    fn delimiter_escapes_are_expanded() {
        let config = SocketConsumerConfig::default().with_delimiter("\\r\\n");
        let resolved = config.resolve().expect("resolve");
        assert_eq!(
            resolved.framing,
            FramingMode::delimiter(&b"\r\n"[..]).expect("mode")
        );
    }

    #[test]
    fn fixed_size_defaults_to_one() {
        let config = SocketConsumerConfig::default().with_partitioner("fixed");
        let resolved = config.resolve().expect("resolve");
        assert_eq!(resolved.framing, FramingMode::FixedSize { size: 1 });
    }

    #[test]
    fn runlength_maps_to_ascii() {
        let config = SocketConsumerConfig {
            runlength: true,
            ..SocketConsumerConfig::default()
        };
        let resolved = config.resolve().expect("resolve");
        assert_eq!(resolved.framing.name(), "ascii");
    }

    #[test]
    fn overrides_only_touch_their_field() {
        let resolved = SocketConsumerConfig::default()
            .with_acknowledge("OK")
            .resolve()
            .expect("resolve");
        let tuned = resolved
            .clone()
            .with_ack_timeout(Duration::from_millis(250))
            .with_reconnect_after(Duration::from_millis(10));
        assert_eq!(tuned.ack.timeout(), Duration::from_millis(250));
        assert_eq!(tuned.ack.success(), resolved.ack.success());
        assert_eq!(tuned.reconnect_after, Duration::from_millis(10));
        assert_eq!(tuned.read_timeout, resolved.read_timeout);
    }

    #[test]
    fn acknowledge_selects_tcp() {
        let resolved = SocketConsumerConfig::default()
            .with_address("127.0.0.1:0")
            .with_acknowledge("OK")
            .resolve()
            .expect("resolve");
        assert_eq!(resolved.endpoint.transport(), Transport::Tcp);
    }

    #[test]
    fn configuration_errors_fail_fast() {
        let unknown = SocketConsumerConfig::default().with_partitioner("zstd");
        assert!(matches!(
            unknown.resolve(),
            Err(ConfigError::UnknownPartitioner(name)) if name == "zstd"
        ));

        let bad_size = SocketConsumerConfig::default()
            .with_partitioner("binary")
            .with_size(3);
        assert!(matches!(bad_size.resolve(), Err(ConfigError::InvalidMode(_))));

        let bad_permissions = SocketConsumerConfig::default().with_permissions("rwx");
        assert!(matches!(
            bad_permissions.resolve(),
            Err(ConfigError::InvalidPermissions { .. })
        ));

        let out_of_range = SocketConsumerConfig::default().with_permissions("17777");
        assert!(matches!(
            out_of_range.resolve(),
            Err(ConfigError::PermissionsOutOfRange(_))
        ));

        let empty_delimiter = SocketConsumerConfig::default().with_delimiter("");
        assert!(matches!(
            empty_delimiter.resolve(),
            Err(ConfigError::InvalidMode(_))
        ));
    }
}
