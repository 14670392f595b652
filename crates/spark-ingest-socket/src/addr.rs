use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::ConfigError;

/// 文件套接字地址前缀。
pub const UNIX_PREFIX: &str = "unix://";
/// 未配置 `Address` 时的默认监听地址。
pub const DEFAULT_ADDRESS: &str = ":5880";

/// 传输种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
    Unix,
}

impl Transport {
    /// 协议标识，用于日志字段。
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Unix => "unix",
        }
    }

    /// 是否为面向连接的流式传输。
    pub fn is_stream(self) -> bool {
        !matches!(self, Self::Udp)
    }
}

/// 解析后的监听端点。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 配置只提供一个地址字符串，传输种类需要结合确认策略推导：
///   确认回写依赖面向连接的传输，因此网络地址在启用确认时走 TCP，否则走 UDP；
/// - 在配置阶段就完成推导，运行期不再出现“协议未定”的中间状态。
///
/// ## 契约（What）
/// - `unix://<path>`：去掉前缀后的路径即为套接字文件，始终使用流式 Unix 套接字；
/// - 其余形式视为 `host:port`，可带可忽略的 `tcp://`/`udp://` 前缀；空主机绑定到 `0.0.0.0`；
/// - 端口必须是合法的 `u16`，否则返回 [`ConfigError::InvalidAddress`]。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(String),
    Udp(String),
    Unix(PathBuf),
}

impl Endpoint {
    /// 解析地址；`acknowledge` 为真时网络地址选择 TCP。
    pub fn parse(address: &str, acknowledge: bool) -> Result<Self, ConfigError> {
        let address = address.trim();
        if let Some(path) = address.strip_prefix(UNIX_PREFIX) {
            if path.is_empty() {
                return Err(invalid(address, "unix socket path is empty"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }

        let host_port = address
            .strip_prefix("tcp://")
            .or_else(|| address.strip_prefix("udp://"))
            .unwrap_or(address);
        let Some((host, port)) = host_port.rsplit_once(':') else {
            return Err(invalid(address, "expected host:port"));
        };
        if port.parse::<u16>().is_err() {
            return Err(invalid(address, "port is not a valid u16"));
        }
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        let normalized = format!("{host}:{port}");

        if acknowledge {
            Ok(Self::Tcp(normalized))
        } else {
            Ok(Self::Udp(normalized))
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            Self::Tcp(_) => Transport::Tcp,
            Self::Udp(_) => Transport::Udp,
            Self::Unix(_) => Transport::Unix,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "{}://{addr}", Transport::Tcp.scheme()),
            Self::Udp(addr) => write!(f, "{}://{addr}", Transport::Udp.scheme()),
            Self::Unix(path) => write!(f, "{UNIX_PREFIX}{}", path.display()),
        }
    }
}

fn invalid(address: &str, reason: &'static str) -> ConfigError {
    ConfigError::InvalidAddress {
        address: address.to_owned(),
        reason,
    }
}

/// 实际绑定成功后的本地端点。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalEndpoint {
    Inet(SocketAddr),
    Unix(PathBuf),
}

impl LocalEndpoint {
    /// 网络端点的套接字地址；Unix 端点返回 `None`。
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Inet(addr) => Some(*addr),
            Self::Unix(_) => None,
        }
    }
}

impl fmt::Display for LocalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{addr}"),
            Self::Unix(path) => write!(f, "{UNIX_PREFIX}{}", path.display()),
        }
    }
}
