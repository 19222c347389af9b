//! 监听地址解析与对外地址推导。

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use url::Url;

use crate::error::ServerError;

/// 已解析的对外地址
#[derive(Debug, Clone)]
pub(crate) struct Resolved {
    pub(crate) url: Url,
    /// 写入 Transport 的字符串形式，例如 `http://127.0.0.1:8000`
    pub(crate) display: String,
    pub(crate) local_addr: SocketAddr,
}

impl Resolved {
    /// `display` 总是带端口：`Url` 会省略协议默认端口（例如 `https` 的 443），
    /// 这里用 `port_or_known_default` 补回。
    pub(crate) fn new(url: Url, local_addr: SocketAddr) -> Self {
        let display = match (url.host_str(), url.port_or_known_default()) {
            (Some(host), Some(port))
                if url.path() == "/" && url.query().is_none() && url.fragment().is_none() =>
            {
                format!("{}://{host}:{port}", url.scheme())
            }
            _ => url.to_string(),
        };
        Self {
            url,
            display,
            local_addr,
        }
    }
}

/// 把 `network` + `address`（例如 `tcp` + `:8000`）解析为可绑定的地址。
pub(crate) fn bind_addr(network: &str, address: &str) -> io::Result<SocketAddr> {
    let (host, port) = split_host_port(address)?;
    let host = match (host, network) {
        ("", "tcp6" | "udp6") => "::",
        ("", _) => "0.0.0.0",
        (host, _) => host,
    };
    let want_v4 = matches!(network, "tcp4" | "udp4");
    let want_v6 = matches!(network, "tcp6" | "udp6");
    if !matches!(network, "tcp" | "tcp4" | "tcp6" | "udp" | "udp4" | "udp6") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported network {network:?}"),
        ));
    }
    (host, port)
        .to_socket_addrs()?
        .find(|addr| (!want_v4 || addr.is_ipv4()) && (!want_v6 || addr.is_ipv6()))
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network} address for {address:?}"),
            )
        })
}

/// 拆分 `host:port`，支持 `[::1]:80` 与省略主机的 `:80`；空地址视为 `:0`。
pub(crate) fn split_host_port(address: &str) -> io::Result<(&str, u16)> {
    if address.is_empty() {
        return Ok(("", 0));
    }
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid address {address:?}"),
        )
    };
    let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let port = if port.is_empty() {
        0
    } else {
        port.parse().map_err(|_| invalid())?
    };
    Ok((host, port))
}

/// 推导对外暴露的 `host:port`。
///
/// 配置了具体主机时直接使用；通配地址时取监听到的具体地址，仍为通配则取本机出口地址。
/// 端口始终取实际监听的端口。
pub(crate) fn extract_authority(address: &str, bound: SocketAddr) -> String {
    let configured = split_host_port(address)
        .map(|(host, _)| host)
        .unwrap_or_default();
    let host = match configured.parse::<IpAddr>() {
        Ok(ip) if !ip.is_unspecified() => ip.to_string(),
        Err(_) if !configured.is_empty() => configured.to_string(),
        _ if !bound.ip().is_unspecified() => bound.ip().to_string(),
        _ => outbound_ip().to_string(),
    };
    if host.contains(':') {
        format!("[{host}]:{}", bound.port())
    } else {
        format!("{host}:{}", bound.port())
    }
}

/// 通过 UDP connect 取出口网卡地址，不发送任何数据包；失败时回退到回环地址。
fn outbound_ip() -> IpAddr {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| {
            socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

pub(crate) fn resolve(
    address: &str,
    bound: SocketAddr,
    secure: bool,
    explicit: Option<&Url>,
) -> Result<Resolved, ServerError> {
    if let Some(url) = explicit {
        return Ok(Resolved::new(url.clone(), bound));
    }
    let scheme = if secure { "https" } else { "http" };
    let authority = extract_authority(address, bound);
    let raw = format!("{scheme}://{authority}");
    let url = Url::parse(&raw).map_err(|e| ServerError::Endpoint {
        address: address.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Resolved::new(url, bound))
}
