/// 地址解析工具

use std::net::Ipv6Addr;

use crate::error::{Error, Result};

/// 主机名最大长度（DNS 限制）
const MAX_HOST_LEN: usize = 255;

/// 解析 "host:port" 字符串
///
/// IPv6 地址必须带方括号，如 `[::1]:443`。返回的 host 保留方括号，
/// 这样 `format!("{}:{}", host, port)` 可以还原原始字符串。
pub fn split_host_port(addr: &str) -> Result<(&str, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("missing port in {:?}", addr)))?;

    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Config(format!("invalid port in {:?}", addr)));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Config(format!("port out of range in {:?}", addr)))?;

    if host.is_empty() {
        return Err(Error::Config(format!("empty host in {:?}", addr)));
    }
    if host.len() > MAX_HOST_LEN {
        return Err(Error::Config(format!("host too long ({} bytes)", host.len())));
    }
    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::Config(format!("invalid character in host {:?}", host)));
    }

    if let Some(inner) = host.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| Error::Config(format!("unterminated IPv6 literal {:?}", host)))?;
        inner
            .parse::<Ipv6Addr>()
            .map_err(|_| Error::Config(format!("invalid IPv6 literal {:?}", host)))?;
    } else if host.contains(':') || host.contains(']') {
        return Err(Error::Config(format!("IPv6 host must be bracketed: {:?}", addr)));
    }

    Ok((host, port))
}
