/// SOCKS5 协议实现（服务端，仅 CONNECT）
///
/// RFC 1928: https://www.rfc-editor.org/rfc/rfc1928
///
/// 关键点：
/// 1. 域名透传（不做本地 DNS 解析，由远端拨号）
/// 2. 端口为 Big-Endian
/// 3. 任何畸形输入立即失败，不再继续读取

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// SOCKS5 版本号
pub const SOCKS5_VERSION: u8 = 0x05;

/// 认证方法：无认证
const NO_AUTH: u8 = 0x00;

/// CONNECT 命令
const CMD_CONNECT: u8 = 0x01;

/// 地址类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    IPv4 = 0x01,
    Domain = 0x03,
    IPv6 = 0x04,
}

/// 固定的成功响应：绑定地址 0.0.0.0:0
///
/// 真实连接在远端异步建立，本地无法给出真实的绑定地址。
pub const SUCCESS_REPLY: [u8; 10] = [
    SOCKS5_VERSION,
    0x00, // Succeeded
    0x00, // Reserved
    AddressType::IPv4 as u8,
    0, 0, 0, 0, // 0.0.0.0
    0, 0, // Port 0
];

/// 目标地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr, u16),
    /// 域名，原样转发
    Domain(String, u16),
    Ipv6(Ipv6Addr, u16),
}

impl TargetAddr {
    /// 序列化为 SOCKS5 地址格式（ATYP + ADDR + PORT）
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            TargetAddr::Ipv4(ip, port) => {
                buf.push(AddressType::IPv4 as u8);
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            TargetAddr::Domain(domain, port) => {
                buf.push(AddressType::Domain as u8);
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
            TargetAddr::Ipv6(ip, port) => {
                buf.push(AddressType::IPv6 as u8);
                buf.extend_from_slice(&ip.octets());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }

        buf
    }

    /// 从字节流读取（ATYP + ADDR + PORT）
    pub async fn from_reader<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let atyp = reader.read_u8().await?;

        match atyp {
            0x01 => {
                let mut ip_bytes = [0u8; 4];
                reader.read_exact(&mut ip_bytes).await?;
                let port = reader.read_u16().await?;
                Ok(TargetAddr::Ipv4(Ipv4Addr::from(ip_bytes), port))
            }
            0x03 => {
                let len = reader.read_u8().await?;
                if len == 0 {
                    return Err(Error::Protocol("Empty domain name".into()));
                }
                let mut domain_bytes = vec![0u8; len as usize];
                reader.read_exact(&mut domain_bytes).await?;
                let domain = String::from_utf8(domain_bytes)
                    .map_err(|_| Error::Protocol("Domain name is not valid UTF-8".into()))?;
                let port = reader.read_u16().await?;
                Ok(TargetAddr::Domain(domain, port))
            }
            0x04 => {
                let mut ip_bytes = [0u8; 16];
                reader.read_exact(&mut ip_bytes).await?;
                let port = reader.read_u16().await?;
                Ok(TargetAddr::Ipv6(Ipv6Addr::from(ip_bytes), port))
            }
            other => Err(Error::UnsupportedAddressType(other)),
        }
    }
}

/// `host:port` 形式，IPv6 带方括号
impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
            TargetAddr::Ipv6(ip, port) => write!(f, "[{}]:{}", ip, port),
        }
    }
}

/// 方法协商：忽略客户端提供的方法，总是选择无认证
pub async fn negotiate_method<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await?;
    if version != SOCKS5_VERSION {
        return Err(Error::Protocol(format!("Invalid SOCKS version: {}", version)));
    }

    let nmethods = stream.read_u8().await?;
    let mut methods = vec![0u8; nmethods as usize];
    stream.read_exact(&mut methods).await?;
    trace!("SOCKS5 client methods: {:?}", methods);

    stream.write_all(&[SOCKS5_VERSION, NO_AUTH]).await?;
    stream.flush().await?;
    Ok(())
}

/// 读取 CONNECT 请求，返回目标地址
pub async fn read_request<R>(stream: &mut R) -> Result<TargetAddr>
where
    R: AsyncRead + Unpin,
{
    let version = stream.read_u8().await?;
    if version != SOCKS5_VERSION {
        return Err(Error::Protocol(format!("Invalid SOCKS version: {}", version)));
    }

    let cmd = stream.read_u8().await?;
    if cmd != CMD_CONNECT {
        return Err(Error::UnsupportedCommand(cmd));
    }

    let _rsv = stream.read_u8().await?;
    TargetAddr::from_reader(stream).await
}

/// SOCKS5 握手
///
/// 成功时已经向客户端写出固定的成功响应。失败时不再写任何数据。
pub async fn socks5_handshake<S>(stream: &mut S) -> Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate_method(stream).await?;
    let target = read_request(stream).await?;

    stream.write_all(&SUCCESS_REPLY).await?;
    stream.flush().await?;

    debug!("SOCKS5 CONNECT: {}", target);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};
    use tokio::time::timeout;

    /// 在内存管道上运行握手，客户端写入 `input` 后保持连接打开
    async fn run_handshake(input: &[u8]) -> (Result<TargetAddr>, Vec<u8>, DuplexStream) {
        let (mut client, mut server) = duplex(4096);
        client.write_all(input).await.unwrap();

        let result = timeout(Duration::from_secs(2), socks5_handshake(&mut server))
            .await
            .expect("handshake blocked on a read it should not have made");
        drop(server);

        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        (result, written, client)
    }

    fn connect_request(target: &TargetAddr) -> Vec<u8> {
        let mut bytes = vec![0x05, 0x01, 0x00, 0x05, 0x01, 0x00];
        bytes.extend_from_slice(&target.to_bytes());
        bytes
    }

    #[tokio::test]
    async fn test_connect_ipv4_scenario() {
        let input = [
            0x05, 0x01, 0x00, // greeting
            0x05, 0x01, 0x00, 0x01, 0x7f, 0x00, 0x00, 0x01, 0x00, 0x50, // CONNECT 127.0.0.1:80
        ];
        let (result, written, _client) = run_handshake(&input).await;

        assert_eq!(result.unwrap().to_string(), "127.0.0.1:80");
        assert_eq!(
            written,
            [0x05, 0x00, 0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[tokio::test]
    async fn test_connect_domain_and_ipv6() {
        let cases = [
            (TargetAddr::Domain("example.com".into(), 443), "example.com:443"),
            (TargetAddr::Ipv6(Ipv6Addr::LOCALHOST, 8080), "[::1]:8080"),
            (
                TargetAddr::Ipv6("2001:db8::42".parse().unwrap(), 1),
                "[2001:db8::42]:1",
            ),
            (TargetAddr::Ipv4(Ipv4Addr::new(10, 1, 2, 3), 65535), "10.1.2.3:65535"),
        ];

        for (target, expected) in cases {
            let (result, written, _client) = run_handshake(&connect_request(&target)).await;
            let parsed = result.unwrap();
            assert_eq!(parsed, target);
            assert_eq!(parsed.to_string(), expected);
            assert_eq!(&written[2..], &SUCCESS_REPLY);
        }
    }

    #[tokio::test]
    async fn test_offered_methods_are_ignored() {
        // 客户端只提供用户名/密码认证，仍然回复无认证
        let mut input = vec![0x05, 0x02, 0x02, 0x80];
        input.extend_from_slice(&[0x05, 0x01, 0x00]);
        input.extend_from_slice(&TargetAddr::Domain("a.b".into(), 1).to_bytes());

        let (result, written, _client) = run_handshake(&input).await;
        assert!(result.is_ok());
        assert_eq!(&written[..2], &[0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_bad_greeting_version() {
        let (result, written, _client) = run_handshake(&[0x04]).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(written.is_empty());
    }

    #[tokio::test]
    async fn test_bad_request_version() {
        let (result, written, _client) = run_handshake(&[0x05, 0x01, 0x00, 0x04]).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(written, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        // BIND 和 UDP ASSOCIATE 都拒绝，且不读取后续字节
        for cmd in [0x02, 0x03, 0x7f] {
            let (result, written, _client) =
                run_handshake(&[0x05, 0x01, 0x00, 0x05, cmd]).await;
            assert!(matches!(result, Err(Error::UnsupportedCommand(c)) if c == cmd));
            assert_eq!(written, [0x05, 0x00]);
        }
    }

    #[tokio::test]
    async fn test_unsupported_address_type() {
        let (result, written, _client) =
            run_handshake(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x02]).await;
        assert!(matches!(result, Err(Error::UnsupportedAddressType(0x02))));
        assert_eq!(written, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_empty_domain() {
        let (result, _, _client) =
            run_handshake(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x03, 0x00]).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_truncated_request() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x05, 0x01, 0x00, 0x05, 0x01, 0x00, 0x01, 127]).await.unwrap();
        drop(client);

        let result = socks5_handshake(&mut server).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_endianness() {
        let target = TargetAddr::Ipv4(Ipv4Addr::new(1, 2, 3, 4), 443);
        let bytes = target.to_bytes();
        assert_eq!(&bytes[5..], &[0x01, 0xBB]);
    }
}
