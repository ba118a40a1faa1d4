//! 配置
//!
//! 配置文件（TOML）先反序列化为 `LocalFile` / `RemoteFile`，
//! 启动时校验一次得到不可变的 `LocalConfig` / `RemoteConfig`。

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// 本地（客户端）配置，校验后不可变
#[derive(Debug, Clone)]
pub struct LocalConfig {
    /// SOCKS5 监听地址
    pub listen_addr: SocketAddr,

    /// 远端 WebSocket 地址（ws:// 或 wss://）
    pub server_url: Url,

    /// WebSocket Origin 头
    pub origin: Option<String>,

    /// 额外信任的 CA 证书（自签名服务端）
    pub ca_cert: Option<PathBuf>,

    /// 隧道拨号超时
    pub connect_timeout: Duration,
}

/// 远端（服务端）配置，校验后不可变
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// 隧道监听地址
    pub listen_addr: SocketAddr,

    /// WebSocket 路径
    pub path: String,

    /// TLS 证书和私钥；为空时使用明文 ws
    pub tls: Option<TlsFiles>,

    /// 目标拨号超时
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// 客户端配置文件
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalFile {
    #[serde(default = "default_local_listen")]
    pub listen_addr: String,

    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub origin: Option<String>,

    #[serde(default)]
    pub ca_cert: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// 服务端配置文件
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteFile {
    #[serde(default = "default_remote_listen")]
    pub listen_addr: String,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default)]
    pub tls_cert: Option<PathBuf>,

    #[serde(default)]
    pub tls_key: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for LocalFile {
    fn default() -> Self {
        Self {
            listen_addr: default_local_listen(),
            server_url: String::new(),
            origin: None,
            ca_cert: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for RemoteFile {
    fn default() -> Self {
        Self {
            listen_addr: default_remote_listen(),
            path: default_path(),
            tls_cert: None,
            tls_key: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

// 默认值函数
fn default_local_listen() -> String {
    "127.0.0.1:10801".to_string()
}

fn default_remote_listen() -> String {
    "0.0.0.0:23333".to_string()
}

fn default_path() -> String {
    "/websocks".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

/// 读取配置文件；文件不存在时返回默认值
fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Config(format!("Failed to read {}: {}", path.display(), e))),
    }
}

fn parse_listen(addr: &str) -> Result<SocketAddr> {
    addr.parse()
        .map_err(|_| Error::Config(format!("Invalid listen address: {}", addr)))
}

fn parse_timeout(secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::Config("connect_timeout_secs must be positive".into()));
    }
    Ok(Duration::from_secs(secs))
}

impl LocalFile {
    pub fn load(path: &Path) -> Result<Self> {
        match read_optional(path)? {
            Some(content) => Ok(toml::from_str(&content)?),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(self) -> Result<LocalConfig> {
        let listen_addr = parse_listen(&self.listen_addr)?;

        if self.server_url.is_empty() {
            return Err(Error::Config("server_url is required".into()));
        }
        let server_url = Url::parse(&self.server_url)
            .map_err(|e| Error::Config(format!("Invalid server_url {}: {}", self.server_url, e)))?;
        if !matches!(server_url.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!(
                "server_url must use ws:// or wss://, got {}",
                server_url.scheme()
            )));
        }
        if server_url.host_str().is_none() {
            return Err(Error::Config("server_url has no host".into()));
        }

        let origin = match self.origin {
            Some(origin) if origin.trim().is_empty() => None,
            other => other,
        };

        Ok(LocalConfig {
            listen_addr,
            server_url,
            origin,
            ca_cert: self.ca_cert,
            connect_timeout: parse_timeout(self.connect_timeout_secs)?,
        })
    }
}

impl RemoteFile {
    pub fn load(path: &Path) -> Result<Self> {
        match read_optional(path)? {
            Some(content) => Ok(toml::from_str(&content)?),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(self) -> Result<RemoteConfig> {
        let listen_addr = parse_listen(&self.listen_addr)?;

        if !self.path.starts_with('/') {
            return Err(Error::Config(format!("path must start with '/': {}", self.path)));
        }

        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsFiles { cert_path, key_path }),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "tls_cert and tls_key must be set together".into(),
                ))
            }
        };

        Ok(RemoteConfig {
            listen_addr,
            path: self.path,
            tls,
            connect_timeout: parse_timeout(self.connect_timeout_secs)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_from_toml() {
        let file: LocalFile = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:1080"
            server_url = "wss://example.com/websocks"
            origin = "https://example.com"
            "#,
        )
        .unwrap();
        let config = file.validate().unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:1080".parse().unwrap());
        assert_eq!(config.server_url.as_str(), "wss://example.com/websocks");
        assert_eq!(config.origin.as_deref(), Some("https://example.com"));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_local_defaults() {
        let file: LocalFile = toml::from_str(r#"server_url = "ws://1.2.3.4:8080/ws""#).unwrap();
        let config = file.validate().unwrap();
        assert_eq!(config.listen_addr.port(), 10801);
        assert!(config.origin.is_none());
        assert!(config.ca_cert.is_none());
    }

    #[test]
    fn test_local_rejects() {
        let cases = [
            LocalFile::default(),
            LocalFile {
                server_url: "http://example.com/".into(),
                ..Default::default()
            },
            LocalFile {
                server_url: "ws://example.com/".into(),
                listen_addr: "localhost".into(),
                ..Default::default()
            },
            LocalFile {
                server_url: "ws://example.com/".into(),
                connect_timeout_secs: 0,
                ..Default::default()
            },
        ];
        for file in cases {
            assert!(matches!(file.validate(), Err(Error::Config(_))));
        }
    }

    #[test]
    fn test_unknown_field() {
        let result: std::result::Result<LocalFile, _> = toml::from_str(r#"servr_url = "x""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_remote_from_toml() {
        let file: RemoteFile = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:443"
            path = "/tunnel"
            tls_cert = "websocks.cer"
            tls_key = "websocks.key"
            "#,
        )
        .unwrap();
        let config = file.validate().unwrap();

        assert_eq!(config.listen_addr.port(), 443);
        assert_eq!(config.path, "/tunnel");
        assert_eq!(
            config.tls,
            Some(TlsFiles {
                cert_path: "websocks.cer".into(),
                key_path: "websocks.key".into(),
            })
        );
    }

    #[test]
    fn test_remote_rejects() {
        let half_tls = RemoteFile {
            tls_cert: Some("websocks.cer".into()),
            ..Default::default()
        };
        assert!(matches!(half_tls.validate(), Err(Error::Config(_))));

        let bad_path = RemoteFile {
            path: "websocks".into(),
            ..Default::default()
        };
        assert!(matches!(bad_path.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_is_default() {
        let file = RemoteFile::load(Path::new("/nonexistent/server.toml")).unwrap();
        let config = file.validate().unwrap();
        assert_eq!(config.path, "/websocks");
        assert!(config.tls.is_none());
    }
}
