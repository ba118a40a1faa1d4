/// 本地网关：SOCKS5 入口
///
/// 每个客户端连接：握手 → 拨号隧道 → 发送会话描述符 → 双向转发。
/// 任一步失败都直接关闭该连接，不影响其他会话。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::ClientConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tracing::{debug, error, info, info_span, Instrument, Span};
use url::Url;

use crate::config::LocalConfig;
use crate::error::{Error, Result};
use crate::transport::{self, tls};
use super::descriptor::SessionDescriptor;
use super::relay::relay_bidirectional;
use super::socks5::socks5_handshake;

/// 隧道拨号参数，所有会话只读共享
struct Tunnel {
    url: Url,
    origin: Option<String>,
    tls: Arc<ClientConfig>,
    connect_timeout: Duration,
}

pub struct LocalGateway {
    listener: TcpListener,
    tunnel: Arc<Tunnel>,
    span: Span,
}

impl LocalGateway {
    /// 绑定 SOCKS5 监听端口
    pub async fn bind(config: LocalConfig) -> Result<Self> {
        let tls = tls::create_client_config(config.ca_cert.as_deref())?;

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| Error::Listen {
                addr: config.listen_addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            tunnel: Arc::new(Tunnel {
                url: config.server_url,
                origin: config.origin,
                tls,
                connect_timeout: config.connect_timeout,
            }),
            span: info_span!("local", listen = %local_addr),
        })
    }

    /// 替换日志 span，会话 span 都挂在它下面
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 接受循环，只在进程退出时结束
    pub async fn serve(self) -> Result<()> {
        let local_addr = self.local_addr()?;
        self.span.in_scope(|| {
            info!("🚀 SOCKS5 gateway listening on {}", local_addr);
            info!("   Tunnel: {}", self.tunnel.url);
        });

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let tunnel = self.tunnel.clone();
                    let span = info_span!(parent: &self.span, "session", peer = %addr);

                    tokio::spawn(
                        async move {
                            debug!("📥 New connection");
                            super::log_session_end(handle_connection(stream, tunnel).await);
                        }
                        .instrument(span),
                    );
                }
                Err(e) => {
                    self.span.in_scope(|| error!("Accept error: {}", e));
                }
            }
        }
    }
}

/// 运行本地网关，直到监听失败
pub async fn listen(config: LocalConfig) -> Result<()> {
    LocalGateway::bind(config).await?.serve().await
}

/// 处理单个 SOCKS5 连接
async fn handle_connection(mut client: TcpStream, tunnel: Arc<Tunnel>) -> Result<()> {
    client.set_nodelay(true)?;

    // 1. SOCKS5 握手（成功响应已发出）
    let target = socks5_handshake(&mut client).await?;
    let descriptor = SessionDescriptor::new(target.to_string())?;
    info!("CONNECT {}", descriptor.destination());

    // 2. 每个会话新建一条隧道连接
    let mut remote = transport::dial(
        &tunnel.url,
        tunnel.origin.as_deref(),
        tunnel.tls.clone(),
        tunnel.connect_timeout,
    )
    .await?;

    // 3. 描述符必须在任何转发数据之前完整写出
    descriptor.write_to(&mut remote).await?;

    // 4. 双向转发
    let (up, down) = relay_bidirectional(client, remote).await?;
    debug!(
        "Connection to {} closed: ↑ {} bytes, ↓ {} bytes",
        descriptor.destination(),
        up,
        down
    );

    Ok(())
}
