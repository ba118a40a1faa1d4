/// 远端分发器：隧道出口
///
/// 每条隧道连接：(TLS) → WebSocket 升级 → 读取会话描述符 → 拨号目标 → 双向转发。
/// 拨号失败时直接关闭隧道，不回传任何错误消息。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, info_span, Instrument, Span};

use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::stream::{erase, OpaqueStream};
use crate::transport::{self, tls};
use super::descriptor::SessionDescriptor;
use super::relay::{relay_bidirectional, SHUTDOWN_GRACE};

/// 会话处理参数，所有会话只读共享
struct Settings {
    path: String,
    acceptor: Option<TlsAcceptor>,
    connect_timeout: Duration,
}

pub struct RemoteDispatcher {
    listener: TcpListener,
    settings: Arc<Settings>,
    span: Span,
}

impl RemoteDispatcher {
    /// 加载 TLS 材料并绑定隧道监听端口
    pub async fn bind(config: RemoteConfig) -> Result<Self> {
        let acceptor = config.tls.as_ref().map(tls::load_acceptor).transpose()?;

        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| Error::Listen {
                addr: config.listen_addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            settings: Arc::new(Settings {
                path: config.path,
                acceptor,
                connect_timeout: config.connect_timeout,
            }),
            span: info_span!("remote", listen = %local_addr),
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
            let scheme = if self.settings.acceptor.is_some() { "wss" } else { "ws" };
            info!("🚀 Tunnel endpoint listening on {}://{}{}", scheme, local_addr, self.settings.path);
        });

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let settings = self.settings.clone();
                    let span = info_span!(parent: &self.span, "session", peer = %addr);

                    tokio::spawn(
                        async move {
                            debug!("📥 New tunnel connection");
                            super::log_session_end(handle_connection(stream, settings).await);
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

/// 运行远端分发器，直到监听失败
pub async fn listen(config: RemoteConfig) -> Result<()> {
    RemoteDispatcher::bind(config).await?.serve().await
}

/// 处理单条隧道连接
async fn handle_connection(stream: TcpStream, settings: Arc<Settings>) -> Result<()> {
    stream.set_nodelay(true)?;

    let stream: OpaqueStream = match &settings.acceptor {
        Some(acceptor) => erase(acceptor.accept(stream).await?),
        None => erase(stream),
    };

    // 1. WebSocket 升级
    let mut tunnel = transport::accept(stream, &settings.path).await?;

    // 2. 读取会话描述符（在任何转发数据之前）
    let descriptor = SessionDescriptor::read_from(&mut tunnel).await?;
    let destination = descriptor.destination();
    info!("CONNECT {}", destination);

    // 3. 拨号目标；失败则关闭隧道
    let target = match dial_destination(destination, settings.connect_timeout).await {
        Ok(target) => target,
        Err(e) => {
            let _ = timeout(SHUTDOWN_GRACE, tunnel.shutdown()).await;
            return Err(e);
        }
    };

    // 4. 双向转发
    let (up, down) = relay_bidirectional(tunnel, target).await?;
    debug!(
        "Connection to {} closed: ↑ {} bytes, ↓ {} bytes",
        destination, up, down
    );

    Ok(())
}

async fn dial_destination(destination: &str, connect_timeout: Duration) -> Result<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(destination))
        .await
        .map_err(|_| Error::dial(destination, "timed out"))?
        .map_err(|e| Error::dial(destination, e))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
