/// WebSocket 传输层
///
/// 每个 SOCKS5 会话独占一条 WebSocket 连接，字节流双向承载在二进制消息里。

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Sink, Stream};
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use tungstenite::protocol::{Message, WebSocketConfig};
use url::Url;

use crate::error::{Error, Result};

/// 64 MB
const MAX_MESSAGE_SIZE: usize = 64 << 20;
/// 16 MB
const MAX_FRAME_SIZE: usize = 16 << 20;

fn websocket_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_FRAME_SIZE),
        ..Default::default()
    }
}

/// WebSocket 适配器 - 将 WebSocketStream 转换为 AsyncRead/AsyncWrite
///
/// 写：每次写入一条二进制消息。
/// 读：按顺序取出二进制消息，剩余部分缓存；Close 帧或流结束视为 EOF。
pub struct WebSocketAdapter<S> {
    inner: WebSocketStream<S>,
    read_buffer: Vec<u8>,
    read_pos: usize,
}

impl<S> WebSocketAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: WebSocketStream<S>) -> Self {
        Self {
            inner: stream,
            read_buffer: Vec::new(),
            read_pos: 0,
        }
    }
}

fn to_io_error(e: tungstenite::Error) -> io::Error {
    match e {
        tungstenite::Error::Io(e) => e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::Error::new(io::ErrorKind::BrokenPipe, e)
        }
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl<S> AsyncRead for WebSocketAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            // 如果有缓冲数据，先读取
            if self.read_pos < self.read_buffer.len() {
                let remaining = &self.read_buffer[self.read_pos..];
                let to_copy = remaining.len().min(buf.remaining());
                buf.put_slice(&remaining[..to_copy]);
                self.read_pos += to_copy;

                if self.read_pos >= self.read_buffer.len() {
                    self.read_buffer.clear();
                    self.read_pos = 0;
                }

                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    // 空消息不能当作 EOF 返回
                    if !data.is_empty() {
                        self.read_buffer = data;
                        self.read_pos = 0;
                    }
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Ok(other))) => {
                    trace!("Ignoring non-binary WebSocket message: {:?}", other);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(to_io_error(e))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for WebSocketAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match Pin::new(&mut self.inner).poll_ready(cx) {
            Poll::Ready(Ok(())) => {
                let msg = Message::Binary(buf.to_vec());
                match Pin::new(&mut self.inner).start_send(msg) {
                    Ok(()) => Poll::Ready(Ok(buf.len())),
                    Err(e) => Poll::Ready(Err(to_io_error(e))),
                }
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(to_io_error(e))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(to_io_error)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match Pin::new(&mut self.inner).poll_close(cx) {
            Poll::Ready(Err(tungstenite::Error::ConnectionClosed))
            | Poll::Ready(Err(tungstenite::Error::AlreadyClosed)) => Poll::Ready(Ok(())),
            other => other.map_err(to_io_error),
        }
    }
}

/// 客户端 WebSocket 连接
pub type ClientWebSocket = WebSocketAdapter<MaybeTlsStream<TcpStream>>;

/// 建立到远端的 WebSocket 连接（ws:// 或 wss://）
///
/// TCP 连接和升级握手整体受 `connect_timeout` 限制。
pub async fn dial(
    url: &Url,
    origin: Option<&str>,
    tls: Arc<ClientConfig>,
    connect_timeout: Duration,
) -> Result<ClientWebSocket> {
    timeout(connect_timeout, dial_inner(url, origin, tls))
        .await
        .map_err(|_| Error::dial(url.as_str(), "timed out"))?
}

async fn dial_inner(
    url: &Url,
    origin: Option<&str>,
    tls: Arc<ClientConfig>,
) -> Result<ClientWebSocket> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::dial(url.as_str(), "URL has no host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::dial(url.as_str(), "URL has no port"))?;

    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::dial(url.as_str(), e))?;
    if let Some(origin) = origin {
        let value = HeaderValue::from_str(origin)
            .map_err(|e| Error::Config(format!("Invalid origin {:?}: {}", origin, e)))?;
        request.headers_mut().insert(header::ORIGIN, value);
    }

    debug!("Dialing tunnel {}", url);
    let tcp = TcpStream::connect(format!("{}:{}", host, port))
        .await
        .map_err(|e| Error::dial(url.as_str(), e))?;
    tcp.set_nodelay(true)?;

    let (ws_stream, response) = tokio_tungstenite::client_async_tls_with_config(
        request,
        tcp,
        Some(websocket_config()),
        Some(Connector::Rustls(tls)),
    )
    .await
    .map_err(|e| Error::dial(url.as_str(), e))?;

    debug!("WebSocket response status: {}", response.status());
    Ok(WebSocketAdapter::new(ws_stream))
}

/// 服务端 WebSocket 升级，只接受 `path` 上的请求
pub async fn accept<S>(stream: S, path: &str) -> Result<WebSocketAdapter<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            debug!("Rejecting WebSocket request for {}", request.uri().path());
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream =
        tokio_tungstenite::accept_hdr_async_with_config(stream, check_path, Some(websocket_config()))
            .await?;
    Ok(WebSocketAdapter::new(ws_stream))
}
