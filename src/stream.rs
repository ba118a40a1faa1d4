/// 类型擦除层
///
/// 远端监听既可能是明文 TCP，也可能是 TLS。WebSocket 升级和会话处理
/// 不关心是哪一种，只看到 `OpaqueStream`。

use tokio::io::{AsyncRead, AsyncWrite};
use std::pin::Pin;

/// 工程内唯一认可的 IO 抽象
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// 类型擦除的流
pub type OpaqueStream = Pin<Box<dyn Io + 'static>>;

/// 从具体类型创建 `OpaqueStream`
pub fn erase<S>(stream: S) -> OpaqueStream
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    Box::pin(stream)
}
