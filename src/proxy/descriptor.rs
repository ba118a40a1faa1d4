/// 会话描述符编解码
///
/// 隧道连接上的第一条数据，告诉远端要拨号的目标地址。
///
/// 线格式（Big-Endian）：
///
/// ```text
/// +---------+-------------+----------------------+
/// | VERSION |  LEN (u16)  |  DESTINATION (UTF-8) |
/// +---------+-------------+----------------------+
/// |    1    |      2      |         LEN          |
/// +---------+-------------+----------------------+
/// ```

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{Error, Result};
use crate::utils::split_host_port;

/// 当前描述符版本
pub const DESCRIPTOR_VERSION: u8 = 1;

/// 单个会话的目标地址，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    destination: String,
}

impl SessionDescriptor {
    /// 校验 `host:port` 后创建
    pub fn new(destination: impl Into<String>) -> Result<Self> {
        let destination = destination.into();
        split_host_port(&destination)
            .map_err(|e| Error::MalformedDescriptor(e.to_string()))?;
        if destination.len() > u16::MAX as usize {
            return Err(Error::MalformedDescriptor("destination too long".into()));
        }
        Ok(Self { destination })
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn into_destination(self) -> String {
        self.destination
    }

    pub fn encode(&self) -> Vec<u8> {
        let bytes = self.destination.as_bytes();
        let mut buf = Vec::with_capacity(3 + bytes.len());
        buf.push(DESCRIPTOR_VERSION);
        buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        buf.extend_from_slice(bytes);
        buf
    }

    /// 一次性写出并 flush，保证在任何转发数据之前完整发送
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.encode();
        trace!("Sending session descriptor: {} bytes", bytes.len());
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// 精确读取一个描述符，不会多读后续的转发数据
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let version = reader.read_u8().await.map_err(truncated)?;
        if version != DESCRIPTOR_VERSION {
            return Err(Error::MalformedDescriptor(format!(
                "unsupported version {}",
                version
            )));
        }

        let len = reader.read_u16().await.map_err(truncated)? as usize;
        if len == 0 {
            return Err(Error::MalformedDescriptor("empty destination".into()));
        }

        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await.map_err(truncated)?;

        let destination = String::from_utf8(buf)
            .map_err(|_| Error::MalformedDescriptor("destination is not UTF-8".into()))?;
        Self::new(destination)
    }
}

fn truncated(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::MalformedDescriptor("stream closed before descriptor was complete".into())
    } else {
        Error::Io(e)
    }
}
