//! 数据转发模块
//!
//! 两个方向并发拷贝，任一方向结束（EOF 或错误）即取消另一方向，
//! 等待两个方向都退出后关闭两端。没有重试。

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// 32KB，与 Go 的 io.Copy 一致
const BUFFER_SIZE: usize = 32 * 1024;

/// 关闭写端的最长等待时间
pub(crate) const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 单向结束原因
enum Finish {
    Eof,
    Cancelled,
}

/// 双向转发数据，返回 (a->b 字节数, b->a 字节数)
///
/// 两个流的所有权交给本函数，返回时两端都已关闭。
pub async fn relay_bidirectional<A, B>(a: A, b: B) -> Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let stop = CancellationToken::new();

    let (a_to_b, b_to_a) = tokio::join!(
        pump(&mut a_read, &mut b_write, &stop, "a->b"),
        pump(&mut b_read, &mut a_write, &stop, "b->a"),
    );

    // 尽力关闭两端的写方向，对端可能已经不在了
    let _ = timeout(SHUTDOWN_GRACE, a_write.shutdown()).await;
    let _ = timeout(SHUTDOWN_GRACE, b_write.shutdown()).await;

    let (a_to_b, b_to_a) = match (a_to_b, b_to_a) {
        (Ok(x), Ok(y)) => (x, y),
        (Err(e), _) | (_, Err(e)) => return Err(Error::Relay(e)),
    };

    debug!("Relay finished: {} bytes a->b, {} bytes b->a", a_to_b, b_to_a);
    Ok((a_to_b, b_to_a))
}

/// 单向拷贝，结束时通知另一方向停止
async fn pump<R, W>(
    reader: &mut R,
    writer: &mut W,
    stop: &CancellationToken,
    direction: &str,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (total, result) = copy_until_stopped(reader, writer, stop).await;
    stop.cancel();

    match result {
        Ok(Finish::Eof) => {
            trace!("{}: EOF after {} bytes", direction, total);
            Ok(total)
        }
        Ok(Finish::Cancelled) => {
            trace!("{}: stopped after {} bytes", direction, total);
            Ok(total)
        }
        Err(e) if is_teardown(&e) => {
            trace!("{}: peer went away after {} bytes: {}", direction, total, e);
            Ok(total)
        }
        Err(e) => {
            debug!("{}: {}", direction, e);
            Err(e)
        }
    }
}

/// 返回已完整写出的字节数，出错时也一样
async fn copy_until_stopped<R, W>(
    reader: &mut R,
    writer: &mut W,
    stop: &CancellationToken,
) -> (u64, io::Result<Finish>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = tokio::select! {
            _ = stop.cancelled() => return (total, Ok(Finish::Cancelled)),
            read = reader.read(&mut buffer) => match read {
                Ok(n) => n,
                Err(e) => return (total, Err(e)),
            },
        };
        if n == 0 {
            return (total, writer.flush().await.map(|()| Finish::Eof));
        }

        let write = async {
            writer.write_all(&buffer[..n]).await?;
            writer.flush().await
        };
        tokio::select! {
            _ = stop.cancelled() => return (total, Ok(Finish::Cancelled)),
            written = write => {
                if let Err(e) = written {
                    return (total, Err(e));
                }
            }
        }

        total += n as u64;
    }
}

/// 对端关闭导致的错误，视为正常结束
fn is_teardown(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}
