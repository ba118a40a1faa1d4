//! 代理模块

pub mod descriptor;
pub mod local;
pub mod relay;
pub mod remote;
pub mod socks5;

pub use descriptor::SessionDescriptor;
pub use local::LocalGateway;
pub use relay::relay_bidirectional;
pub use remote::RemoteDispatcher;

use tracing::{debug, error, info, warn, Level};

use crate::error::{Error, Result};

/// 会话结束时记录日志；会话错误只影响这一条连接
fn log_session_end(result: Result<()>) {
    let level = session_end_level(&result);
    match result {
        Ok(()) => debug!("Session closed"),
        Err(e) if level == Level::ERROR => error!("Session failed: {}", e),
        Err(e) if level == Level::WARN => warn!("Session failed: {}", e),
        Err(e) if level == Level::INFO => info!("Rejected: {}", e),
        Err(e) => debug!("Session aborted: {}", e),
    }
}

fn session_end_level(result: &Result<()>) -> Level {
    match result {
        Ok(()) => Level::DEBUG,
        Err(e) if e.is_fatal() => Level::ERROR,
        Err(Error::Dial { .. } | Error::Relay(_)) => Level::WARN,
        Err(
            Error::Protocol(_)
            | Error::UnsupportedCommand(_)
            | Error::UnsupportedAddressType(_)
            | Error::MalformedDescriptor(_),
        ) => Level::INFO,
        Err(_) => Level::DEBUG,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_session_end_level() {
        assert_eq!(session_end_level(&Ok(())), Level::DEBUG);
        assert_eq!(
            session_end_level(&Err(Error::Tls("bad certificate".into()))),
            Level::ERROR
        );
        assert_eq!(
            session_end_level(&Err(Error::dial("10.0.0.1:80", "refused"))),
            Level::WARN
        );
        assert_eq!(
            session_end_level(&Err(Error::UnsupportedCommand(0x02))),
            Level::INFO
        );
        assert_eq!(
            session_end_level(&Err(Error::Io(io::ErrorKind::UnexpectedEof.into()))),
            Level::DEBUG
        );
    }
}
