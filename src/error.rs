use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed SOCKS5 bytes
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unsupported SOCKS5 command: 0x{0:02x}")]
    UnsupportedCommand(u8),

    #[error("Unsupported SOCKS5 address type: 0x{0:02x}")]
    UnsupportedAddressType(u8),

    #[error("Malformed session descriptor: {0}")]
    MalformedDescriptor(String),

    /// Tunnel or destination connect failure
    #[error("Dial {target} failed: {reason}")]
    Dial { target: String, reason: String },

    #[error("Relay error: {0}")]
    Relay(std::io::Error),

    #[error("Listen on {addr} failed: {source}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn dial(target: impl Into<String>, reason: impl ToString) -> Self {
        Error::Dial {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Startup failures stop the owning side; everything else only ends one session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Listen { .. } | Error::Config(_) | Error::Tls(_))
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let listen = Error::Listen {
            addr: "127.0.0.1:1".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(listen.is_fatal());
        assert!(Error::Config("bad".into()).is_fatal());

        assert!(!Error::UnsupportedCommand(0x02).is_fatal());
        assert!(!Error::dial("example.com:80", "refused").is_fatal());
        assert!(!Error::MalformedDescriptor("short".into()).is_fatal());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::UnsupportedAddressType(0x05).to_string(),
            "Unsupported SOCKS5 address type: 0x05"
        );
        assert_eq!(
            Error::dial("10.0.0.1:22", "timed out").to_string(),
            "Dial 10.0.0.1:22 failed: timed out"
        );
    }
}
