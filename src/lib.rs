//! SOCKS5 over WebSocket tunnel.
//!
//! ```text
//! SOCKS5 client → LocalGateway → WebSocket (ws/wss) → RemoteDispatcher → destination
//! ```
//!
//! Each SOCKS5 connection gets its own WebSocket connection. The first bytes on it
//! are a [`proxy::SessionDescriptor`] naming the destination; everything after is
//! relayed verbatim in both directions.

pub mod config;
pub mod error;
pub mod proxy;
pub mod stream;
pub mod transport;
pub mod utils;

pub use config::{LocalConfig, RemoteConfig};
pub use error::{Error, Result};
pub use proxy::{LocalGateway, RemoteDispatcher};
