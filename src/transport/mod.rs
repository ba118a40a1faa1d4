/// Transport 层
///
/// 负责建立隧道连接：TCP → (TLS) → WebSocket

pub mod tls;
pub mod websocket;

pub use websocket::{accept, dial, ClientWebSocket, WebSocketAdapter};
