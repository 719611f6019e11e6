//! RFC 6455 WebSocket client: frame codec, permessage-deflate,
//! the connection state machine, and a resilient reconnecting client.

pub mod client;
pub mod connection;
pub mod extensions;
pub mod facade;
pub mod frame;
pub mod handshake;
pub mod options;

pub use client::{ClientEvent, ResilientWebSocketClient};
pub use connection::{CloseStatus, ConnectionState, Message, WebSocketConnection};
pub use facade::WebSocketFacade;
pub use options::{WebSocketConnectionOptions, WebSocketReconnectPolicy};
