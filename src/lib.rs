//! `turbohttp`: a thin façade crate wiring the transport, cache, replay, and
//! WebSocket crates into the single public [`Client`]/[`WebSocketClient`]
//! entry points.

pub mod client;
pub mod config;
pub mod websocket;

pub use client::{Client, ClientBuilder};
pub use config::{ConfigError, TurbohttpConfig};
pub use websocket::WebSocketClient;

pub use httpcore::{Request, Response, TurboError};
