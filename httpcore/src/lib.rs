//! Core data model shared by the transport, cache, replay, and websocket crates.
//!
//! This crate owns nothing that talks to a socket. It defines the immutable
//! [`Request`]/[`Response`] value types, the ordered case-insensitive
//! [`HeaderMap`], the URI canonicalizer, the pooled body buffer, and
//! the shared error taxonomy that every other crate in the workspace
//! converts into.

pub mod buffer_pool;
pub mod error;
pub mod header;
pub mod method;
pub mod request;
pub mod response;
pub mod uri;

pub use buffer_pool::{BufferPool, PooledBuffer};
pub use error::{CacheErrorKind, TurboError, TurboResult, WebSocketErrorKind};
pub use header::HeaderMap;
pub use method::Method;
pub use request::Request;
pub use response::Response;
pub use uri::canonicalize;
