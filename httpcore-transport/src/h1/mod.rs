//! HTTP/1.1 wire codec: request serialization and response parsing.

mod reader;
mod writer;

pub use reader::{read_response, ParsedResponse};
pub use writer::write_request;

/// Per-header-line, header-block, body, and interim-response caps.
pub const MAX_HEADER_LINE: usize = 8 * 1024;
pub const MAX_HEADER_BLOCK: usize = 100 * 1024;
pub const MAX_BODY_BYTES: u64 = 100 * 1024 * 1024;
pub const MAX_INTERIM_RESPONSES: usize = 10;
