//! Deterministic record/replay transport for tests: request
//! fingerprinting, redaction on write, a persisted JSON envelope, and a
//! `Transport` implementation answering from or recording into it.

pub mod envelope;
pub mod fingerprint;
pub mod options;
pub mod redaction;
pub mod store;
pub mod transport;

pub use envelope::{Entry, Envelope, EnvelopeError};
pub use options::{MismatchPolicy, Mode, RecordReplayOptions};
pub use redaction::RedactionPolicy;
pub use transport::RecordReplayTransport;
