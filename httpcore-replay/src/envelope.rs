//! JSON persistence envelope for recorded entries.
//!
//! Timestamps are encoded as .NET-style ticks (100ns units since
//! `0001-01-01T00:00:00Z`) to keep the on-disk shape byte-compatible with
//! recordings produced by the system this format was lifted from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SUPPORTED_VERSION: i32 = 1;
const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

pub fn now_ticks() -> i64 {
    to_ticks(Utc::now())
}

pub fn to_ticks(dt: DateTime<Utc>) -> i64 {
    TICKS_AT_UNIX_EPOCH + dt.timestamp() * TICKS_PER_SECOND + i64::from(dt.timestamp_subsec_nanos()) / 100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "Version")]
    pub version: i32,
    #[serde(rename = "CreatedUtcTicks")]
    pub created_utc_ticks: i64,
    #[serde(rename = "UpdatedUtcTicks")]
    pub updated_utc_ticks: i64,
    #[serde(rename = "Entries")]
    pub entries: Vec<Entry>,
}

impl Envelope {
    pub fn new() -> Self {
        let now = now_ticks();
        Envelope { version: SUPPORTED_VERSION, created_utc_ticks: now, updated_utc_ticks: now, entries: Vec::new() }
    }

    pub fn check_version(&self) -> Result<(), EnvelopeError> {
        if self.version != SUPPORTED_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "Sequence")]
    pub sequence: i64,
    #[serde(rename = "RequestKey")]
    pub request_key: String,
    #[serde(rename = "Method")]
    pub method: String,
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "RequestHeaders")]
    pub request_headers: HashMap<String, Vec<String>>,
    #[serde(rename = "RequestBodyHash")]
    pub request_body_hash: String,
    #[serde(rename = "RequestBodyBase64")]
    pub request_body_base64: Option<String>,
    #[serde(rename = "StatusCode")]
    pub status_code: i32,
    #[serde(rename = "ResponseHeaders")]
    pub response_headers: HashMap<String, Vec<String>>,
    #[serde(rename = "ResponseBodyBase64")]
    pub response_body_base64: Option<String>,
    #[serde(rename = "Error")]
    pub error: Option<ErrorEnvelope>,
    #[serde(rename = "ThrowsException")]
    pub throws_exception: bool,
    #[serde(rename = "TimestampUtcTicks")]
    pub timestamp_utc_ticks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "Type")]
    pub error_type: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "StatusCode")]
    pub status_code: Option<i32>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("unsupported recording version: {0}")]
    UnsupportedVersion(i32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed recording: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_envelope_starts_at_supported_version_with_matching_timestamps() {
        let envelope = Envelope::new();
        assert_eq!(envelope.version, SUPPORTED_VERSION);
        assert_eq!(envelope.created_utc_ticks, envelope.updated_utc_ticks);
        assert!(envelope.check_version().is_ok());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut envelope = Envelope::new();
        envelope.version = 2;
        assert!(matches!(envelope.check_version(), Err(EnvelopeError::UnsupportedVersion(2))));
    }

    #[test]
    fn round_trips_through_json() {
        let mut envelope = Envelope::new();
        envelope.entries.push(Entry {
            sequence: 1,
            request_key: "GET | https://h/x | | sha256:e3b0c4".to_string(),
            method: "GET".to_string(),
            url: "https://h/x".to_string(),
            request_headers: HashMap::new(),
            request_body_hash: "sha256:e3b0c4".to_string(),
            request_body_base64: None,
            status_code: 200,
            response_headers: HashMap::new(),
            response_body_base64: Some("aGVsbG8=".to_string()),
            error: None,
            throws_exception: false,
            timestamp_utc_ticks: now_ticks(),
        });
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"RequestKey\""));
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].status_code, 200);
    }
}
