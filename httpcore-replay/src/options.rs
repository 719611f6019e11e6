//! Record/replay configuration.

use crate::redaction::RedactionPolicy;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Forward to the inner transport untouched; no recording, no replay.
    Passthrough,
    /// Forward to the inner transport and append a new entry per response.
    Record,
    /// Answer purely from the recording; no inner transport is consulted.
    Replay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// No strict-key hit is a hard failure.
    Strict,
    /// No strict-key hit logs a warning and falls back to the inner transport.
    Warn,
    /// No strict-key hit tries the relaxed key before falling back.
    Relaxed,
}

#[derive(Debug, Clone)]
pub struct RecordReplayOptions {
    pub mode: Mode,
    pub recording_path: PathBuf,
    pub mismatch_policy: MismatchPolicy,
    pub redaction: RedactionPolicy,
    pub auto_flush_on_dispose: bool,
    pub match_header_names: Vec<String>,
    pub excluded_match_header_names: Vec<String>,
}

impl RecordReplayOptions {
    pub fn new(mode: Mode, recording_path: impl Into<PathBuf>) -> Self {
        RecordReplayOptions {
            mode,
            recording_path: recording_path.into(),
            mismatch_policy: MismatchPolicy::Strict,
            redaction: RedactionPolicy::default(),
            auto_flush_on_dispose: true,
            match_header_names: Vec::new(),
            excluded_match_header_names: Vec::new(),
        }
    }
}
