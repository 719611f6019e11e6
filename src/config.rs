//! TOML-driven configuration loading: an additive convenience on
//! top of the programmatic option builders — callers may still construct
//! `CacheConfig`/`WebSocketConnectionOptions`/`RecordReplayOptions` directly.

use httpcore_cache::CacheConfig;
use httpcore_replay::{MismatchPolicy, Mode, RecordReplayOptions};
use httpcore_ws::WebSocketConnectionOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct TurbohttpConfig {
    pub cache: CacheConfig,
    pub websocket: WebSocketConnectionOptions,
    pub record_replay: Option<RecordReplayOptions>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    cache: Option<RawCacheConfig>,
    websocket: Option<RawWebSocketConfig>,
    record_replay: Option<RawRecordReplayConfig>,
}

#[derive(Debug, Deserialize)]
struct RawCacheConfig {
    allow_cookies: Option<bool>,
    allow_private: Option<bool>,
    cache_head: Option<bool>,
    enable_heuristic_freshness: Option<bool>,
    heuristic_freshness_lifetime_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawWebSocketConfig {
    handshake_timeout_secs: Option<u64>,
    close_handshake_timeout_secs: Option<u64>,
    ping_interval_secs: Option<u64>,
    pong_timeout_secs: Option<u64>,
    receive_queue_capacity: Option<usize>,
    fragmentation_threshold: Option<usize>,
    max_message_size: Option<usize>,
    require_negotiated_extensions: Option<bool>,
    enable_permessage_deflate: Option<bool>,
    sub_protocols: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawRecordReplayConfig {
    mode: Option<String>,
    recording_path: Option<String>,
    mismatch_policy: Option<String>,
    auto_flush_on_dispose: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

pub fn load_from_path(path: &Path) -> Result<TurbohttpConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)?;
    load_from_str(&toml_str)
}

pub fn load_from_str(toml_str: &str) -> Result<TurbohttpConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    let cache = match raw.cache {
        Some(c) => CacheConfig {
            allow_cookies: c.allow_cookies.unwrap_or(false),
            allow_private: c.allow_private.unwrap_or(true),
            cache_head: c.cache_head.unwrap_or(false),
            heuristic_freshness_enabled: c.enable_heuristic_freshness.unwrap_or(false),
            heuristic_lifetime: Duration::from_secs(c.heuristic_freshness_lifetime_secs.unwrap_or(60)),
        },
        None => CacheConfig::default(),
    };

    let websocket = match raw.websocket {
        Some(w) => {
            let defaults = WebSocketConnectionOptions::default();
            WebSocketConnectionOptions {
                handshake_timeout: w.handshake_timeout_secs.map_or(defaults.handshake_timeout, Duration::from_secs),
                close_handshake_timeout: w.close_handshake_timeout_secs.map_or(defaults.close_handshake_timeout, Duration::from_secs),
                ping_interval: w.ping_interval_secs.map_or(defaults.ping_interval, Duration::from_secs),
                pong_timeout: w.pong_timeout_secs.map_or(defaults.pong_timeout, Duration::from_secs),
                receive_queue_capacity: w.receive_queue_capacity.unwrap_or(defaults.receive_queue_capacity),
                fragmentation_threshold: w.fragmentation_threshold.unwrap_or(defaults.fragmentation_threshold),
                max_message_size: w.max_message_size.unwrap_or(defaults.max_message_size),
                require_negotiated_extensions: w.require_negotiated_extensions.unwrap_or(defaults.require_negotiated_extensions),
                enable_permessage_deflate: w.enable_permessage_deflate.unwrap_or(defaults.enable_permessage_deflate),
                sub_protocols: w.sub_protocols.unwrap_or(defaults.sub_protocols),
                extra_headers: defaults.extra_headers,
            }
        }
        None => WebSocketConnectionOptions::default(),
    };

    let record_replay = match raw.record_replay {
        Some(rr) => {
            let mode = match rr.mode.as_deref() {
                Some("passthrough") | None => Mode::Passthrough,
                Some("record") => Mode::Record,
                Some("replay") => Mode::Replay,
                Some(other) => return Err(ConfigError::InvalidValue(format!("record_replay.mode: unknown mode '{other}'"))),
            };
            let recording_path: PathBuf = rr.recording_path.unwrap_or_default().into();
            let mut options = RecordReplayOptions::new(mode, recording_path);
            options.mismatch_policy = match rr.mismatch_policy.as_deref() {
                Some("strict") | None => MismatchPolicy::Strict,
                Some("warn") => MismatchPolicy::Warn,
                Some("relaxed") => MismatchPolicy::Relaxed,
                Some(other) => return Err(ConfigError::InvalidValue(format!("record_replay.mismatch_policy: unknown policy '{other}'"))),
            };
            options.auto_flush_on_dispose = rr.auto_flush_on_dispose.unwrap_or(true);
            Some(options)
        }
        None => None,
    };

    Ok(TurbohttpConfig { cache, websocket, record_replay })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_produces_all_defaults() {
        let config = load_from_str("").unwrap();
        assert!(config.cache.allow_private);
        assert!(config.record_replay.is_none());
    }

    #[test]
    fn cache_section_overrides_defaults() {
        let config = load_from_str("[cache]\nallow_private = false\ncache_head = true\n").unwrap();
        assert!(!config.cache.allow_private);
        assert!(config.cache.cache_head);
    }

    #[test]
    fn record_replay_section_parses_mode_and_policy() {
        let config = load_from_str("[record_replay]\nmode = \"replay\"\nrecording_path = \"/tmp/x.json\"\nmismatch_policy = \"relaxed\"\n").unwrap();
        let rr = config.record_replay.unwrap();
        assert_eq!(rr.mode, Mode::Replay);
        assert_eq!(rr.mismatch_policy, MismatchPolicy::Relaxed);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = load_from_str("[record_replay]\nmode = \"bogus\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
