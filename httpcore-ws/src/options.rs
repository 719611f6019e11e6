//! WebSocket configuration.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WebSocketConnectionOptions {
    pub handshake_timeout: Duration,
    pub close_handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub receive_queue_capacity: usize,
    pub fragmentation_threshold: usize,
    pub max_message_size: usize,
    pub require_negotiated_extensions: bool,
    pub enable_permessage_deflate: bool,
    pub sub_protocols: Vec<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl Default for WebSocketConnectionOptions {
    fn default() -> Self {
        WebSocketConnectionOptions {
            handshake_timeout: Duration::from_secs(10),
            close_handshake_timeout: Duration::from_secs(5),
            ping_interval: Duration::ZERO,
            pong_timeout: Duration::from_secs(10),
            receive_queue_capacity: 64,
            fragmentation_threshold: 64 * 1024,
            max_message_size: crate::frame::DEFAULT_MAX_MESSAGE_SIZE,
            require_negotiated_extensions: false,
            enable_permessage_deflate: true,
            sub_protocols: Vec::new(),
            extra_headers: Vec::new(),
        }
    }
}

/// Reconnect policy for the resilient client.
#[derive(Debug, Clone)]
pub struct WebSocketReconnectPolicy {
    /// `-1` means infinite retries.
    pub max_retries: i64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for WebSocketReconnectPolicy {
    fn default() -> Self {
        WebSocketReconnectPolicy {
            max_retries: -1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl WebSocketReconnectPolicy {
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_retries < 0 || i64::from(attempt) < self.max_retries
    }

    /// Delay before the given (1-indexed) attempt, with exponential backoff
    /// capped at `max_delay` and up to `jitter_factor` of randomized jitter.
    pub fn delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let backoff = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = backoff.min(self.max_delay.as_secs_f64());
        let jitter = 1.0 + (jitter_sample * 2.0 - 1.0) * self.jitter_factor;
        Duration::from_secs_f64((capped * jitter).max(0.0))
    }
}
