//! The resilient, reconnecting WebSocket client: wraps a connection
//! with a reconnect policy and re-handshakes transparently on unexpected
//! termination.

use crate::connection::{ConnectionState, Message, WebSocketConnection};
use crate::facade::WebSocketFacade;
use crate::options::{WebSocketConnectionOptions, WebSocketReconnectPolicy};
use httpcore::TurboError;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    Error(String),
    Reconnecting(u32, std::time::Duration),
    Reconnected,
    Closed,
}

pub struct ResilientWebSocketClient {
    facade: Arc<WebSocketFacade>,
    uri: String,
    options: WebSocketConnectionOptions,
    policy: WebSocketReconnectPolicy,
    current: Mutex<WebSocketConnection>,
}

impl ResilientWebSocketClient {
    pub async fn connect(uri: impl Into<String>, options: WebSocketConnectionOptions, policy: WebSocketReconnectPolicy) -> Result<Self, TurboError> {
        let facade = Arc::new(WebSocketFacade::new());
        let uri = uri.into();
        let connection = facade.open(&uri, options.clone()).await?;
        Ok(ResilientWebSocketClient { facade, uri, options, policy, current: Mutex::new(connection) })
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TurboError> {
        self.current.lock().await.send_text(text).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<(), TurboError> {
        self.current.lock().await.send_binary(data).await
    }

    pub async fn close(&self, code: u16, reason: &str) -> Result<(), TurboError> {
        self.current.lock().await.close(code, reason).await
    }

    /// Blocks across reconnects and resumes streaming from the new
    /// connection; exhaustion of retries terminates the stream with a
    /// `Closed` event.
    pub async fn receive_all<F: FnMut(ClientEvent)>(&self, mut on_event: F) -> Option<Message> {
        loop {
            let mut current = self.current.lock().await;
            if current.state() == ConnectionState::Closed {
                let intentional = current.close_status().map(|s| s.initiated_by_us).unwrap_or(false);
                if intentional {
                    on_event(ClientEvent::Closed);
                    return None;
                }
                drop(current);
                match self.reconnect(&mut on_event).await {
                    Some(new_connection) => {
                        let mut guard = self.current.lock().await;
                        *guard = new_connection;
                        on_event(ClientEvent::Reconnected);
                        continue;
                    }
                    None => {
                        on_event(ClientEvent::Closed);
                        return None;
                    }
                }
            }

            let message = current.receive().await;
            match message {
                Some(m) => return Some(m),
                None => {
                    drop(current);
                    continue;
                }
            }
        }
    }

    async fn reconnect<F: FnMut(ClientEvent)>(&self, on_event: &mut F) -> Option<WebSocketConnection> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if !self.policy.should_retry(attempt) {
                return None;
            }
            let jitter_sample: f64 = rand::thread_rng().gen();
            let delay = self.policy.delay(attempt, jitter_sample);
            on_event(ClientEvent::Reconnecting(attempt, delay));
            tokio::time::sleep(delay).await;

            match self.facade.open(&self.uri, self.options.clone()).await {
                Ok(connection) => return Some(connection),
                Err(e) => on_event(ClientEvent::Error(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_respects_bounded_retries() {
        let policy = WebSocketReconnectPolicy { max_retries: 2, ..WebSocketReconnectPolicy::default() };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
