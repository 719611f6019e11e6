//! The public WebSocket client façade: `open(uri, options) -> connection`.

use httpcore::TurboError;
use httpcore_ws::{WebSocketConnection, WebSocketConnectionOptions, WebSocketFacade, WebSocketReconnectPolicy};
use httpcore_ws::client::ResilientWebSocketClient;

pub struct WebSocketClient {
    facade: WebSocketFacade,
}

impl Default for WebSocketClient {
    fn default() -> Self {
        WebSocketClient::new()
    }
}

impl WebSocketClient {
    pub fn new() -> Self {
        WebSocketClient { facade: WebSocketFacade::new() }
    }

    pub async fn open(&self, uri: &str, options: WebSocketConnectionOptions) -> Result<WebSocketConnection, TurboError> {
        self.facade.open(uri, options).await
    }

    /// Opens a connection wrapped with a reconnect policy.
    pub async fn open_resilient(
        &self,
        uri: impl Into<String>,
        options: WebSocketConnectionOptions,
        policy: WebSocketReconnectPolicy,
    ) -> Result<ResilientWebSocketClient, TurboError> {
        ResilientWebSocketClient::connect(uri, options, policy).await
    }
}
