//! The public HTTP client façade: compiles a middleware pipeline in
//! front of the transport and exposes a single `send`.

use httpcore::{Request, Response};
use httpcore_cache::{CacheConfig, CacheMiddleware, CacheStorage, StorageConfig};
use httpcore_transport::middleware::{Middleware, Pipeline};
use httpcore_transport::{PoolConfig, TransportFacade};
use std::sync::Arc;

/// Builds a [`Client`] by compiling the middleware pipeline in the order
/// middlewares are pushed; the pipeline preserves that order at dispatch.
pub struct ClientBuilder {
    pool_config: PoolConfig,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        ClientBuilder { pool_config: PoolConfig::default(), middlewares: Vec::new() }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder::default()
    }

    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    /// Enables the RFC 9111 private cache as the outermost middleware stage.
    pub fn with_cache(mut self, cache_config: CacheConfig, storage_config: StorageConfig) -> Self {
        let storage = CacheStorage::new(storage_config);
        self.middlewares.push(Arc::new(CacheMiddleware::new(storage, cache_config)));
        self
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn build(self) -> Client {
        let transport = Arc::new(TransportFacade::new(self.pool_config));
        Client { pipeline: Pipeline::new(self.middlewares, transport) }
    }
}

pub struct Client {
    pipeline: Pipeline,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub async fn send(&self, request: Request) -> Response {
        self.pipeline.dispatch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpcore::Method;

    #[tokio::test]
    async fn builder_with_no_middlewares_produces_a_working_client() {
        let client = Client::builder().build();
        // No live network in unit tests; just confirm the pipeline dispatches
        // and surfaces a transport-level error rather than panicking.
        let response = client.send(Request::new(Method::Get, "http://127.0.0.1:1/unreachable")).await;
        assert!(response.error.is_some());
    }
}
