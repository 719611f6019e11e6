//! Cache middleware: RFC 9111 decision logic wired into the
//! transport's middleware pipeline.

use crate::entry::CacheEntry;
use crate::freshness::{self, CacheControl};
use crate::key;
use crate::storage::CacheStorage;
use crate::variant_index::VariantIndex;
use async_trait::async_trait;
use httpcore::response::Body;
use httpcore::{HeaderMap, Method, Request, Response};
use httpcore_transport::middleware::{Context, Middleware, Next};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const DEFAULT_CACHEABLE_STATUSES: &[u16] = &[300, 301, 308, 404, 405, 410, 414, 501];
const MAX_VARY_HEADERS: usize = 32;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub allow_cookies: bool,
    pub allow_private: bool,
    pub cache_head: bool,
    pub heuristic_freshness_enabled: bool,
    pub heuristic_lifetime: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            allow_cookies: false,
            allow_private: true,
            cache_head: false,
            heuristic_freshness_enabled: false,
            heuristic_lifetime: Duration::from_secs(600),
        }
    }
}

pub struct CacheMiddleware {
    storage: CacheStorage,
    variants: Arc<VariantIndex>,
    config: CacheConfig,
}

impl CacheMiddleware {
    pub fn new(storage: CacheStorage, config: CacheConfig) -> Self {
        CacheMiddleware { storage, variants: Arc::new(VariantIndex::new()), config }
    }

    fn is_cacheable_status(status: u16) -> bool {
        (200..300).contains(&status) || DEFAULT_CACHEABLE_STATUSES.contains(&status)
    }

    async fn handle_unsafe(&self, request: Request, ctx: &mut Context, next: Next<'_>) -> Response {
        let uri = request.uri.clone();
        let response = next.run(request, ctx).await;
        if response.status < 500 {
            self.invalidate(&uri, response.headers());
        }
        response
    }

    fn invalidate(&self, uri: &str, response_headers: &HeaderMap) {
        for method in [Method::Get, Method::Head] {
            let base = key::base_key(&method, uri);
            let removed = self.variants.remove_all(&base);
            for storage_key in removed {
                self.storage.remove(&storage_key);
            }
        }
        for header in ["location", "content-location"] {
            if let Some(target) = response_headers.get(header) {
                if same_authority(uri, target) {
                    for method in [Method::Get, Method::Head] {
                        let base = key::base_key(&method, target);
                        let removed = self.variants.remove_all(&base);
                        for storage_key in removed {
                            self.storage.remove(&storage_key);
                        }
                    }
                }
            }
        }
    }

    async fn handle_cacheable(&self, request: Request, ctx: &mut Context, next: Next<'_>) -> Response {
        let base = key::base_key(&request.method, &request.uri);
        let force_revalidate = CacheControl::forces_revalidation(request.headers());

        if let Some((storage_key, entry)) = self.lookup_variant(&base, &request) {
            if !force_revalidate && entry.is_fresh() && !entry.must_revalidate {
                ctx.record("cache:hit");
                return self.synthesize_hit(&request, entry, "HIT");
            }
            ctx.record("cache:revalidate");
            return self.revalidate(request, ctx, next, base, storage_key, entry).await;
        }

        ctx.record("cache:miss");
        let response = next.run(request.clone(), ctx).await;
        self.maybe_store(&base, &request, &response);
        response
    }

    /// Enumerate every known `Vary` variant for `base`, returning the first
    /// storage hit. Storage itself reaps stale entries with no validator,
    /// so anything returned here is either fresh or revalidatable.
    fn lookup_variant(&self, base: &str, request: &Request) -> Option<(String, CacheEntry)> {
        for signature in variant_signatures(&self.variants, base) {
            let vary_names = split_signature(&signature);
            let vary_key = key::vary_key(&vary_names, request.headers());
            let storage_key = key::storage_key(base, &vary_key);
            if let Some(entry) = self.storage.get(&storage_key) {
                return Some((storage_key, entry));
            }
        }
        None
    }

    async fn revalidate(
        &self,
        request: Request,
        ctx: &mut Context,
        next: Next<'_>,
        base: String,
        storage_key: String,
        mut entry: CacheEntry,
    ) -> Response {
        let conditional = request.as_conditional(entry.etag(), entry.last_modified());
        let response = next.run(conditional, ctx).await;

        if response.error.is_some() {
            ctx.record("cache:revalidate-error");
            return response;
        }

        if response.status == 304 {
            let cc = CacheControl::from_headers(response.headers());
            let initial_age = response
                .headers()
                .get("age")
                .and_then(|a| a.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::ZERO);
            let lifetime = freshness::lifetime(response.headers(), &cc, self.config.heuristic_freshness_enabled, self.config.heuristic_lifetime);
            entry.refresh(response.headers(), initial_age, lifetime, cc.must_revalidate);
            self.storage.set(storage_key, entry.clone());

            let mut headers = entry.headers.clone();
            headers.set("X-Cache", "REVALIDATED");
            return Response::new(entry.status, headers, Body::Owned(entry.body), Arc::new(request), Duration::ZERO);
        }

        if Self::is_cacheable_status(response.status) {
            self.maybe_store(&base, &request, &response);
            return response;
        }

        // Non-304, not eligible for storage: serve the cached copy once more
        // for this call, then drop it from the cache.
        self.storage.remove(&storage_key);
        self.variants.remove(&base, &storage_key);
        let mut headers = entry.headers.clone();
        headers.set("X-Cache", "STALE");
        Response::new(entry.status, headers, Body::Owned(entry.body), Arc::new(request), Duration::ZERO)
    }

    fn synthesize_hit(&self, request: &Request, entry: CacheEntry, cache_status: &str) -> Response {
        let mut headers = entry.headers.clone();
        headers.set("Age", entry.current_age().as_secs().to_string());
        headers.set("X-Cache", cache_status);
        Response::new(entry.status, headers, Body::Owned(entry.body), Arc::new(request.clone()), Duration::ZERO)
    }

    fn maybe_store(&self, base: &str, request: &Request, response: &Response) {
        if !Self::is_cacheable_status(response.status) {
            return;
        }
        let cc_response = CacheControl::from_headers(response.headers());
        let cc_request = CacheControl::from_headers(request.headers());
        if !self.storage_gate(request, response, &cc_response, &cc_request) {
            return;
        }

        let vary_names = response
            .headers()
            .get_all("vary")
            .flat_map(|v| v.split(','))
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();
        if vary_names.len() > MAX_VARY_HEADERS {
            return;
        }

        let mut stored_headers = response.headers().clone();
        strip_hop_by_hop(&mut stored_headers);

        let initial_age = response.headers().get("age").and_then(|a| a.parse().ok()).map(Duration::from_secs).unwrap_or(Duration::ZERO);
        let lifetime = freshness::lifetime(response.headers(), &cc_response, self.config.heuristic_freshness_enabled, self.config.heuristic_lifetime);
        if lifetime.is_none() && !freshness::has_validator(response.headers()) && !cc_response.no_cache {
            return;
        }

        let entry = CacheEntry::new(response.status, stored_headers, response.body().to_vec(), initial_age, lifetime, cc_response.must_revalidate);

        let signature = key::signature(&vary_names);
        let vary_key = key::vary_key(&vary_names, request.headers());
        let storage_key = key::storage_key(base, &vary_key);
        self.variants.record(base, &storage_key, &signature);
        self.storage.set(storage_key, entry);
        debug!(base, "stored cache entry");
    }

    fn storage_gate(&self, request: &Request, response: &Response, cc_response: &CacheControl, cc_request: &CacheControl) -> bool {
        if response.headers().get("set-cookie").is_some() && !self.config.allow_cookies {
            return false;
        }
        if request.headers().get("authorization").is_some() && !cc_response.public {
            return false;
        }
        if cc_response.no_store || cc_request.no_store {
            return false;
        }
        if cc_response.private && !self.config.allow_private {
            return false;
        }
        if response.headers().get_all("vary").any(|v| v.trim() == "*") {
            return false;
        }
        let vary_lower: Vec<String> = response
            .headers()
            .get_all("vary")
            .flat_map(|v| v.split(','))
            .map(|s| s.trim().to_ascii_lowercase())
            .collect();
        if vary_lower.iter().any(|v| v == "authorization") && request.headers().get("authorization").is_some() && !self.config.allow_private {
            return false;
        }
        if vary_lower.iter().any(|v| v == "cookie") && !self.config.allow_cookies {
            return false;
        }
        true
    }
}

fn variant_signatures(variants: &VariantIndex, base: &str) -> Vec<String> {
    let mut signatures = variants.signatures(base);
    if signatures.is_empty() {
        signatures.push(String::new());
    }
    signatures
}

fn split_signature(signature: &str) -> Vec<String> {
    if signature.is_empty() {
        Vec::new()
    } else {
        signature.split('\n').map(str::to_string).collect()
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let mut to_strip: Vec<String> = HOP_BY_HOP.iter().map(|s| s.to_string()).collect();
    if let Some(connection) = headers.get("connection") {
        to_strip.extend(connection.split(',').map(|s| s.trim().to_ascii_lowercase()));
    }
    for name in to_strip {
        if !name.starts_with("proxy-") || HOP_BY_HOP.contains(&name.as_str()) {
            headers.remove(&name);
        }
    }
    for name in headers.names_lowercase() {
        if name.starts_with("proxy-") {
            headers.remove(&name);
        }
    }
}

fn same_authority(a: &str, b: &str) -> bool {
    let parse = |u: &str| -> Option<(String, String)> {
        let (scheme, rest) = u.split_once("://")?;
        let authority = rest.split('/').next().unwrap_or(rest);
        Some((scheme.to_ascii_lowercase(), authority.to_ascii_lowercase()))
    };
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    async fn invoke(&self, request: Request, ctx: &mut Context, next: Next<'_>) -> Response {
        if request.method.is_unsafe() {
            return self.handle_unsafe(request, ctx, next).await;
        }
        let cacheable_method = request.method == Method::Get || (request.method == Method::Head && self.config.cache_head);
        if !cacheable_method {
            return next.run(request, ctx).await;
        }
        self.handle_cacheable(request, ctx, next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use httpcore_transport::middleware::Pipeline;
    use httpcore_transport::middleware::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTransport {
        status: u16,
        headers: HeaderMap,
        body: Vec<u8>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(&self, request: Request, _ctx: &mut Context) -> Response {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Response::new(self.status, self.headers.clone(), Body::Owned(self.body.clone()), Arc::new(request), Duration::ZERO)
        }
    }

    fn pipeline(status: u16, headers: HeaderMap, body: Vec<u8>, calls: Arc<AtomicUsize>) -> Pipeline {
        let cache = CacheMiddleware::new(CacheStorage::new(StorageConfig::default()), CacheConfig::default());
        let transport = Arc::new(FixedTransport { status, headers, body, calls });
        Pipeline::new(vec![Arc::new(cache)], transport)
    }

    #[tokio::test]
    async fn fresh_entry_served_as_hit_without_forwarding_again() {
        let mut headers = HeaderMap::new();
        headers.append("Cache-Control", "max-age=60");
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(200, headers, b"hello".to_vec(), calls.clone());

        let r1 = p.dispatch(Request::get("https://h/x")).await;
        assert_eq!(r1.status, 200);
        let r2 = p.dispatch(Request::get("https://h/x")).await;
        assert_eq!(r2.headers().get("x-cache"), Some("HIT"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_store_response_is_never_cached() {
        let mut headers = HeaderMap::new();
        headers.append("Cache-Control", "no-store, max-age=60");
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(200, headers, b"hello".to_vec(), calls.clone());

        p.dispatch(Request::get("https://h/x")).await;
        p.dispatch(Request::get("https://h/x")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_get_method_bypasses_cache_entirely() {
        let headers = HeaderMap::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let p = pipeline(200, headers, b"hello".to_vec(), calls.clone());

        p.dispatch(Request::new(Method::Options, "https://h/x")).await;
        p.dispatch(Request::new(Method::Options, "https://h/x")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Transport that returns a fixed sequence of responses, one per call,
    /// repeating the last entry once the sequence is exhausted.
    struct ScriptedTransport {
        responses: Vec<Response>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: Request, _ctx: &mut Context) -> Response {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let index = call.min(self.responses.len() - 1);
            let mut response = self.responses[index].clone();
            response.request = Arc::new(request);
            response
        }
    }

    fn scripted_pipeline(responses: Vec<Response>, calls: Arc<AtomicUsize>) -> Pipeline {
        let cache = CacheMiddleware::new(CacheStorage::new(StorageConfig::default()), CacheConfig::default());
        let transport = Arc::new(ScriptedTransport { responses, calls });
        Pipeline::new(vec![Arc::new(cache)], transport)
    }

    #[tokio::test]
    async fn expired_entry_with_validator_is_revalidated_and_merged_on_304() {
        let mut stored_headers = HeaderMap::new();
        stored_headers.append("ETag", "\"v1\"");
        stored_headers.append("Cache-Control", "max-age=0, must-revalidate");
        let stored = Response::new(200, stored_headers, Body::Owned(b"hello".to_vec()), Arc::new(Request::get("https://h/x")), Duration::ZERO);

        let mut revalidated_headers = HeaderMap::new();
        revalidated_headers.append("Date", "Tue, 01 Jan 2030 00:00:00 GMT");
        let not_modified = Response::new(304, revalidated_headers, Body::Empty, Arc::new(Request::get("https://h/x")), Duration::ZERO);

        let calls = Arc::new(AtomicUsize::new(0));
        let p = scripted_pipeline(vec![stored, not_modified], calls.clone());

        let r1 = p.dispatch(Request::get("https://h/x")).await;
        assert_eq!(r1.status, 200);

        let r2 = p.dispatch(Request::get("https://h/x")).await;
        assert_eq!(r2.status, 200);
        assert_eq!(r2.headers().get("x-cache"), Some("REVALIDATED"));
        assert_eq!(r2.headers().get("date"), Some("Tue, 01 Jan 2030 00:00:00 GMT"));
        assert_eq!(r2.body().as_slice(), b"hello");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn revalidation_io_error_surfaces_as_transport_error_not_a_stale_hit() {
        let mut stored_headers = HeaderMap::new();
        stored_headers.append("ETag", "\"v1\"");
        stored_headers.append("Cache-Control", "max-age=0, must-revalidate");
        let stored = Response::new(200, stored_headers, Body::Owned(b"hello".to_vec()), Arc::new(Request::get("https://h/x")), Duration::ZERO);

        let failed = Response::new(0, HeaderMap::new(), Body::Empty, Arc::new(Request::get("https://h/x")), Duration::ZERO)
            .with_error(httpcore::TurboError::Network("connection reset".to_string()));

        let mut merge_headers = HeaderMap::new();
        merge_headers.append("Date", "Tue, 01 Jan 2030 00:00:00 GMT");
        let not_modified = Response::new(304, merge_headers, Body::Empty, Arc::new(Request::get("https://h/x")), Duration::ZERO);

        let calls = Arc::new(AtomicUsize::new(0));
        let p = scripted_pipeline(vec![stored, failed, not_modified], calls.clone());

        let r1 = p.dispatch(Request::get("https://h/x")).await;
        assert_eq!(r1.status, 200);

        let r2 = p.dispatch(Request::get("https://h/x")).await;
        assert!(r2.error.is_some());
        assert_ne!(r2.headers().get("x-cache"), Some("STALE"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The failed revalidation left the stored entry untouched: a later
        // successful revalidation still finds it and merges onto it.
        let r3 = p.dispatch(Request::get("https://h/x")).await;
        assert_eq!(r3.headers().get("x-cache"), Some("REVALIDATED"));
        assert_eq!(r3.body().as_slice(), b"hello");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
