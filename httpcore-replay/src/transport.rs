//! The record/replay transport: a `Transport` that wraps an inner
//! transport and answers from, or appends to, a recording depending on mode.

use crate::envelope::{now_ticks, Entry, ErrorEnvelope};
use crate::fingerprint::{body_hash, relaxed_key, request_key};
use crate::options::{MismatchPolicy, Mode, RecordReplayOptions};
use crate::store::{RecordingStore, StoredEntry};
use async_trait::async_trait;
use base64::Engine;
use httpcore::response::Body;
use httpcore::{canonicalize, HeaderMap, Request, Response, TurboError};
use httpcore_transport::middleware::{Context, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct RecordReplayTransport {
    options: RecordReplayOptions,
    store: RecordingStore,
    inner: Option<Arc<dyn Transport>>,
}

impl RecordReplayTransport {
    pub async fn open(options: RecordReplayOptions, inner: Option<Arc<dyn Transport>>) -> Result<Self, crate::envelope::EnvelopeError> {
        let store = match options.mode {
            Mode::Passthrough => RecordingStore::empty(),
            Mode::Record | Mode::Replay => RecordingStore::open(&options.recording_path).await?,
        };
        Ok(RecordReplayTransport { options, store, inner })
    }

    /// Flush the recording to disk if `auto_flush_on_dispose` is set.
    /// Call this at shutdown; there is no implicit async drop.
    pub async fn dispose(&self) -> Result<(), crate::envelope::EnvelopeError> {
        if self.options.auto_flush_on_dispose {
            self.store.flush().await?;
        }
        Ok(())
    }

    fn keys(&self, request: &Request, canonical_uri: &str) -> (String, String) {
        let key = request_key(
            &request.method,
            canonical_uri,
            request.headers(),
            request.body(),
            &self.options.match_header_names,
            &self.options.excluded_match_header_names,
        );
        let relaxed = relaxed_key(&request.method, canonical_uri);
        (key, relaxed)
    }

    async fn record(&self, request: Request, ctx: &mut Context, canonical_uri: &str, key: String) -> Response {
        let Some(inner) = &self.inner else {
            return errored_response(request, TurboError::InvalidArgument("record mode requires an inner transport".into()));
        };
        let response = inner.send(request.clone(), ctx).await;

        let redacted_request_headers = self.options.redaction.redact_headers(request.headers());
        let redacted_response_headers = self.options.redaction.redact_headers(response.headers());
        let request_content_type = request.headers().get("content-type").map(str::to_string);
        let response_content_type = response.headers().get("content-type").map(str::to_string);

        let request_body_redacted = request.body().map(|b| self.options.redaction.redact_json_body(request_content_type.as_deref(), b));
        let response_body_redacted = self.options.redaction.redact_json_body(response_content_type.as_deref(), response.body().as_slice());

        let entry = Entry {
            sequence: self.store.next_sequence(),
            request_key: key,
            method: request.method.as_str().to_string(),
            url: canonical_uri.to_string(),
            request_headers: to_multimap(&redacted_request_headers),
            request_body_hash: body_hash(request.body()),
            request_body_base64: request_body_redacted.map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
            status_code: i32::from(response.status),
            response_headers: to_multimap(&redacted_response_headers),
            response_body_base64: Some(base64::engine::general_purpose::STANDARD.encode(response_body_redacted)),
            error: response.error.as_ref().map(error_envelope),
            throws_exception: response.error.is_some(),
            timestamp_utc_ticks: now_ticks(),
        };
        self.store.append(entry);
        response
    }

    async fn replay(&self, request: Request, ctx: &mut Context, key: &str, relaxed: &str) -> Response {
        if let Some(stored) = self.store.take_strict(key) {
            return synthesize(&request, &stored);
        }
        match self.options.mismatch_policy {
            MismatchPolicy::Strict => errored_response(request, TurboError::Protocol(format!("no recorded entry for key: {key}"))),
            MismatchPolicy::Warn => {
                warn!(key, "no recorded entry; falling back to inner transport");
                self.fall_back_or_error(request, ctx).await
            }
            MismatchPolicy::Relaxed => {
                if let Some(stored) = self.store.take_relaxed(relaxed) {
                    return synthesize(&request, &stored);
                }
                self.fall_back_or_error(request, ctx).await
            }
        }
    }

    async fn fall_back_or_error(&self, request: Request, ctx: &mut Context) -> Response {
        match &self.inner {
            Some(inner) => inner.send(request, ctx).await,
            None => errored_response(request, TurboError::Protocol("no recorded entry and no inner transport configured".into())),
        }
    }
}

#[async_trait]
impl Transport for RecordReplayTransport {
    async fn send(&self, request: Request, ctx: &mut Context) -> Response {
        let canonical_uri = match canonicalize(&request.uri) {
            Ok(uri) => uri,
            Err(e) => return errored_response(request, e),
        };

        match self.options.mode {
            Mode::Passthrough => match &self.inner {
                Some(inner) => inner.send(request, ctx).await,
                None => errored_response(request, TurboError::InvalidArgument("passthrough mode requires an inner transport".into())),
            },
            Mode::Record => {
                let (key, _relaxed) = self.keys(&request, &canonical_uri);
                self.record(request, ctx, &canonical_uri, key).await
            }
            Mode::Replay => {
                let (key, relaxed) = self.keys(&request, &canonical_uri);
                self.replay(request, ctx, &key, &relaxed).await
            }
        }
    }
}

fn to_multimap(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        map.entry(name.to_string()).or_default().push(value.to_string());
    }
    map
}

fn from_multimap(map: &HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in map {
        for value in values {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

fn error_envelope(error: &TurboError) -> ErrorEnvelope {
    ErrorEnvelope { error_type: error_type_name(error), message: error.to_string(), status_code: None }
}

fn error_type_name(error: &TurboError) -> String {
    match error {
        TurboError::Network(_) => "Network",
        TurboError::Timeout => "Timeout",
        TurboError::Tls(_) => "Tls",
        TurboError::MalformedResponse(_) => "MalformedResponse",
        TurboError::UnsupportedTransferEncoding(_) => "UnsupportedTransferEncoding",
        TurboError::Protocol(_) => "Protocol",
        TurboError::FlowControl(_) => "FlowControl",
        TurboError::GoAway(_) => "GoAway",
        TurboError::ProxyConnectionFailed(_) => "ProxyConnectionFailed",
        TurboError::ProxyTunnelFailed(_) => "ProxyTunnelFailed",
        TurboError::ProxyAuthenticationRequired => "ProxyAuthenticationRequired",
        TurboError::Cancelled => "Cancelled",
        TurboError::InvalidArgument(_) => "InvalidArgument",
        TurboError::Cache(_) => "Cache",
        TurboError::WebSocket(_) => "WebSocket",
    }
    .to_string()
}

fn synthesize(request: &Request, stored: &StoredEntry) -> Response {
    let entry = &stored.entry;
    if entry.throws_exception {
        let error = entry.error.as_ref().map_or(TurboError::Protocol("replayed entry marked as throwing with no error detail".into()), |e| {
            TurboError::Protocol(format!("{}: {}", e.error_type, e.message))
        });
        return errored_response(request.clone(), error);
    }
    let headers = from_multimap(&entry.response_headers);
    let body = entry
        .response_body_base64
        .as_deref()
        .and_then(|b| base64::engine::general_purpose::STANDARD.decode(b).ok())
        .unwrap_or_default();
    Response::new(entry.status_code as u16, headers, Body::Owned(body), Arc::new(request.clone()), Duration::ZERO)
}

fn errored_response(request: Request, error: TurboError) -> Response {
    Response::new(0, HeaderMap::new(), Body::Empty, Arc::new(request), Duration::ZERO).with_error(error)
}
