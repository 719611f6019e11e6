use crate::buffer_pool::PooledBuffer;
use crate::error::TurboError;
use crate::header::HeaderMap;
use crate::request::Request;
use std::sync::Arc;
use std::time::Duration;

/// Owned response body.
///
/// Either a buffer leased from the shared [`crate::BufferPool`] (released on
/// drop) or, for synthesized responses (cache hits, record/replay), an owned
/// byte vector.
pub enum Body {
    Pooled(PooledBuffer),
    Owned(Vec<u8>),
    Empty,
}

impl Body {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Body::Pooled(b) => b.as_ref(),
            Body::Owned(v) => v.as_slice(),
            Body::Empty => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body").field("len", &self.len()).finish()
    }
}

impl Clone for Body {
    fn clone(&self) -> Self {
        Body::Owned(self.as_slice().to_vec())
    }
}

/// HTTP response value.
///
/// Consumers MUST let a `Response` drop (or call [`Response::release`]
/// explicitly) on every exit path — dropping it runs `Body`'s drop glue,
/// which returns any pooled buffer. There is nothing else to release.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    headers: HeaderMap,
    body: Arc<Body>,
    pub elapsed: Duration,
    pub request: Arc<Request>,
    pub error: Option<TurboError>,
}

impl Response {
    pub fn new(status: u16, headers: HeaderMap, body: Body, request: Arc<Request>, elapsed: Duration) -> Self {
        Self {
            status,
            headers,
            body: Arc::new(body),
            elapsed,
            request,
            error: None,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn with_error(mut self, error: TurboError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }

    /// Explicit release; equivalent to dropping the response, spelled out
    /// for callers in languages without deterministic destructors.
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    fn req() -> Arc<Request> {
        Arc::new(Request::new(Method::Get, "http://h/x"))
    }

    #[test]
    fn status_classification_helpers() {
        let r = Response::new(404, HeaderMap::new(), Body::Empty, req(), Duration::ZERO);
        assert!(r.is_client_error());
        assert!(!r.is_success());
    }

    #[test]
    fn non_standard_status_code_round_trips() {
        let r = Response::new(425, HeaderMap::new(), Body::Empty, req(), Duration::ZERO);
        assert_eq!(r.status, 425);
    }
}
