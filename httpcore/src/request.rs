use crate::header::HeaderMap;
use crate::method::Method;
use std::collections::HashMap;
use std::time::Duration;

/// Immutable HTTP request value.
///
/// Ownership: the caller owns a `Request` until handed to the transport; the
/// transport treats it as borrowed, cloning headers itself when it needs a
/// modified copy (e.g. conditional revalidation). There is no interior
/// mutability — "modification" always produces a new `Request`.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    metadata: HashMap<String, String>,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            metadata: HashMap::new(),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::Get, uri)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Builder: returns a new `Request` with `headers` cloned and the given
    /// header appended. Never mutates `self`.
    #[must_use]
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.headers.append(name, value);
        clone
    }

    #[must_use]
    pub fn with_headers_replaced(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.headers.set(name, value);
        clone
    }

    #[must_use]
    pub fn with_body(&self, body: impl Into<Vec<u8>>) -> Self {
        let mut clone = self.clone();
        clone.body = Some(body.into());
        clone
    }

    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut clone = self.clone();
        clone.timeout = Some(timeout);
        clone
    }

    #[must_use]
    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut clone = self.clone();
        clone.metadata.insert(key.into(), value.into());
        clone
    }

    /// Build a conditional-revalidation clone : same request, with
    /// `If-None-Match`/`If-Modified-Since` appended when available.
    #[must_use]
    pub fn as_conditional(&self, etag: Option<&str>, last_modified: Option<&str>) -> Self {
        let mut clone = self.clone();
        if let Some(etag) = etag {
            clone.headers.set("If-None-Match", etag);
        }
        if let Some(lm) = last_modified {
            clone.headers.set("If-Modified-Since", lm);
        }
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_header_does_not_mutate_original() {
        let base = Request::get("http://h/x");
        let derived = base.with_header("Accept", "application/json");
        assert!(base.headers().get("accept").is_none());
        assert_eq!(derived.headers().get("Accept"), Some("application/json"));
    }

    #[test]
    fn as_conditional_sets_validators() {
        let base = Request::get("http://h/x");
        let conditional = base.as_conditional(Some("\"v1\""), Some("Tue, 01 Jan 2030"));
        assert_eq!(conditional.headers().get("If-None-Match"), Some("\"v1\""));
        assert_eq!(
            conditional.headers().get("If-Modified-Since"),
            Some("Tue, 01 Jan 2030")
        );
        assert!(base.headers().get("If-None-Match").is_none());
    }
}
