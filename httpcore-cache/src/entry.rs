//! A single cached response.

use httpcore::HeaderMap;
use std::time::{Duration, Instant};

/// Fixed per-entry bookkeeping overhead counted against the storage byte
/// budget — deterministic so accounting matches across platforms.
pub const METADATA_OVERHEAD_BYTES: usize = 1024;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    stored_at: Instant,
    /// `Age` header value observed at store time (RFC 9111 §4.2.3 initial age).
    pub initial_age: Duration,
    /// Lifetime computed at store time; `None` means no freshness
    /// information was available (always-revalidate, or never stored for
    /// freshness purposes).
    pub lifetime: Option<Duration>,
    pub must_revalidate: bool,
}

impl CacheEntry {
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>, initial_age: Duration, lifetime: Option<Duration>, must_revalidate: bool) -> Self {
        CacheEntry {
            status,
            headers,
            body,
            stored_at: Instant::now(),
            initial_age,
            lifetime,
            must_revalidate,
        }
    }

    pub fn current_age(&self) -> Duration {
        self.initial_age + self.stored_at.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        match self.lifetime {
            Some(lt) => self.current_age() < lt,
            None => false,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.headers.get("last-modified")
    }

    pub fn has_validator(&self) -> bool {
        self.etag().is_some() || self.last_modified().is_some()
    }

    /// `body_length + headers_bytes + METADATA_OVERHEAD_BYTES`.
    pub fn estimated_bytes(&self) -> usize {
        self.body.len() + self.headers.estimated_wire_bytes() + METADATA_OVERHEAD_BYTES
    }

    /// Merge a 304 revalidation response's headers into this entry by name,
    /// refresh its age baseline, and recompute freshness.
    pub fn refresh(&mut self, response_headers: &HeaderMap, new_initial_age: Duration, new_lifetime: Option<Duration>, must_revalidate: bool) {
        for name in response_headers.names_lowercase() {
            self.headers.set(&name, response_headers.get_all(&name).collect::<Vec<_>>().join(", "));
        }
        self.stored_at = Instant::now();
        self.initial_age = new_initial_age;
        self.lifetime = new_lifetime;
        self.must_revalidate = must_revalidate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entry_reports_fresh_until_lifetime_elapses() {
        let entry = CacheEntry::new(200, HeaderMap::new(), vec![], Duration::ZERO, Some(Duration::from_secs(60)), false);
        assert!(entry.is_fresh());
    }

    #[test]
    fn entry_with_no_lifetime_is_never_fresh() {
        let entry = CacheEntry::new(200, HeaderMap::new(), vec![], Duration::ZERO, None, false);
        assert!(!entry.is_fresh());
    }

    #[test]
    fn estimated_bytes_includes_metadata_overhead() {
        let entry = CacheEntry::new(200, HeaderMap::new(), vec![1, 2, 3], Duration::ZERO, None, false);
        assert_eq!(entry.estimated_bytes(), 3 + METADATA_OVERHEAD_BYTES);
    }

    #[test]
    fn refresh_replaces_headers_by_name_and_resets_age() {
        let mut headers = HeaderMap::new();
        headers.append("ETag", "\"v1\"");
        headers.append("X-Stale", "yes");
        let mut entry = CacheEntry::new(200, headers, vec![], Duration::ZERO, Some(Duration::ZERO), false);
        std::thread::sleep(Duration::from_millis(5));

        let mut new_headers = HeaderMap::new();
        new_headers.append("Date", "Tue, 01 Jan 2030 00:00:00 GMT");
        entry.refresh(&new_headers, Duration::ZERO, Some(Duration::from_secs(60)), false);

        assert_eq!(entry.headers.get("x-stale"), Some("yes"));
        assert_eq!(entry.headers.get("date"), Some("Tue, 01 Jan 2030 00:00:00 GMT"));
        assert!(entry.is_fresh());
    }
}
