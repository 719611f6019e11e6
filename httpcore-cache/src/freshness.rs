//! RFC 9111 freshness computation: `Cache-Control` directive parsing
//! and lifetime derivation. The cache is private, so `s-maxage` never
//! contributes to freshness.

use chrono::{DateTime, Utc};
use httpcore::HeaderMap;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub public: bool,
    pub private: bool,
    pub must_revalidate: bool,
    pub max_age: Option<i64>,
    pub s_maxage: Option<i64>,
}

impl CacheControl {
    pub fn parse(value: &str) -> Self {
        let mut cc = CacheControl::default();
        for directive in value.split(',') {
            let directive = directive.trim();
            let (name, arg) = match directive.split_once('=') {
                Some((n, v)) => (n.trim(), Some(v.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-store" => cc.no_store = true,
                "no-cache" => cc.no_cache = true,
                "public" => cc.public = true,
                "private" => cc.private = true,
                "must-revalidate" => cc.must_revalidate = true,
                "max-age" => cc.max_age = arg.and_then(|a| a.parse().ok()),
                "s-maxage" => cc.s_maxage = arg.and_then(|a| a.parse().ok()),
                _ => {}
            }
        }
        cc
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers.get("cache-control").map(Self::parse).unwrap_or_default()
    }

    /// Request-side `no-cache`/`Pragma: no-cache` force-revalidation signal.
    pub fn forces_revalidation(request_headers: &HeaderMap) -> bool {
        Self::from_headers(request_headers).no_cache
            || request_headers
                .get("pragma")
                .is_some_and(|v| v.to_ascii_lowercase().contains("no-cache"))
    }
}

/// Storage lifetime derived from response headers, or `None` if no explicit
/// or heuristic freshness information is available.
pub fn lifetime(response_headers: &HeaderMap, cc: &CacheControl, heuristic_freshness_enabled: bool, heuristic_lifetime: Duration) -> Option<Duration> {
    if let Some(max_age) = cc.max_age {
        let upstream_age = response_headers.get("age").and_then(|a| a.parse::<i64>().ok()).unwrap_or(0);
        let remaining = max_age - upstream_age;
        return Some(Duration::from_secs(remaining.max(0) as u64));
    }
    if let Some(expires) = response_headers.get("expires") {
        return Some(expires_lifetime(expires, response_headers));
    }
    if cc.no_cache {
        // no-cache-style with a validator is stored without freshness;
        // the caller treats `None` + a present validator as "always revalidate".
        return None;
    }
    if heuristic_freshness_enabled {
        return Some(heuristic_lifetime);
    }
    None
}

fn expires_lifetime(expires: &str, response_headers: &HeaderMap) -> Duration {
    if expires.trim() == "0" || expires.trim() == "-1" {
        return Duration::ZERO;
    }
    let Ok(expires_at) = DateTime::parse_from_rfc2822(expires) else {
        return Duration::ZERO;
    };
    let date = response_headers
        .get("date")
        .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let delta = expires_at.with_timezone(&Utc) - date;
    Duration::from_secs(delta.num_seconds().max(0) as u64)
}

/// Whether a validator (`ETag` or `Last-Modified`) is present on the
/// response, making it eligible for conditional revalidation.
pub fn has_validator(response_headers: &HeaderMap) -> bool {
    response_headers.get("etag").is_some() || response_headers.get("last-modified").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_max_age_and_must_revalidate() {
        let cc = CacheControl::parse("max-age=60, must-revalidate");
        assert_eq!(cc.max_age, Some(60));
        assert!(cc.must_revalidate);
    }

    #[test]
    fn s_maxage_is_parsed_but_unused_for_private_cache_freshness() {
        let cc = CacheControl::parse("s-maxage=600, max-age=10");
        assert_eq!(cc.s_maxage, Some(600));
        let mut headers = HeaderMap::new();
        let lt = lifetime(&headers, &cc, false, Duration::ZERO).unwrap();
        assert_eq!(lt, Duration::from_secs(10));
        headers.append("age", "3");
        let cc2 = CacheControl::parse("max-age=10");
        let lt2 = lifetime(&headers, &cc2, false, Duration::ZERO).unwrap();
        assert_eq!(lt2, Duration::from_secs(7));
    }

    #[test]
    fn expires_of_zero_is_already_stale() {
        let mut headers = HeaderMap::new();
        headers.append("Expires", "0");
        let cc = CacheControl::default();
        assert_eq!(lifetime(&headers, &cc, false, Duration::ZERO), Some(Duration::ZERO));
    }

    #[test]
    fn no_explicit_lifetime_uses_heuristic_when_enabled() {
        let headers = HeaderMap::new();
        let cc = CacheControl::default();
        let lt = lifetime(&headers, &cc, true, Duration::from_secs(300)).unwrap();
        assert_eq!(lt, Duration::from_secs(300));
        assert_eq!(lifetime(&headers, &cc, false, Duration::from_secs(300)), None);
    }

    #[test]
    fn request_pragma_no_cache_forces_revalidation() {
        let mut headers = HeaderMap::new();
        headers.append("Pragma", "no-cache");
        assert!(CacheControl::forces_revalidation(&headers));
    }
}
