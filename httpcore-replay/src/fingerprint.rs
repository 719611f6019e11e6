//! Request key construction and body hashing.

use httpcore::{HeaderMap, Method};
use sha2::{Digest, Sha256};

/// Headers consulted for the header signature absent an explicit allow-list.
pub const DEFAULT_MATCH_HEADERS: &[&str] = &["accept", "accept-encoding", "content-type", "content-encoding"];

/// Headers never allowed into the signature even if explicitly requested.
const DENY_LIST: &[&str] = &["date", "x-correlation-id", "x-request-id", "authorization", "cookie", "proxy-authorization"];

const SAMPLE_THRESHOLD: usize = 1024 * 1024;
const SAMPLE_CHUNK: usize = 64 * 1024;

/// `method | canonical_uri | header_signature | body_hash`.
pub fn request_key(method: &Method, canonical_uri: &str, headers: &HeaderMap, body: Option<&[u8]>, match_headers: &[String], excluded: &[String]) -> String {
    format!(
        "{} | {} | {} | {}",
        method.as_str().to_ascii_uppercase(),
        canonical_uri,
        header_signature(headers, match_headers, excluded),
        body_hash(body),
    )
}

/// `method | canonical_uri`, used as the fallback key under `Relaxed` mismatch policy.
pub fn relaxed_key(method: &Method, canonical_uri: &str) -> String {
    format!("{} | {}", method.as_str().to_ascii_uppercase(), canonical_uri)
}

/// Deterministic signature over an allow-listed, deny-filtered subset of
/// request headers: `name=value1,value2;` per matched name, sorted by name.
fn header_signature(headers: &HeaderMap, match_headers: &[String], excluded: &[String]) -> String {
    let allow: Vec<String> = if match_headers.is_empty() {
        DEFAULT_MATCH_HEADERS.iter().map(|s| s.to_string()).collect()
    } else {
        match_headers.iter().map(|s| s.to_ascii_lowercase()).collect()
    };
    let excluded_lower: Vec<String> = excluded.iter().map(|s| s.to_ascii_lowercase()).collect();

    let mut names: Vec<String> = allow
        .into_iter()
        .filter(|n| !DENY_LIST.contains(&n.as_str()) && !excluded_lower.contains(n))
        .collect();
    names.sort();
    names.dedup();

    let mut out = String::new();
    for name in &names {
        let values: Vec<&str> = headers.get_all(name).collect();
        if values.is_empty() {
            continue;
        }
        out.push_str(name);
        out.push('=');
        out.push_str(&values.join(","));
        out.push(';');
    }
    out
}

/// `sha256:` + lowercase-hex. Bodies over 1 MiB are sampled: first 64 KiB,
/// last 64 KiB, then the 8-byte little-endian length — not a cryptographic
/// commitment to the whole body, just enough to distinguish recordings.
pub fn body_hash(body: Option<&[u8]>) -> String {
    let Some(body) = body else {
        return format!("sha256:{}", hex::encode(Sha256::digest([])));
    };
    let mut hasher = Sha256::new();
    if body.len() <= SAMPLE_THRESHOLD {
        hasher.update(body);
    } else {
        hasher.update(&body[..SAMPLE_CHUNK]);
        hasher.update(&body[body.len() - SAMPLE_CHUNK..]);
        hasher.update((body.len() as u64).to_le_bytes());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_signature_uses_default_allow_list_when_unspecified() {
        let mut headers = HeaderMap::new();
        headers.append("Accept", "application/json");
        headers.append("X-Secret", "shh");
        let sig = header_signature(&headers, &[], &[]);
        assert_eq!(sig, "accept=application/json;");
    }

    #[test]
    fn header_signature_never_includes_deny_listed_names() {
        let mut headers = HeaderMap::new();
        headers.append("Authorization", "Bearer x");
        let sig = header_signature(&headers, &["authorization".to_string()], &[]);
        assert_eq!(sig, "");
    }

    #[test]
    fn body_hash_is_stable_for_identical_bytes() {
        assert_eq!(body_hash(Some(b"hello")), body_hash(Some(b"hello")));
        assert_ne!(body_hash(Some(b"hello")), body_hash(Some(b"world")));
    }

    #[test]
    fn body_hash_of_absent_body_matches_empty_slice() {
        assert_eq!(body_hash(None), body_hash(Some(b"")));
    }

    #[test]
    fn request_key_includes_all_four_segments() {
        let key = request_key(&Method::Get, "https://h/x", &HeaderMap::new(), None, &[], &[]);
        assert_eq!(key.matches(" | ").count(), 3);
    }
}
