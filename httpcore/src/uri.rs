//! Deterministic URI canonicalization, shared by the cache and the
//! record/replay transport as the stable string embedded in their keys.

use crate::error::TurboError;

/// Canonicalize an absolute URI its five ordered rules.
///
/// Returns `Err(TurboError::InvalidArgument)` if `uri` has no scheme/host,
/// i.e. is not absolute.
pub fn canonicalize(uri: &str) -> Result<String, TurboError> {
    let (scheme, rest) = split_scheme(uri)?;
    let scheme_lower = scheme.to_ascii_lowercase();

    let (authority, path_and_query) = split_authority(rest);
    let (host, port) = split_host_port(authority)?;
    let host_lower = host.to_ascii_lowercase();

    let default_port = default_port_for(&scheme_lower);
    let port_suffix = match port {
        Some(p) if Some(p) != default_port => format!(":{p}"),
        _ => String::new(),
    };

    let (path, query) = split_path_query(path_and_query);

    if is_fast_path(path, query) {
        let mut out = String::with_capacity(
            scheme_lower.len() + 3 + host_lower.len() + port_suffix.len() + path.len() + query.map_or(0, |q| q.len() + 1),
        );
        out.push_str(&scheme_lower);
        out.push_str("://");
        out.push_str(&host_lower);
        out.push_str(&port_suffix);
        out.push_str(path);
        if let Some(q) = query {
            if !q.is_empty() {
                out.push('?');
                out.push_str(q);
            }
        }
        return Ok(out);
    }

    let canonical_path = canonicalize_path(path);
    let canonical_query = query.map(canonicalize_query);

    let mut out = String::new();
    out.push_str(&scheme_lower);
    out.push_str("://");
    out.push_str(&host_lower);
    out.push_str(&port_suffix);
    out.push_str(&canonical_path);
    if let Some(q) = canonical_query {
        if !q.is_empty() {
            out.push('?');
            out.push_str(&q);
        }
    }
    Ok(out)
}

fn is_fast_path(path: &str, query: Option<&str>) -> bool {
    let path_ok = !path.contains('%')
        && !path.contains("//")
        && !path.split('/').any(|seg| seg == "." || seg == "..");
    let query_ok = query.map_or(true, |q| !q.contains('%') && !q.contains('&'));
    path_ok && query_ok
}

fn split_scheme(uri: &str) -> Result<(&str, &str), TurboError> {
    match uri.split_once("://") {
        Some((scheme, rest)) if !scheme.is_empty() => Ok((scheme, rest)),
        _ => Err(TurboError::InvalidArgument(format!("not an absolute URI: {uri}"))),
    }
}

fn split_authority(rest: &str) -> (&str, &str) {
    match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    }
}

fn split_host_port(authority: &str) -> Result<(&str, Option<u16>), TurboError> {
    if authority.is_empty() {
        return Err(TurboError::InvalidArgument("missing host".into()));
    }
    // IPv6 literal: [::1]:8080
    if let Some(stripped) = authority.strip_prefix('[') {
        if let Some(end) = stripped.find(']') {
            let host = &authority[..end + 2];
            let after = &authority[end + 2..];
            let port = after.strip_prefix(':').map(|p| p.parse::<u16>()).transpose()
                .map_err(|_| TurboError::InvalidArgument("invalid port".into()))?;
            return Ok((host, port));
        }
    }
    match authority.rsplit_once(':') {
        Some((host, port_str)) if port_str.chars().all(|c| c.is_ascii_digit()) && !port_str.is_empty() => {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| TurboError::InvalidArgument("invalid port".into()))?;
            Ok((host, Some(port)))
        }
        _ => Ok((authority, None)),
    }
}

fn default_port_for(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        _ => None,
    }
}

fn split_path_query(path_and_query: &str) -> (&str, Option<&str>) {
    if path_and_query.is_empty() {
        return ("/", None);
    }
    match path_and_query.split_once('?') {
        Some((p, q)) => (if p.is_empty() { "/" } else { p }, Some(q)),
        None => (path_and_query, None),
    }
}

fn canonicalize_path(path: &str) -> String {
    let had_trailing_slash = path.len() > 1 && path.ends_with('/');
    let mut segments: Vec<String> = Vec::new();
    for raw_seg in path.split('/') {
        if raw_seg.is_empty() {
            continue;
        }
        let seg = normalize_percent_segment(raw_seg);
        if seg == "." {
            continue;
        }
        if seg == ".." {
            segments.pop();
            continue;
        }
        segments.push(seg);
    }
    let mut out = String::from("/");
    out.push_str(&segments.join("/"));
    if had_trailing_slash && !out.ends_with('/') {
        out.push('/');
    }
    out
}

fn canonicalize_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(usize, String, Option<String>)> = Vec::new();
    for (idx, item) in query.split('&').enumerate() {
        if item.is_empty() {
            continue;
        }
        match item.split_once('=') {
            Some((name, value)) => pairs.push((
                idx,
                normalize_percent_segment(name),
                Some(normalize_percent_segment(value)),
            )),
            None => pairs.push((idx, normalize_percent_segment(item), None)),
        }
    }
    // Stable sort by name, ties keep original relative (insertion) order.
    pairs.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
    pairs
        .into_iter()
        .map(|(_, name, value)| match value {
            Some(v) => format!("{name}={v}"),
            None => name,
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Normalize percent-encoded triplets in one path segment or query
/// name/value: hex digits uppercased, and the triplet replaced by the
/// literal character when the decoded byte is RFC 3986 §2.3 unreserved.
fn normalize_percent_segment(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = String::with_capacity(segment.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() && is_hex(bytes[i + 1]) && is_hex(bytes[i + 2]) {
            let hi = hex_val(bytes[i + 1]);
            let lo = hex_val(bytes[i + 2]);
            let decoded = (hi << 4) | lo;
            if is_unreserved(decoded) {
                out.push(decoded as char);
            } else {
                out.push('%');
                out.push(hex_digit_upper(hi));
                out.push(hex_digit_upper(lo));
            }
            i += 3;
        } else {
            out.push(bytes[i] as char);
            i += 1;
        }
    }
    out
}

fn is_hex(b: u8) -> bool {
    b.is_ascii_hexdigit()
}

fn hex_val(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

fn hex_digit_upper(v: u8) -> char {
    match v {
        0..=9 => (b'0' + v) as char,
        _ => (b'A' + (v - 10)) as char,
    }
}

fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        assert_eq!(
            canonicalize("HTTP://Example.COM/a").unwrap(),
            "http://example.com/a"
        );
    }

    #[test]
    fn elides_default_ports() {
        assert_eq!(canonicalize("http://h:80/x").unwrap(), "http://h/x");
        assert_eq!(canonicalize("https://h:443/x").unwrap(), "https://h/x");
        assert_eq!(canonicalize("https://h:8443/x").unwrap(), "https://h:8443/x");
    }

    #[test]
    fn collapses_dot_segments_and_keeps_trailing_slash() {
        assert_eq!(
            canonicalize("http://h/a/./b/../c/").unwrap(),
            "http://h/a/c/"
        );
        assert_eq!(canonicalize("http://h/a/b").unwrap(), "http://h/a/b");
    }

    #[test]
    fn normalizes_percent_encoding_case_and_unreserved_bytes() {
        // %7e -> ~ (unreserved); %2f stays escaped (not unreserved), hex uppercased.
        assert_eq!(canonicalize("http://h/a%7e%2f").unwrap(), "http://h/a~%2F");
    }

    #[test]
    fn sorts_query_params_by_name_preserving_duplicate_relative_order() {
        assert_eq!(
            canonicalize("http://h/x?b=2&a=1&a=0").unwrap(),
            "http://h/x?a=1&a=0&b=2"
        );
    }

    #[test]
    fn query_without_equals_retains_shape() {
        assert_eq!(canonicalize("http://h/x?flag&b=1").unwrap(), "http://h/x?b=1&flag");
    }

    #[test]
    fn empty_query_after_normalization_is_omitted() {
        assert_eq!(canonicalize("http://h/x?").unwrap(), "http://h/x");
    }

    #[test]
    fn fast_path_reattaches_as_is() {
        assert_eq!(canonicalize("http://h/a/b?x=1&y=2").unwrap(), "http://h/a/b?x=1&y=2");
    }

    #[test]
    fn non_absolute_uri_is_invalid_argument() {
        let err = canonicalize("/just/a/path").unwrap_err();
        assert!(matches!(err, TurboError::InvalidArgument(_)));
    }

    #[test]
    fn idempotence_holds_for_a_battery_of_uris() {
        let uris = [
            "http://Example.com:80/a/../b/./c?z=1&a=2",
            "https://h/%2e%2e/x",
            "http://h:8080/weird%2fpath?a=1&a=2&b",
            "http://h/",
            "https://[::1]:443/x",
        ];
        for u in uris {
            let once = canonicalize(u).unwrap();
            let twice = canonicalize(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {u}");
        }
    }

    #[test]
    fn ipv6_host_is_lowercased_and_default_port_elided() {
        assert_eq!(canonicalize("https://[::1]:443/x").unwrap(), "https://[::1]/x");
    }
}
