//! Cache key construction: base key, vary key, storage key, signature.

use httpcore::{HeaderMap, Method};

/// `upper(method) + " " + canonical_uri`.
pub fn base_key(method: &Method, canonical_uri: &str) -> String {
    format!("{} {}", method.as_str().to_ascii_uppercase(), canonical_uri)
}

/// `base_key + "|" + vary_key`.
pub fn storage_key(base_key: &str, vary_key: &str) -> String {
    format!("{base_key}|{vary_key}")
}

/// `sorted(vary_header_names).join("\n")`, used as the variant index's
/// per-base-key set member. Empty when no `Vary` selectors apply.
pub fn signature(vary_header_names: &[String]) -> String {
    let mut names: Vec<String> = vary_header_names.iter().map(|n| n.to_ascii_lowercase()).collect();
    names.sort();
    names.dedup();
    names.join("\n")
}

/// For each selected header name (lowercased, sorted): `name=` then, for
/// each request value, `len:value` joined by `,`, terminated by `;`.
/// Absent headers are represented by the token `~`. The whole key collapses
/// to the literal token `~` when `vary_header_names` is empty.
pub fn vary_key(vary_header_names: &[String], request_headers: &HeaderMap) -> String {
    if vary_header_names.is_empty() {
        return "~".to_string();
    }
    let mut names: Vec<String> = vary_header_names.iter().map(|n| n.to_ascii_lowercase()).collect();
    names.sort();
    names.dedup();

    let mut out = String::new();
    for name in &names {
        out.push_str(name);
        out.push('=');
        let values: Vec<&str> = request_headers.get_all(name).collect();
        if values.is_empty() {
            out.push('~');
        } else {
            let parts: Vec<String> = values.iter().map(|v| format!("{}:{v}", v.len())).collect();
            out.push_str(&parts.join(","));
        }
        out.push(';');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpcore::Method;

    #[test]
    fn base_key_uppercases_method() {
        assert_eq!(base_key(&Method::Get, "https://h/x"), "GET https://h/x");
    }

    #[test]
    fn vary_key_is_tilde_when_no_selectors() {
        assert_eq!(vary_key(&[], &HeaderMap::new()), "~");
    }

    #[test]
    fn vary_key_encodes_absent_header_as_tilde_token() {
        let key = vary_key(&["accept-encoding".to_string()], &HeaderMap::new());
        assert_eq!(key, "accept-encoding=~;");
    }

    #[test]
    fn vary_key_encodes_length_prefixed_values_sorted_by_name() {
        let mut headers = HeaderMap::new();
        headers.append("Accept-Encoding", "gzip");
        headers.append("Accept", "text/html");
        let key = vary_key(&["Accept".to_string(), "Accept-Encoding".to_string()], &headers);
        assert_eq!(key, "accept=9:text/html;accept-encoding=4:gzip;");
    }

    #[test]
    fn signature_sorts_and_joins_with_newline() {
        assert_eq!(signature(&["Accept".to_string(), "accept-encoding".to_string()]), "accept\naccept-encoding");
        assert_eq!(signature(&[]), "");
    }

    #[test]
    fn storage_key_concatenates_with_pipe() {
        assert_eq!(storage_key("GET https://h/x", "~"), "GET https://h/x|~");
    }
}
