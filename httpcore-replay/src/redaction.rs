//! Redaction applied to recordings before they hit disk.

use httpcore::HeaderMap;
use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

pub const DEFAULT_SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "proxy-authorization", "x-api-key"];
pub const DEFAULT_SENSITIVE_QUERY_PARAMS: &[&str] = &["token", "api_key", "apikey", "access_token", "signature"];
pub const DEFAULT_SENSITIVE_JSON_FIELDS: &[&str] = &["token", "password", "secret", "apikey", "api_key", "access_token", "refresh_token"];

#[derive(Debug, Clone)]
pub struct RedactionPolicy {
    pub sensitive_headers: Vec<String>,
    pub sensitive_query_params: Vec<String>,
    pub sensitive_json_fields: Vec<String>,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        RedactionPolicy {
            sensitive_headers: DEFAULT_SENSITIVE_HEADERS.iter().map(|s| s.to_string()).collect(),
            sensitive_query_params: DEFAULT_SENSITIVE_QUERY_PARAMS.iter().map(|s| s.to_string()).collect(),
            sensitive_json_fields: DEFAULT_SENSITIVE_JSON_FIELDS.iter().map(|s| s.to_ascii_lowercase()).collect(),
        }
    }
}

impl RedactionPolicy {
    pub fn redact_headers(&self, headers: &HeaderMap) -> HeaderMap {
        let mut out = HeaderMap::new();
        for (name, value) in headers.iter() {
            if self.sensitive_headers.iter().any(|s| s.eq_ignore_ascii_case(name)) {
                out.append(name, REDACTED);
            } else {
                out.append(name, value);
            }
        }
        out
    }

    /// Redact matching query parameter values in an absolute or relative
    /// URI, leaving the path and parameter names untouched.
    pub fn redact_uri(&self, uri: &str) -> String {
        let Some((base, query)) = uri.split_once('?') else {
            return uri.to_string();
        };
        let redacted_query: Vec<String> = query
            .split('&')
            .map(|pair| match pair.split_once('=') {
                Some((name, _value)) if self.sensitive_query_params.iter().any(|s| s.eq_ignore_ascii_case(name)) => {
                    format!("{name}={REDACTED}")
                }
                _ => pair.to_string(),
            })
            .collect();
        format!("{base}?{}", redacted_query.join("&"))
    }

    /// Redact a JSON body in place if `content_type` is `application/json`;
    /// non-JSON bodies pass through unchanged.
    pub fn redact_json_body(&self, content_type: Option<&str>, body: &[u8]) -> Vec<u8> {
        if !content_type.is_some_and(|ct| ct.to_ascii_lowercase().starts_with("application/json")) {
            return body.to_vec();
        }
        let Ok(mut value) = serde_json::from_slice::<Value>(body) else {
            return body.to_vec();
        };
        self.redact_json_value(&mut value);
        serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
    }

    fn redact_json_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for (key, v) in map.iter_mut() {
                    if self.sensitive_json_fields.contains(&key.to_ascii_lowercase()) {
                        *v = Value::String(REDACTED.to_string());
                    } else {
                        self.redact_json_value(v);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact_json_value(item);
                }
            }
            _ => {}
        }
    }
}
