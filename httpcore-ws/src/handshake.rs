//! WebSocket opening handshake (§4.11, RFC 6455 §4).

use crate::extensions::{self, PermessageDeflateConfig};
use base64::Engine;
use httpcore::{HeaderMap, TurboError, WebSocketErrorKind};
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_RESPONSE_HEADER_LINE: usize = 8 * 1024;

pub struct HandshakeRequest {
    pub host: String,
    pub path_and_query: String,
    pub sub_protocols: Vec<String>,
    pub extra_headers: Vec<(String, String)>,
    pub offer_permessage_deflate: bool,
}

pub struct HandshakeOutcome {
    pub sub_protocol: Option<String>,
    pub permessage_deflate: Option<PermessageDeflateConfig>,
}

fn generate_key() -> String {
    let mut raw = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut raw);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

fn accept_value(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(MAGIC.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Reject header values that would let a caller inject a CRLF and smuggle
/// extra request lines into the handshake.
fn reject_crlf(value: &str) -> Result<(), TurboError> {
    if value.contains('\r') || value.contains('\n') {
        return Err(TurboError::InvalidArgument("header value must not contain CRLF".into()));
    }
    Ok(())
}

pub async fn perform<S: AsyncRead + AsyncWrite + Unpin>(stream: &mut S, req: HandshakeRequest) -> Result<HandshakeOutcome, TurboError> {
    let key = generate_key();
    let expected_accept = accept_value(&key);

    let mut lines = Vec::new();
    lines.push(format!("GET {} HTTP/1.1", req.path_and_query));
    lines.push(format!("Host: {}", req.host));
    lines.push("Upgrade: websocket".to_string());
    lines.push("Connection: Upgrade".to_string());
    lines.push(format!("Sec-WebSocket-Key: {key}"));
    lines.push("Sec-WebSocket-Version: 13".to_string());
    if !req.sub_protocols.is_empty() {
        lines.push(format!("Sec-WebSocket-Protocol: {}", req.sub_protocols.join(", ")));
    }
    if req.offer_permessage_deflate {
        lines.push(format!("Sec-WebSocket-Extensions: {}", extensions::offer_header_value()));
    }
    for (name, value) in &req.extra_headers {
        reject_crlf(name)?;
        reject_crlf(value)?;
        lines.push(format!("{name}: {value}"));
    }

    let mut request_bytes = lines.join("\r\n");
    request_bytes.push_str("\r\n\r\n");
    stream.write_all(request_bytes.as_bytes()).await.map_err(|e| TurboError::Network(e.to_string()))?;
    stream.flush().await.map_err(|e| TurboError::Network(e.to_string()))?;

    let (status, headers) = read_response_head(stream).await?;
    validate_response(&status, &headers, &expected_accept, &req.sub_protocols)
}

async fn read_response_head<S: AsyncRead + Unpin>(stream: &mut S) -> Result<(String, HeaderMap), TurboError> {
    let status_line = read_line(stream).await?;
    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(stream).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| TurboError::Protocol(format!("malformed handshake header: {line}")))?;
        headers.append(name.trim(), value.trim());
    }
    Ok((status_line, headers))
}

async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String, TurboError> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let n = stream.read(&mut byte).await.map_err(|e| TurboError::Network(e.to_string()))?;
        if n == 0 {
            return Err(TurboError::MalformedResponse("connection closed mid-handshake".into()));
        }
        if byte[0] == b'\n' {
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            break;
        }
        buf.push(byte[0]);
        if buf.len() > MAX_RESPONSE_HEADER_LINE {
            return Err(TurboError::MalformedResponse("handshake header line too long".into()));
        }
    }
    String::from_utf8(buf).map_err(|_| TurboError::MalformedResponse("handshake header line is not valid UTF-8".into()))
}

fn validate_response(status_line: &str, headers: &HeaderMap, expected_accept: &str, offered_protocols: &[String]) -> Result<HandshakeOutcome, TurboError> {
    let status_code = status_line.split_whitespace().nth(1).and_then(|s| s.parse::<u16>().ok());
    if status_code != Some(101) {
        return Err(TurboError::Protocol(format!("handshake rejected: {status_line}")));
    }

    let upgrade = headers.get("upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(TurboError::Protocol("Upgrade header does not contain websocket".into()));
    }

    let connection = headers.get("connection").unwrap_or_default();
    if !connection.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")) {
        return Err(TurboError::Protocol("Connection header does not contain Upgrade".into()));
    }

    let accept = headers.get("sec-websocket-accept").ok_or_else(|| TurboError::Protocol("missing Sec-WebSocket-Accept".into()))?;
    if accept != expected_accept {
        return Err(TurboError::Protocol("Sec-WebSocket-Accept mismatch".into()));
    }

    let sub_protocol = headers.get("sec-websocket-protocol").map(str::to_string);
    if let Some(proto) = &sub_protocol {
        if !offered_protocols.iter().any(|p| p == proto) {
            return Err(TurboError::Protocol(format!("server selected unoffered sub-protocol: {proto}")));
        }
    }

    let permessage_deflate = match headers.get("sec-websocket-extensions") {
        Some(value) => extensions::parse_server_offer(value),
        None => None,
    };
    if headers.get("sec-websocket-extensions").is_some() && permessage_deflate.is_none() {
        return Err(TurboError::WebSocket(WebSocketErrorKind::ExtensionNegotiationFailed));
    }

    Ok(HandshakeOutcome { sub_protocol, permessage_deflate })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn raw_response(body: &str) -> BufReader<std::io::Cursor<Vec<u8>>> {
        BufReader::new(std::io::Cursor::new(body.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn accepts_a_well_formed_101_response() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = accept_value(key);
        let body = format!("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n");
        let mut stream = raw_response(&body);
        let (status, headers) = read_response_head(&mut stream).await.unwrap();
        let outcome = validate_response(&status, &headers, &accept, &[]).unwrap();
        assert!(outcome.sub_protocol.is_none());
    }

    #[tokio::test]
    async fn rejects_mismatched_accept() {
        let body = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: bogus\r\n\r\n";
        let mut stream = raw_response(body);
        let (status, headers) = read_response_head(&mut stream).await.unwrap();
        assert!(validate_response(&status, &headers, "expected", &[]).is_err());
    }

    #[tokio::test]
    async fn rejects_non_101_status() {
        let body = "HTTP/1.1 404 Not Found\r\n\r\n";
        let mut stream = raw_response(body);
        let (status, headers) = read_response_head(&mut stream).await.unwrap();
        assert!(validate_response(&status, &headers, "x", &[]).is_err());
    }

    #[test]
    fn crlf_injection_in_header_value_is_rejected() {
        assert!(reject_crlf("value\r\nX-Evil: 1").is_err());
    }

    #[test]
    fn accept_value_matches_rfc_6455_worked_example() {
        assert_eq!(accept_value("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }
}
