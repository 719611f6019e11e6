use super::{MAX_BODY_BYTES, MAX_HEADER_BLOCK, MAX_HEADER_LINE, MAX_INTERIM_RESPONSES};
use httpcore::{HeaderMap, Method, TurboError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Parsed HTTP/1.x response, prior to being handed to the caller as a
/// [`httpcore::Response`].
#[derive(Debug)]
pub struct ParsedResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Whether the connection should be returned to the pool.
    pub keep_alive: bool,
    /// `true` for 101 Switching Protocols: the connection is now the
    /// caller's and must not be reused or closed by the pool.
    pub upgraded: bool,
}

/// Read and parse one HTTP/1.x response from `reader`, its policies.
pub async fn read_response<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    request_method: &Method,
    request_http_10: bool,
) -> Result<ParsedResponse, TurboError> {
    let mut interim_count = 0usize;
    loop {
        let (http_version, status, reason) = read_status_line(reader).await?;
        let headers = read_headers(reader).await?;

        if (100..200).contains(&status) && status != 101 {
            interim_count += 1;
            if interim_count > MAX_INTERIM_RESPONSES {
                return Err(TurboError::MalformedResponse(
                    "too many interim 1xx responses".into(),
                ));
            }
            continue; // 1xx (not 101) carries no body; loop for the real response.
        }

        let http_10 = http_version == "1.0";
        let mut keep_alive = infer_keep_alive(&headers, http_10 || request_http_10);

        if status == 101 {
            return Ok(ParsedResponse {
                status,
                reason,
                headers,
                body: Vec::new(),
                keep_alive: false,
                upgraded: true,
            });
        }

        let body = read_body(reader, request_method, status, &headers, &mut keep_alive).await?;

        return Ok(ParsedResponse {
            status,
            reason,
            headers,
            body,
            keep_alive,
            upgraded: false,
        });
    }
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, TurboError> {
    let mut raw = Vec::new();
    let n = reader
        .read_until(b'\n', &mut raw)
        .await
        .map_err(|e| TurboError::Network(e.to_string()))?;
    if n == 0 {
        return Err(TurboError::MalformedResponse("unexpected EOF reading line".into()));
    }
    if raw.len() > MAX_HEADER_LINE {
        return Err(TurboError::MalformedResponse("header line too long".into()));
    }
    while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8(raw).map_err(|_| TurboError::MalformedResponse("non-UTF8 header line".into()))
}

async fn read_status_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<(String, u16, String), TurboError> {
    let line = read_line(reader).await?;
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| TurboError::MalformedResponse("missing status line".into()))?;
    let http_version = version
        .strip_prefix("HTTP/")
        .ok_or_else(|| TurboError::MalformedResponse(format!("bad version: {version}")))?
        .to_string();
    let code_str = parts
        .next()
        .ok_or_else(|| TurboError::MalformedResponse("missing status code".into()))?;
    let code: u16 = code_str
        .parse()
        .map_err(|_| TurboError::MalformedResponse(format!("bad status code: {code_str}")))?;
    if !(100..=999).contains(&code) {
        return Err(TurboError::MalformedResponse(format!("status code out of range: {code}")));
    }
    let reason = parts.next().unwrap_or("").to_string();
    Ok((http_version, code, reason))
}

async fn read_headers<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<HeaderMap, TurboError> {
    let mut headers = HeaderMap::new();
    let mut total = 0usize;
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
        total += line.len();
        if total > MAX_HEADER_BLOCK {
            return Err(TurboError::MalformedResponse("header block too large".into()));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TurboError::MalformedResponse(format!("malformed header line: {line}")))?;
        headers.append(name.trim(), value.trim());
    }
    validate_content_length(&headers)?;
    Ok(headers)
}

fn validate_content_length(headers: &HeaderMap) -> Result<(), TurboError> {
    let values: Vec<&str> = headers.get_all("Content-Length").map(str::trim).collect();
    if values.len() > 1 && !values.windows(2).all(|w| w[0] == w[1]) {
        return Err(TurboError::MalformedResponse(
            "conflicting Content-Length values".into(),
        ));
    }
    Ok(())
}

fn infer_keep_alive(headers: &HeaderMap, http_10: bool) -> bool {
    let default = !http_10;
    match headers.get("Connection").map(first_token) {
        Some(tok) if tok.eq_ignore_ascii_case("close") => false,
        Some(tok) if tok.eq_ignore_ascii_case("keep-alive") => true,
        _ => default,
    }
}

/// Only the first token of `Connection` is consulted.
fn first_token(value: &str) -> &str {
    value.split(',').next().unwrap_or(value).trim()
}

async fn read_body<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    method: &Method,
    status: u16,
    headers: &HeaderMap,
    keep_alive: &mut bool,
) -> Result<Vec<u8>, TurboError> {
    if matches!(method, Method::Head) || matches!(status, 204 | 304) {
        return Ok(Vec::new());
    }

    if let Some(te) = headers.get("Transfer-Encoding") {
        let te_lower = te.to_ascii_lowercase();
        if te_lower == "identity" {
            return read_by_length_or_eof(reader, headers, keep_alive).await;
        }
        if te_lower.ends_with("chunked") {
            return read_chunked(reader).await;
        }
        return Err(TurboError::UnsupportedTransferEncoding(te.to_string()));
    }

    if let Some(len) = headers.get("Content-Length") {
        let len: u64 = len
            .trim()
            .parse()
            .map_err(|_| TurboError::MalformedResponse(format!("bad content-length: {len}")))?;
        if len > MAX_BODY_BYTES {
            return Err(TurboError::MalformedResponse("body exceeds max size".into()));
        }
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| TurboError::Network(e.to_string()))?;
        return Ok(buf);
    }

    read_to_eof(reader, keep_alive).await
}

async fn read_by_length_or_eof<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    headers: &HeaderMap,
    keep_alive: &mut bool,
) -> Result<Vec<u8>, TurboError> {
    if let Some(len) = headers.get("Content-Length") {
        let len: u64 = len
            .trim()
            .parse()
            .map_err(|_| TurboError::MalformedResponse(format!("bad content-length: {len}")))?;
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(|e| TurboError::Network(e.to_string()))?;
        return Ok(buf);
    }
    read_to_eof(reader, keep_alive).await
}

async fn read_to_eof<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    keep_alive: &mut bool,
) -> Result<Vec<u8>, TurboError> {
    let mut buf = Vec::new();
    reader
        .take(MAX_BODY_BYTES)
        .read_to_end(&mut buf)
        .await
        .map_err(|e| TurboError::Network(e.to_string()))?;
    *keep_alive = false; // read-to-EOF always downgrades keep-alive.
    Ok(buf)
}

async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, TurboError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_str, 16)
            .map_err(|_| TurboError::MalformedResponse(format!("bad chunk size: {line}")))?;
        if body.len() as u64 + size > MAX_BODY_BYTES {
            return Err(TurboError::MalformedResponse("chunked body exceeds max size".into()));
        }
        if size == 0 {
            // Trailer headers, discarded  open question (deferred).
            loop {
                let trailer_line = read_line(reader).await?;
                if trailer_line.is_empty() {
                    break;
                }
            }
            break;
        }
        let mut chunk = vec![0u8; size as usize];
        reader
            .read_exact(&mut chunk)
            .await
            .map_err(|e| TurboError::Network(e.to_string()))?;
        body.extend_from_slice(&chunk);

        // Mandatory CRLF (or bare LF, its line-terminator robustness)
        // after chunk data.
        let trailing = read_line(reader).await?;
        if !trailing.is_empty() {
            return Err(TurboError::MalformedResponse(
                "missing CRLF after chunk data".into(),
            ));
        }
    }
    Ok(body)
}
