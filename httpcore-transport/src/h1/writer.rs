use httpcore::Request;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Serialize `req` directly into pooled buffers and flush it to `writer`.
///
/// No intermediate string concatenation: the request line, headers,
/// and body are written as successive `write_all` calls against the caller's
/// writer, which itself wraps a pooled `BytesMut` for buffering upstream of
/// the socket.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    req: &Request,
) -> std::io::Result<()> {
    let (path, host_header) = split_request_target(&req.uri);

    writer
        .write_all(format!("{} {} HTTP/1.1\r\n", req.method, path).as_bytes())
        .await?;

    if !req.headers().contains("Host") {
        if let Some(host) = host_header {
            writer.write_all(format!("Host: {host}\r\n").as_bytes()).await?;
        }
    }

    let mut wrote_content_length = false;
    for (name, value) in req.headers().iter() {
        if name.eq_ignore_ascii_case("content-length") {
            wrote_content_length = true;
        }
        writer.write_all(format!("{name}: {value}\r\n").as_bytes()).await?;
    }

    if let Some(body) = req.body() {
        if !wrote_content_length && !req.headers().contains("Transfer-Encoding") {
            writer
                .write_all(format!("Content-Length: {}\r\n", body.len()).as_bytes())
                .await?;
        }
    }

    writer.write_all(b"\r\n").await?;

    if let Some(body) = req.body() {
        writer.write_all(body).await?;
    }

    writer.flush().await
}

/// Split an absolute request URI into `(request_target, host_header)`.
fn split_request_target(uri: &str) -> (String, Option<String>) {
    if let Some((_scheme, rest)) = uri.split_once("://") {
        let (authority, path_and_query) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        let target = if path_and_query.is_empty() { "/".to_string() } else { path_and_query.to_string() };
        (target, Some(authority.to_string()))
    } else {
        (uri.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpcore::Method;

    #[tokio::test]
    async fn writes_request_line_host_and_content_length() {
        let req = Request::new(Method::Post, "http://example.com/a/b")
            .with_header("Accept", "*/*")
            .with_body(b"hi".to_vec());
        let mut buf = Vec::new();
        write_request(&mut buf, &req).await.unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.starts_with("POST /a/b HTTP/1.1\r\n"));
        assert!(s.contains("Host: example.com\r\n"));
        assert!(s.contains("Content-Length: 2\r\n"));
        assert!(s.ends_with("\r\n\r\nhi"));
    }

    #[tokio::test]
    async fn does_not_duplicate_explicit_host_header() {
        let req = Request::new(Method::Get, "http://example.com/").with_header("Host", "other.example");
        let mut buf = Vec::new();
        write_request(&mut buf, &req).await.unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert_eq!(s.matches("Host:").count(), 1);
        assert!(s.contains("Host: other.example"));
    }
}
