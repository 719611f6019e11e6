//! Transport façade: leases a pooled connection for a
//! request's origin, dispatches on the negotiated protocol, and returns a
//! response whose body is owned by a pooled buffer.

use crate::h1;
use crate::h2;
use crate::origin::{AlpnProtocol, Origin};
use crate::pool::{AsyncStream, BoxedStream, ConnectionPool, Disposition, LeaseKind, PoolConfig};
use async_trait::async_trait;
use httpcore::response::Body;
use httpcore::{HeaderMap, Request, Response, TurboError};
use rustls_pki_types::ServerName;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

pub use crate::middleware::{Context, Transport};

/// Concrete transport: the thing the middleware pipeline's innermost `next`
/// call reaches, backed by a real connection pool and TLS stack.
pub struct TransportFacade {
    pool: Arc<ConnectionPool>,
    tls_connector: TlsConnector,
}

impl TransportFacade {
    pub fn new(pool_config: PoolConfig) -> Self {
        let mut root_store = tokio_rustls::rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut client_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        client_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        TransportFacade {
            pool: ConnectionPool::new(pool_config),
            tls_connector: TlsConnector::from(Arc::new(client_config)),
        }
    }

    async fn establish(&self, origin: Origin) -> Result<LeaseKind, TurboError> {
        let tcp = TcpStream::connect((origin.host.as_str(), origin.port))
            .await
            .map_err(|e| TurboError::Network(e.to_string()))?;
        let _ = tcp.set_nodelay(true);

        if origin.scheme != "https" && origin.scheme != "wss" {
            let boxed: BoxedStream = Box::pin(tcp);
            return Ok(LeaseKind::Http1(boxed));
        }

        let server_name = ServerName::try_from(origin.host.clone())
            .map_err(|_| TurboError::Tls(format!("invalid DNS name: {}", origin.host)))?;
        let tls_stream = self
            .tls_connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| TurboError::Tls(e.to_string()))?;

        let negotiated_h2 = tls_stream.get_ref().1.alpn_protocol() == Some(b"h2");
        if negotiated_h2 {
            let conn = h2::Connection::handshake(tls_stream).await?;
            Ok(LeaseKind::Http2(conn))
        } else {
            let boxed: BoxedStream = Box::pin(tls_stream);
            Ok(LeaseKind::Http1(boxed))
        }
    }

    async fn send_http1(stream: &mut BoxedStream, request: &Request) -> Result<h1::ParsedResponse, TurboError> {
        {
            let raw: &mut (dyn AsyncStream) = stream.as_mut().get_mut();
            h1::write_request(raw, request)
                .await
                .map_err(|e| TurboError::Network(e.to_string()))?;
        }
        let http_10 = false;
        let raw: &mut (dyn AsyncStream) = stream.as_mut().get_mut();
        let mut reader = BufReader::new(raw);
        h1::read_response(&mut reader, &request.method, http_10).await
    }

    async fn send_http2(conn: &h2::Connection, request: &Request) -> Result<(u16, HeaderMap, Vec<u8>), TurboError> {
        let headers = build_h2_headers(request);
        let body = request.body();
        let mut handle = conn.open_stream(&headers, body.is_none())?;
        if let Some(body) = body {
            handle.send_data(body, true).await?;
        }
        let response = handle.recv_response().await?;
        let status = response
            .headers
            .get(":status")
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| TurboError::Protocol("response missing :status pseudo-header".into()))?;
        let mut headers = response.headers;
        headers.remove(":status");
        Ok((status, headers, response.body))
    }
}

fn build_h2_headers(request: &Request) -> Vec<(String, String)> {
    let origin = Origin::from_uri(&request.uri, AlpnProtocol::Http2).ok();
    let mut headers = Vec::new();
    headers.push((":method".to_string(), request.method.as_str().to_string()));
    headers.push((":scheme".to_string(), origin.as_ref().map(|o| o.scheme.clone()).unwrap_or_else(|| "https".to_string())));
    headers.push((":authority".to_string(), origin.map(|o| format!("{}:{}", o.host, o.port)).unwrap_or_default()));
    headers.push((":path".to_string(), path_and_query(&request.uri)));
    for (name, value) in request.headers().iter() {
        if !name.eq_ignore_ascii_case("host") {
            headers.push((name.to_ascii_lowercase(), value.to_string()));
        }
    }
    headers
}

fn path_and_query(uri: &str) -> String {
    match uri.split_once("://").and_then(|(_, rest)| rest.find('/').map(|idx| rest[idx..].to_string())) {
        Some(p) if !p.is_empty() => p,
        _ => "/".to_string(),
    }
}

#[async_trait]
impl Transport for TransportFacade {
    async fn send(&self, request: Request, ctx: &mut Context) -> Response {
        let started = Instant::now();
        match self.send_inner(&request).await {
            Ok((status, headers, body)) => {
                ctx.record("transport:complete");
                Response::new(status, headers, Body::Owned(body), Arc::new(request), started.elapsed())
            }
            Err(error) => {
                warn!(error = %error, "transport send failed");
                Response::new(0, HeaderMap::new(), Body::Empty, Arc::new(request), started.elapsed()).with_error(error)
            }
        }
    }
}

impl TransportFacade {
    async fn send_inner(&self, request: &Request) -> Result<(u16, HeaderMap, Vec<u8>), TurboError> {
        let preferred_alpn = AlpnProtocol::Http2;
        let origin = Origin::from_uri(&request.uri, preferred_alpn)?;

        let pool = self.pool.clone();
        let mut lease = pool
            .acquire(origin.clone(), |o| self.establish(o))
            .await?;

        let outcome = match lease.kind() {
            LeaseKind::Http1(stream) => {
                let parsed = Self::send_http1(stream, request).await;
                match parsed {
                    Ok(parsed) => {
                        let disposition = if parsed.keep_alive { Disposition::Reusable } else { Disposition::Dead };
                        (Ok((parsed.status, parsed.headers, parsed.body)), disposition)
                    }
                    Err(e) => (Err(e), Disposition::Dead),
                }
            }
            LeaseKind::Http2(conn) => {
                let result = Self::send_http2(conn, request).await;
                let disposition = if result.is_ok() { Disposition::Reusable } else { Disposition::Dead };
                (result, disposition)
            }
        };

        let (result, disposition) = outcome;
        debug!(origin = %origin.host, ok = result.is_ok(), "transport send completed, releasing lease");
        self.pool.release(lease, disposition).await;
        result
    }
}
