//! WebSocket façade: `open(uri, options) -> connection`, establishing
//! the raw TCP/TLS socket then driving the handshake.

use crate::connection::{self, WebSocketConnection};
use crate::handshake::HandshakeRequest;
use crate::options::WebSocketConnectionOptions;
use httpcore::TurboError;
use httpcore_transport::pool::BoxedStream;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

pub struct WebSocketFacade {
    tls_connector: TlsConnector,
}

impl Default for WebSocketFacade {
    fn default() -> Self {
        WebSocketFacade::new()
    }
}

impl WebSocketFacade {
    pub fn new() -> Self {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let client_config = ClientConfig::builder().with_root_certificates(root_store).with_no_client_auth();
        WebSocketFacade { tls_connector: TlsConnector::from(Arc::new(client_config)) }
    }

    pub async fn open(&self, uri: &str, options: WebSocketConnectionOptions) -> Result<WebSocketConnection, TurboError> {
        let parsed = ParsedUri::parse(uri)?;
        let stream = self.establish(&parsed).await?;
        let req = HandshakeRequest {
            host: host_header(&parsed),
            path_and_query: parsed.path_and_query,
            sub_protocols: options.sub_protocols.clone(),
            extra_headers: options.extra_headers.clone(),
            offer_permessage_deflate: options.enable_permessage_deflate,
        };
        connection::connect(stream, req, options).await
    }

    async fn establish(&self, parsed: &ParsedUri) -> Result<BoxedStream, TurboError> {
        let tcp = TcpStream::connect((parsed.host.as_str(), parsed.port)).await.map_err(|e| TurboError::Network(e.to_string()))?;
        let _ = tcp.set_nodelay(true);

        if !parsed.tls {
            let boxed: BoxedStream = Box::pin(tcp);
            return Ok(boxed);
        }

        let server_name = ServerName::try_from(parsed.host.clone()).map_err(|_| TurboError::Tls(format!("invalid DNS name: {}", parsed.host)))?;
        let tls_stream = self.tls_connector.connect(server_name, tcp).await.map_err(|e| TurboError::Tls(e.to_string()))?;
        let boxed: BoxedStream = Box::pin(tls_stream);
        Ok(boxed)
    }
}

struct ParsedUri {
    tls: bool,
    host: String,
    port: u16,
    path_and_query: String,
}

impl ParsedUri {
    fn parse(uri: &str) -> Result<ParsedUri, TurboError> {
        let (scheme, rest) = uri.split_once("://").ok_or_else(|| TurboError::InvalidArgument(format!("not an absolute websocket uri: {uri}")))?;
        let tls = match scheme {
            "wss" => true,
            "ws" => false,
            _ => return Err(TurboError::InvalidArgument(format!("unsupported websocket scheme: {scheme}"))),
        };
        let slash_idx = rest.find('/').unwrap_or(rest.len());
        let authority = &rest[..slash_idx];
        let path_and_query = if slash_idx < rest.len() { rest[slash_idx..].to_string() } else { "/".to_string() };

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => (h.to_string(), p.parse().unwrap_or(default_port(tls))),
            _ => (authority.to_string(), default_port(tls)),
        };
        Ok(ParsedUri { tls, host, port, path_and_query })
    }
}

fn default_port(tls: bool) -> u16 {
    if tls {
        443
    } else {
        80
    }
}

fn host_header(parsed: &ParsedUri) -> String {
    if parsed.port == default_port(parsed.tls) {
        parsed.host.clone()
    } else {
        format!("{}:{}", parsed.host, parsed.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wss_with_default_port() {
        let parsed = ParsedUri::parse("wss://example.com/chat").unwrap();
        assert!(parsed.tls);
        assert_eq!(parsed.port, 443);
        assert_eq!(parsed.path_and_query, "/chat");
    }

    #[test]
    fn parses_ws_with_explicit_port_and_no_path() {
        let parsed = ParsedUri::parse("ws://example.com:8080").unwrap();
        assert!(!parsed.tls);
        assert_eq!(parsed.port, 8080);
        assert_eq!(parsed.path_and_query, "/");
    }

    #[test]
    fn rejects_unsupported_scheme() {
        assert!(ParsedUri::parse("http://example.com").is_err());
    }

    #[test]
    fn host_header_omits_default_port() {
        let parsed = ParsedUri::parse("wss://example.com/chat").unwrap();
        assert_eq!(host_header(&parsed), "example.com");
        let parsed = ParsedUri::parse("wss://example.com:8443/chat").unwrap();
        assert_eq!(host_header(&parsed), "example.com:8443");
    }
}
