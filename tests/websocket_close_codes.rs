//! Close-code validation on a live connection, driven over an in-memory
//! duplex standing in for the TCP socket: 1005 and 1006 are reserved and
//! must never be sent on the wire.

use base64::Engine;
use httpcore::{TurboError, WebSocketErrorKind};
use httpcore_transport::pool::BoxedStream;
use httpcore_ws::connection;
use httpcore_ws::handshake::HandshakeRequest;
use httpcore_ws::options::WebSocketConnectionOptions;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

fn accept_value(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(MAGIC.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

async fn read_handshake_request<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.unwrap();
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8(buf).unwrap()
}

fn extract_header<'a>(request: &'a str, name: &str) -> &'a str {
    request
        .lines()
        .find_map(|line| line.strip_prefix(&format!("{name}: ")))
        .unwrap_or_else(|| panic!("missing {name} header in handshake request"))
        .trim()
}

async fn connected_pair() -> (connection::WebSocketConnection, tokio::task::JoinHandle<()>) {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let request = read_handshake_request(&mut server_io).await;
        let key = extract_header(&request, "Sec-WebSocket-Key");
        let accept = accept_value(key);
        let response =
            format!("HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n");
        server_io.write_all(response.as_bytes()).await.unwrap();
        // Keep the other half alive until the client's close frame (if any)
        // has a destination; drop it once the test body finishes with the
        // connection.
        let mut sink = [0u8; 256];
        let _ = server_io.read(&mut sink).await;
    });

    let req = HandshakeRequest {
        host: "test.local".to_string(),
        path_and_query: "/ws".to_string(),
        sub_protocols: Vec::new(),
        extra_headers: Vec::new(),
        offer_permessage_deflate: false,
    };
    let stream = Box::pin(client_io) as BoxedStream;
    let conn = connection::connect(stream, req, WebSocketConnectionOptions::default()).await.unwrap();
    (conn, server)
}

#[tokio::test]
async fn closing_with_code_1005_is_rejected() {
    let (conn, server) = connected_pair().await;
    let err = conn.close(1005, "").await.unwrap_err();
    assert!(matches!(err, TurboError::WebSocket(WebSocketErrorKind::InvalidCloseCode)));
    drop(conn);
    let _ = server.await;
}

#[tokio::test]
async fn closing_with_code_1006_is_rejected() {
    let (conn, server) = connected_pair().await;
    let err = conn.close(1006, "").await.unwrap_err();
    assert!(matches!(err, TurboError::WebSocket(WebSocketErrorKind::InvalidCloseCode)));
    drop(conn);
    let _ = server.await;
}

#[tokio::test]
async fn closing_with_a_normal_code_succeeds() {
    let (conn, server) = connected_pair().await;
    conn.close(1000, "bye").await.unwrap();
    drop(conn);
    let _ = server.await;
}
