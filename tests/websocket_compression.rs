//! A full handshake plus a permessage-deflate compressed message, driven
//! over an in-memory duplex standing in for the TCP socket: the server
//! negotiates the extension and sends an RSV1-flagged frame; the client
//! must decompress it transparently.

use base64::Engine;
use httpcore_transport::pool::BoxedStream;
use httpcore_ws::connection::{self, Message};
use httpcore_ws::extensions;
use httpcore_ws::frame::{self, OpCode};
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

#[tokio::test]
async fn negotiated_permessage_deflate_is_transparently_decompressed() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let request = read_handshake_request(&mut server_io).await;
        let key = extract_header(&request, "Sec-WebSocket-Key");
        assert!(request.contains("Sec-WebSocket-Extensions: permessage-deflate"));
        let accept = accept_value(key);

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             Sec-WebSocket-Extensions: {}\r\n\r\n",
            extensions::offer_header_value()
        );
        server_io.write_all(response.as_bytes()).await.unwrap();

        let original = "compress-me-".repeat(16);
        let compressed = extensions::deflate(original.as_bytes()).unwrap();
        frame::write_frame(&mut server_io, true, true, OpCode::Text, &compressed).await.unwrap();

        original
    });

    let req = HandshakeRequest {
        host: "test.local".to_string(),
        path_and_query: "/ws".to_string(),
        sub_protocols: Vec::new(),
        extra_headers: Vec::new(),
        offer_permessage_deflate: true,
    };
    let stream = Box::pin(client_io) as BoxedStream;
    let conn = connection::connect(stream, req, WebSocketConnectionOptions::default()).await.unwrap();

    let message = tokio::time::timeout(std::time::Duration::from_secs(5), conn.receive()).await.unwrap();
    let original = server.await.unwrap();
    match message {
        Some(Message::Text(text)) => assert_eq!(text, original),
        other => panic!("expected a decompressed text message, got {other:?}"),
    }
}

#[tokio::test]
async fn small_messages_are_sent_uncompressed_below_the_threshold() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        let request = read_handshake_request(&mut server_io).await;
        let key = extract_header(&request, "Sec-WebSocket-Key");
        let accept = accept_value(key);
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        server_io.write_all(response.as_bytes()).await.unwrap();

        let limits = frame::ReaderLimits { allow_masked_server_frames: true, ..frame::ReaderLimits::default() };
        let frame = frame::read_frame(&mut server_io, &limits).await.unwrap();
        assert!(!frame.rsv1, "a short payload must not be compressed");
        assert_eq!(frame.payload, b"hi");
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
    conn.send_text("hi").await.unwrap();

    server.await.unwrap();
}
