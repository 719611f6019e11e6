//! End-to-end HTTP/2 connection-level and stream-level flow control: a
//! request body larger than the peer's advertised window must be split
//! across multiple DATA frames, unblocking only as WINDOW_UPDATE frames
//! arrive.

use httpcore_transport::h2::connection::Connection;
use httpcore_transport::h2::frame::{self, flags, Frame, FrameType};
use httpcore_transport::h2::hpack;
use tokio::io::AsyncReadExt;

const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

async fn read_client_preface_and_settings<S: tokio::io::AsyncRead + Unpin>(server: &mut S) {
    let mut preface = [0u8; 24];
    server.read_exact(&mut preface).await.unwrap();
    assert_eq!(&preface, PREFACE);
    let _client_settings = frame::read_frame(server, 1 << 20).await.unwrap();
}

#[tokio::test]
async fn request_body_larger_than_window_is_split_across_data_frames_until_window_update() {
    let (client_io, mut server_io) = tokio::io::duplex(64 * 1024);

    let server = tokio::spawn(async move {
        read_client_preface_and_settings(&mut server_io).await;

        // Advertise a tiny initial window so a single write must split.
        let mut settings_payload = Vec::new();
        settings_payload.extend_from_slice(&0x4u16.to_be_bytes());
        settings_payload.extend_from_slice(&16u32.to_be_bytes());
        let settings = Frame::new(FrameType::Settings, 0, 0, settings_payload);
        frame::write_frame(&mut server_io, &settings).await.unwrap();
        let settings_ack = Frame::new(FrameType::Settings, flags::ACK, 0, Vec::new());
        frame::write_frame(&mut server_io, &settings_ack).await.unwrap();

        // First DATA frame from the client should be capped at the window.
        let first = frame::read_frame(&mut server_io, 1 << 20).await.unwrap();
        assert_eq!(first.header.frame_type, FrameType::Data);
        assert_eq!(first.payload.len(), 16);
        assert!(!first.has_flag(flags::END_STREAM));

        // Grant more window; client should send the remainder and END_STREAM.
        let mut window_payload = Vec::new();
        window_payload.extend_from_slice(&48u32.to_be_bytes());
        let window_update = Frame::new(FrameType::WindowUpdate, 0, first.header.stream_id, window_payload);
        frame::write_frame(&mut server_io, &window_update).await.unwrap();

        let second = frame::read_frame(&mut server_io, 1 << 20).await.unwrap();
        assert_eq!(second.header.frame_type, FrameType::Data);
        assert_eq!(second.payload.len(), 32);
        assert!(second.has_flag(flags::END_STREAM));

        // Respond so the client's recv_response() call completes.
        let mut encoder = hpack::Encoder::new(4096);
        let block = encoder.encode_block(&[(":status".to_string(), "200".to_string())]);
        let headers = Frame::new(FrameType::Headers, flags::END_HEADERS, first.header.stream_id, block);
        frame::write_frame(&mut server_io, &headers).await.unwrap();
        let end = Frame::new(FrameType::Data, flags::END_STREAM, first.header.stream_id, Vec::new());
        frame::write_frame(&mut server_io, &end).await.unwrap();
    });

    let connection = Connection::handshake(client_io).await.unwrap();
    // Give the background reader task a chance to apply the server's
    // SETTINGS before a stream is opened against the default window.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let mut stream = connection
        .open_stream(&[(":method".to_string(), "POST".to_string()), (":path".to_string(), "/upload".to_string())], false)
        .unwrap();

    let body = vec![0x42u8; 48];
    stream.send_data(&body, true).await.unwrap();
    let response = stream.recv_response().await.unwrap();
    assert_eq!(response.headers.get(":status"), Some("200"));

    server.await.unwrap();
}
