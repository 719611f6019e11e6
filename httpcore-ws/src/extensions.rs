//! `permessage-deflate` (§4.11, RFC 7692).

use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use httpcore::{TurboError, WebSocketErrorKind};
use std::io::Read;

/// Bytes RFC 7692 §7.2.1 says to strip from the end of a deflated message
/// before sending, and to append before inflating on receipt.
const TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

#[derive(Debug, Clone, Copy, Default)]
pub struct PermessageDeflateConfig {
    pub client_no_context_takeover: bool,
    pub server_no_context_takeover: bool,
}

/// Parse the `Sec-WebSocket-Extensions` response value for `permessage-deflate`,
/// returning `None` if the server didn't offer it.
pub fn parse_server_offer(header_value: &str) -> Option<PermessageDeflateConfig> {
    header_value.split(',').find_map(|offer| {
        let mut parts = offer.split(';').map(str::trim);
        if parts.next()? != "permessage-deflate" {
            return None;
        }
        let mut cfg = PermessageDeflateConfig::default();
        for param in parts {
            match param {
                "client_no_context_takeover" => cfg.client_no_context_takeover = true,
                "server_no_context_takeover" => cfg.server_no_context_takeover = true,
                _ => {}
            }
        }
        Some(cfg)
    })
}

pub fn offer_header_value() -> String {
    "permessage-deflate; client_no_context_takeover; server_no_context_takeover".to_string()
}

/// Deflate a message payload and strip the sync-flush trailer.
pub fn deflate(payload: &[u8]) -> Result<Vec<u8>, TurboError> {
    let mut encoder = DeflateEncoder::new(payload, Compression::default());
    let mut out = Vec::new();
    encoder
        .read_to_end(&mut out)
        .map_err(|_| TurboError::WebSocket(WebSocketErrorKind::SerializationFailed))?;
    if out.ends_with(&TRAILER) {
        out.truncate(out.len() - TRAILER.len());
    }
    Ok(out)
}

/// Append the trailer back and inflate, enforcing `max_decompressed_size`.
pub fn inflate(payload: &[u8], max_decompressed_size: usize) -> Result<Vec<u8>, TurboError> {
    let mut input = Vec::with_capacity(payload.len() + TRAILER.len());
    input.extend_from_slice(payload);
    input.extend_from_slice(&TRAILER);

    let mut decoder = DeflateDecoder::new(&input[..]);
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = decoder.read(&mut chunk).map_err(|_| TurboError::WebSocket(WebSocketErrorKind::DecompressedMessageTooLarge))?;
        if n == 0 {
            break;
        }
        if out.len() + n > max_decompressed_size {
            return Err(TurboError::WebSocket(WebSocketErrorKind::DecompressedMessageTooLarge));
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_then_inflate_round_trips() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = deflate(&payload).unwrap();
        let decompressed = inflate(&compressed, 1024 * 1024).unwrap();
        assert_eq!(decompressed, payload);
    }

    #[test]
    fn inflate_enforces_max_size() {
        let payload = vec![b'a'; 4096];
        let compressed = deflate(&payload).unwrap();
        let err = inflate(&compressed, 16).unwrap_err();
        assert!(matches!(err, TurboError::WebSocket(WebSocketErrorKind::DecompressedMessageTooLarge)));
    }

    #[test]
    fn parses_server_offer_with_both_no_context_takeover_params() {
        let cfg = parse_server_offer("permessage-deflate; client_no_context_takeover; server_no_context_takeover").unwrap();
        assert!(cfg.client_no_context_takeover);
        assert!(cfg.server_no_context_takeover);
    }

    #[test]
    fn unrelated_extension_offer_is_ignored() {
        assert!(parse_server_offer("permessage-bzip2").is_none());
    }
}
