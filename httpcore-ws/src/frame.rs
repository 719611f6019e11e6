//! WebSocket frame header encode/decode (§4.10, RFC 6455 §5.2).

use httpcore::{TurboError, WebSocketErrorKind};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
const MAX_CONTROL_PAYLOAD: usize = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_u8(b: u8) -> Option<OpCode> {
        match b {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }

    pub fn is_data(self) -> bool {
        matches!(self, OpCode::Text | OpCode::Binary | OpCode::Continuation)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// Reader-side acceptance rules.
#[derive(Debug, Clone, Copy)]
pub struct ReaderLimits {
    pub max_message_size: usize,
    pub allow_masked_server_frames: bool,
    pub permitted_rsv1: bool,
}

impl Default for ReaderLimits {
    fn default() -> Self {
        ReaderLimits { max_message_size: DEFAULT_MAX_MESSAGE_SIZE, allow_masked_server_frames: false, permitted_rsv1: false }
    }
}

fn protocol_err(_msg: impl Into<String>) -> TurboError {
    TurboError::WebSocket(WebSocketErrorKind::ProtocolViolation)
}

/// Read one frame header + payload from a server connection, applying the
/// reader-side validation rules. Unmasks the payload if masked and
/// `allow_masked_server_frames` permits it.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, limits: &ReaderLimits) -> Result<Frame, TurboError> {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await.map_err(|e| TurboError::Network(e.to_string()))?;

    let fin = head[0] & 0x80 != 0;
    let rsv1 = head[0] & 0x40 != 0;
    let rsv2 = head[0] & 0x20 != 0;
    let rsv3 = head[0] & 0x10 != 0;
    let opcode_bits = head[0] & 0x0F;
    let opcode = OpCode::from_u8(opcode_bits).ok_or(TurboError::WebSocket(WebSocketErrorKind::ReservedOpcode))?;

    if rsv2 || rsv3 || (rsv1 && !limits.permitted_rsv1) {
        return Err(protocol_err("unexpected RSV bit set without a matching negotiated extension"));
    }

    let masked = head[1] & 0x80 != 0;
    if masked && !limits.allow_masked_server_frames {
        return Err(TurboError::WebSocket(WebSocketErrorKind::MaskedServerFrame));
    }

    let len7 = head[1] & 0x7F;
    let payload_len = match len7 {
        126 => {
            let mut ext = [0u8; 2];
            reader.read_exact(&mut ext).await.map_err(|e| TurboError::Network(e.to_string()))?;
            u64::from(u16::from_be_bytes(ext))
        }
        127 => {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext).await.map_err(|e| TurboError::Network(e.to_string()))?;
            u64::from_be_bytes(ext)
        }
        n => u64::from(n),
    };

    if opcode.is_control() && (!fin || payload_len > MAX_CONTROL_PAYLOAD as u64) {
        return Err(protocol_err("control frame must be FIN=1 with payload <= 125 bytes"));
    }
    if payload_len as usize > limits.max_message_size {
        return Err(TurboError::WebSocket(WebSocketErrorKind::DecompressedMessageTooLarge));
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        reader.read_exact(&mut key).await.map_err(|e| TurboError::Network(e.to_string()))?;
        Some(key)
    } else {
        None
    };

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await.map_err(|e| TurboError::Network(e.to_string()))?;
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame { fin, rsv1, rsv2, rsv3, opcode, payload })
}

/// Write one frame, always masked (client → server per RFC 6455 §5.1).
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, fin: bool, rsv1: bool, opcode: OpCode, payload: &[u8]) -> Result<(), TurboError> {
    let mut header = Vec::with_capacity(14 + payload.len());
    let mut byte0 = opcode.to_u8();
    if fin {
        byte0 |= 0x80;
    }
    if rsv1 {
        byte0 |= 0x40;
    }
    header.push(byte0);

    let len = payload.len();
    if len < 126 {
        header.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        header.push(0x80 | 126);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        header.push(0x80 | 127);
        header.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mut mask_key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask_key);
    header.extend_from_slice(&mask_key);

    let mut masked_payload = payload.to_vec();
    apply_mask(&mut masked_payload, mask_key);

    writer.write_all(&header).await.map_err(|e| TurboError::Network(e.to_string()))?;
    writer.write_all(&masked_payload).await.map_err(|e| TurboError::Network(e.to_string()))?;
    Ok(())
}

/// Write a message, fragmenting it into frames no larger than `threshold`
/// bytes each: `FIN=0` on all but the last, `opcode` only on the
/// first, `Continuation` afterwards.
pub async fn write_message_fragmented<W: AsyncWrite + Unpin>(writer: &mut W, opcode: OpCode, payload: &[u8], rsv1_on_first: bool, threshold: usize) -> Result<(), TurboError> {
    if payload.is_empty() {
        return write_frame(writer, true, rsv1_on_first, opcode, &[]).await;
    }
    let mut offset = 0;
    let mut first = true;
    while offset < payload.len() {
        let end = (offset + threshold).min(payload.len());
        let is_last = end == payload.len();
        let frame_opcode = if first { opcode } else { OpCode::Continuation };
        write_frame(writer, is_last, first && rsv1_on_first, frame_opcode, &payload[offset..end]).await?;
        offset = end;
        first = false;
    }
    Ok(())
}

fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
