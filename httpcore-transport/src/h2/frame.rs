//! RFC 7540 §4 frame header and payload encoding/decoding.

use httpcore::TurboError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FRAME_HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    fn from_u8(v: u8) -> Self {
        match v {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Data => 0x0,
            Self::Headers => 0x1,
            Self::Priority => 0x2,
            Self::RstStream => 0x3,
            Self::Settings => 0x4,
            Self::PushPromise => 0x5,
            Self::Ping => 0x6,
            Self::GoAway => 0x7,
            Self::WindowUpdate => 0x8,
            Self::Continuation => 0x9,
            Self::Unknown(v) => v,
        }
    }
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: FrameType, flags: u8, stream_id: u32, payload: Vec<u8>) -> Self {
        Frame {
            header: FrameHeader {
                length: payload.len() as u32,
                frame_type,
                flags,
                stream_id,
            },
            payload,
        }
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.header.flags & flag != 0
    }

    /// RFC 7540 §6.9: window updates carry a single 31-bit increment.
    pub fn window_update_increment(&self) -> Result<u32, TurboError> {
        if self.payload.len() != 4 {
            return Err(TurboError::Protocol("malformed WINDOW_UPDATE frame".into()));
        }
        let raw = u32::from_be_bytes([self.payload[0], self.payload[1], self.payload[2], self.payload[3]]);
        Ok(raw & 0x7fff_ffff)
    }

    /// RFC 7540 §6.8: GOAWAY carries the last processed stream id and an error code.
    pub fn goaway_parts(&self) -> Result<(u32, u32), TurboError> {
        if self.payload.len() < 8 {
            return Err(TurboError::Protocol("malformed GOAWAY frame".into()));
        }
        let last_stream_id = u32::from_be_bytes([self.payload[0], self.payload[1], self.payload[2], self.payload[3]]) & 0x7fff_ffff;
        let error_code = u32::from_be_bytes([self.payload[4], self.payload[5], self.payload[6], self.payload[7]]);
        Ok((last_stream_id, error_code))
    }

    /// RFC 7540 §6.5: SETTINGS frame payload is a sequence of (id: u16, value: u32) pairs.
    pub fn settings_parts(&self) -> Result<Vec<(u16, u32)>, TurboError> {
        if self.payload.len() % 6 != 0 {
            return Err(TurboError::Protocol("malformed SETTINGS frame".into()));
        }
        Ok(self
            .payload
            .chunks_exact(6)
            .map(|chunk| {
                let id = u16::from_be_bytes([chunk[0], chunk[1]]);
                let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
                (id, value)
            })
            .collect())
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> std::io::Result<()> {
    let len = frame.payload.len() as u32;
    let mut header = [0u8; FRAME_HEADER_LEN];
    header[0] = ((len >> 16) & 0xff) as u8;
    header[1] = ((len >> 8) & 0xff) as u8;
    header[2] = (len & 0xff) as u8;
    header[3] = frame.header.frame_type.to_u8();
    header[4] = frame.header.flags;
    header[5..9].copy_from_slice(&(frame.header.stream_id & 0x7fff_ffff).to_be_bytes());
    writer.write_all(&header).await?;
    writer.write_all(&frame.payload).await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max_frame_size: u32) -> Result<Frame, TurboError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| TurboError::Network(e.to_string()))?;
    let length = (u32::from(header[0]) << 16) | (u32::from(header[1]) << 8) | u32::from(header[2]);
    if length > max_frame_size {
        return Err(TurboError::FlowControl(format!(
            "frame length {length} exceeds negotiated max {max_frame_size}"
        )));
    }
    let frame_type = FrameType::from_u8(header[3]);
    let flags = header[4];
    let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;

    let mut payload = vec![0u8; length as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| TurboError::Network(e.to_string()))?;

    Ok(Frame {
        header: FrameHeader { length, frame_type, flags, stream_id },
        payload,
    })
}
