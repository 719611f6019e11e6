//! HTTP/2 connection: preface/SETTINGS exchange, a reader task that
//! demultiplexes frames onto per-stream queues, and a writer task that
//! serializes outbound frames under a single mutex.

use super::frame::{self, flags, Frame, FrameType};
use super::hpack;
use httpcore::{HeaderMap, TurboError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, warn};

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
const DEFAULT_INITIAL_WINDOW: u32 = 65_535;
const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
const DEFAULT_HEADER_TABLE_SIZE: usize = 4_096;
const MAX_HEADER_LIST_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct PeerSettings {
    pub header_table_size: usize,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_concurrent_streams: Option<u32>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        PeerSettings {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            initial_window_size: DEFAULT_INITIAL_WINDOW,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: None,
        }
    }
}

/// A received response's header block and accumulated body, handed to the
/// caller once `END_STREAM` arrives (or a RST_STREAM/GOAWAY fails it first).
pub struct StreamResponse {
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

enum StreamEvent {
    Headers(HeaderMap),
    Data(Vec<u8>),
    End,
    Reset(TurboError),
}

struct StreamState {
    send_window: i64,
    events: mpsc::UnboundedSender<StreamEvent>,
    window_notify: Arc<Notify>,
}

enum Outbound {
    Frame(Frame),
}

/// Handle to a single client-initiated stream, returned to the caller that
/// opened it. Drives the request body out and the response back in.
pub struct StreamHandle {
    stream_id: u32,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    shared: Arc<Shared>,
}

impl StreamHandle {
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Send a DATA frame, blocking on flow control as needed. `end_stream`
    /// marks this as the final chunk of the request body.
    pub async fn send_data(&self, mut chunk: &[u8], end_stream: bool) -> Result<(), TurboError> {
        loop {
            let grant = self.shared.await_send_capacity(self.stream_id, chunk.len()).await?;
            if grant == 0 && chunk.is_empty() {
                let frame = Frame::new(FrameType::Data, if end_stream { flags::END_STREAM } else { 0 }, self.stream_id, Vec::new());
                self.outbound.send(Outbound::Frame(frame)).map_err(|_| TurboError::Cancelled)?;
                return Ok(());
            }
            let take = grant.min(chunk.len());
            let (head, rest) = chunk.split_at(take);
            let is_last = rest.is_empty();
            let frame_flags = if is_last && end_stream { flags::END_STREAM } else { 0 };
            self.shared.consume_send_window(self.stream_id, take)?;
            let frame = Frame::new(FrameType::Data, frame_flags, self.stream_id, head.to_vec());
            self.outbound.send(Outbound::Frame(frame)).map_err(|_| TurboError::Cancelled)?;
            chunk = rest;
            if chunk.is_empty() {
                return Ok(());
            }
        }
    }

    /// Await the full response (headers + accumulated body). Fails early on
    /// RST_STREAM or a connection-level GOAWAY/teardown.
    pub async fn recv_response(&mut self) -> Result<StreamResponse, TurboError> {
        let mut headers = None;
        let mut body = Vec::new();
        loop {
            match self.events.recv().await {
                Some(StreamEvent::Headers(h)) => headers = Some(h),
                Some(StreamEvent::Data(chunk)) => body.extend_from_slice(&chunk),
                Some(StreamEvent::End) => {
                    let headers = headers.ok_or_else(|| TurboError::Protocol("stream ended before HEADERS".into()))?;
                    return Ok(StreamResponse { headers, body });
                }
                Some(StreamEvent::Reset(err)) => return Err(err),
                None => return Err(TurboError::Cancelled),
            }
        }
    }
}

struct Shared {
    streams: Mutex<HashMap<u32, StreamState>>,
    connection_send_window: Mutex<i64>,
    connection_notify: Notify,
    peer_settings: Mutex<PeerSettings>,
    go_away: Mutex<Option<u32>>,
}

impl Shared {
    async fn await_send_capacity(&self, stream_id: u32, desired: usize) -> Result<usize, TurboError> {
        loop {
            if let Some(last) = *self.go_away.lock().unwrap() {
                if stream_id > last {
                    return Err(TurboError::GoAway("peer sent GOAWAY before this stream was accepted".into()));
                }
            }
            let conn_window = *self.connection_send_window.lock().unwrap();
            let stream_notify = {
                let streams = self.streams.lock().unwrap();
                let state = streams.get(&stream_id).ok_or_else(|| TurboError::Protocol("unknown stream".into()))?;
                if state.send_window > 0 && conn_window > 0 {
                    return Ok((state.send_window.min(conn_window).min(desired as i64)).max(0) as usize);
                }
                state.window_notify.clone()
            };
            tokio::select! {
                () = stream_notify.notified() => {}
                () = self.connection_notify.notified() => {}
            }
        }
    }

    fn consume_send_window(&self, stream_id: u32, amount: usize) -> Result<(), TurboError> {
        let mut conn = self.connection_send_window.lock().unwrap();
        *conn -= amount as i64;
        let mut streams = self.streams.lock().unwrap();
        let state = streams.get_mut(&stream_id).ok_or_else(|| TurboError::Protocol("unknown stream".into()))?;
        state.send_window -= amount as i64;
        Ok(())
    }

    fn apply_window_update(&self, stream_id: u32, increment: u32) {
        if stream_id == 0 {
            let mut conn = self.connection_send_window.lock().unwrap();
            *conn += i64::from(increment);
            self.connection_notify.notify_waiters();
            return;
        }
        let mut streams = self.streams.lock().unwrap();
        if let Some(state) = streams.get_mut(&stream_id) {
            state.send_window += i64::from(increment);
            state.window_notify.notify_waiters();
        }
    }
}

/// An open HTTP/2 connection. Cloning shares the underlying writer queue and
/// stream table; the pool hands clones to concurrent callers.
#[derive(Clone)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Outbound>,
    next_stream_id: Arc<AtomicU32>,
    shared: Arc<Shared>,
    encoder: Arc<Mutex<hpack::Encoder>>,
}

impl Connection {
    /// Perform the connection preface and initial SETTINGS exchange, then
    /// spawn the reader and writer tasks.
    pub async fn handshake<S>(mut stream: S) -> Result<Self, TurboError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        stream
            .write_all(PREFACE)
            .await
            .map_err(|e| TurboError::Network(e.to_string()))?;
        let initial_settings = Frame::new(FrameType::Settings, 0, 0, Vec::new());
        frame::write_frame(&mut stream, &initial_settings)
            .await
            .map_err(|e| TurboError::Network(e.to_string()))?;

        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        let shared = Arc::new(Shared {
            streams: Mutex::new(HashMap::new()),
            connection_send_window: Mutex::new(i64::from(DEFAULT_INITIAL_WINDOW)),
            connection_notify: Notify::new(),
            peer_settings: Mutex::new(PeerSettings::default()),
            go_away: Mutex::new(None),
        });

        tokio::spawn(writer_task(write_half, outbound_rx));
        tokio::spawn(reader_task(read_half, shared.clone(), outbound_tx.clone()));

        Ok(Connection {
            outbound: outbound_tx,
            next_stream_id: Arc::new(AtomicU32::new(1)),
            shared,
            encoder: Arc::new(Mutex::new(hpack::Encoder::new(DEFAULT_HEADER_TABLE_SIZE))),
        })
    }

    /// Open a new client-initiated stream and send its HEADERS frame.
    pub fn open_stream(&self, headers: &[(String, String)], end_stream: bool) -> Result<StreamHandle, TurboError> {
        if self.shared.go_away.lock().unwrap().is_some() {
            return Err(TurboError::GoAway("connection is going away, refusing new streams".into()));
        }
        let stream_id = self.next_stream_id.fetch_add(2, Ordering::SeqCst);
        let initial_window = self.shared.peer_settings.lock().unwrap().initial_window_size;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.shared.streams.lock().unwrap().insert(
            stream_id,
            StreamState {
                send_window: i64::from(initial_window),
                events: events_tx,
                window_notify: Arc::new(Notify::new()),
            },
        );

        let block = self.encoder.lock().unwrap().encode_block(headers);
        let frame = Frame::new(
            FrameType::Headers,
            flags::END_HEADERS | if end_stream { flags::END_STREAM } else { 0 },
            stream_id,
            block,
        );
        self.outbound.send(Outbound::Frame(frame)).map_err(|_| TurboError::Cancelled)?;

        Ok(StreamHandle {
            stream_id,
            outbound: self.outbound.clone(),
            events: events_rx,
            shared: self.shared.clone(),
        })
    }
}

async fn writer_task<W>(mut write_half: W, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(Outbound::Frame(frame)) = outbound_rx.recv().await {
        if let Err(e) = frame::write_frame(&mut write_half, &frame).await {
            warn!(error = %e, "http/2 writer task: socket write failed, shutting down");
            return;
        }
    }
}

async fn reader_task<R>(mut read_half: R, shared: Arc<Shared>, outbound: mpsc::UnboundedSender<Outbound>)
where
    R: AsyncRead + Unpin,
{
    let mut max_frame_size = DEFAULT_MAX_FRAME_SIZE;
    let mut decoder = hpack::Decoder::new(DEFAULT_HEADER_TABLE_SIZE, MAX_HEADER_LIST_BYTES);

    loop {
        let frame = match frame::read_frame(&mut read_half, max_frame_size).await {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "http/2 connection closed or errored, tearing down streams");
                fail_all_streams(&shared, e);
                return;
            }
        };

        match frame.header.frame_type {
            FrameType::Settings => {
                if frame.has_flag(flags::ACK) {
                    continue;
                }
                if let Ok(pairs) = frame.settings_parts() {
                    let mut settings = shared.peer_settings.lock().unwrap();
                    for (id, value) in pairs {
                        match id {
                            0x1 => settings.header_table_size = value as usize,
                            0x3 => settings.max_concurrent_streams = Some(value),
                            0x4 => settings.initial_window_size = value,
                            0x5 => max_frame_size = value,
                            _ => {}
                        }
                    }
                }
                let ack = Frame::new(FrameType::Settings, flags::ACK, 0, Vec::new());
                let _ = outbound.send(Outbound::Frame(ack));
            }
            FrameType::WindowUpdate => {
                if let Ok(increment) = frame.window_update_increment() {
                    shared.apply_window_update(frame.header.stream_id, increment);
                }
            }
            FrameType::Headers => {
                let header_block = &frame.payload;
                match decoder.decode_block(header_block) {
                    Ok(headers) => emit(&shared, frame.header.stream_id, StreamEvent::Headers(headers)),
                    Err(_) => {
                        fail_all_streams(&shared, TurboError::Protocol("HPACK decompression failure".into()));
                        return;
                    }
                }
                if frame.has_flag(flags::END_STREAM) {
                    emit(&shared, frame.header.stream_id, StreamEvent::End);
                }
            }
            FrameType::Data => {
                emit(&shared, frame.header.stream_id, StreamEvent::Data(frame.payload));
                if frame.has_flag(flags::END_STREAM) {
                    emit(&shared, frame.header.stream_id, StreamEvent::End);
                }
            }
            FrameType::RstStream => {
                emit(&shared, frame.header.stream_id, StreamEvent::Reset(TurboError::Protocol("peer reset stream".into())));
            }
            FrameType::GoAway => {
                if let Ok((last_stream_id, code)) = frame.goaway_parts() {
                    *shared.go_away.lock().unwrap() = Some(last_stream_id);
                    let err = TurboError::GoAway(format!("peer sent GOAWAY (error code {code})"));
                    let mut streams = shared.streams.lock().unwrap();
                    let to_fail: Vec<u32> = streams.keys().copied().filter(|id| *id > last_stream_id).collect();
                    for id in to_fail {
                        if let Some(state) = streams.remove(&id) {
                            let _ = state.events.send(StreamEvent::Reset(err.clone()));
                        }
                    }
                }
            }
            FrameType::Ping => {
                if !frame.has_flag(flags::ACK) {
                    let pong = Frame::new(FrameType::Ping, flags::ACK, 0, frame.payload);
                    let _ = outbound.send(Outbound::Frame(pong));
                }
            }
            FrameType::Priority | FrameType::PushPromise | FrameType::Continuation | FrameType::Unknown(_) => {
                // Priority is accepted but never affects scheduling; push and
                // continuation are not used by this client.
            }
        }
    }
}

fn emit(shared: &Shared, stream_id: u32, event: StreamEvent) {
    let streams = shared.streams.lock().unwrap();
    if let Some(state) = streams.get(&stream_id) {
        let _ = state.events.send(event);
    }
}

fn fail_all_streams(shared: &Shared, err: TurboError) {
    let mut streams = shared.streams.lock().unwrap();
    for (_, state) in streams.drain() {
        let _ = state.events.send(StreamEvent::Reset(err.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_rfc_7540_defaults() {
        let settings = PeerSettings::default();
        assert_eq!(settings.initial_window_size, 65_535);
        assert_eq!(settings.max_frame_size, 16_384);
    }
}
