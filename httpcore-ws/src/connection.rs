//! WebSocket connection state machine: handshake, the send path, the
//! receive pump, keepalive, and the close handshake.

use crate::extensions::{self, PermessageDeflateConfig};
use crate::frame::{self, OpCode, ReaderLimits};
use crate::handshake::{self, HandshakeRequest};
use crate::options::WebSocketConnectionOptions;
use httpcore::{TurboError, WebSocketErrorKind};
use httpcore_transport::pool::BoxedStream;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;

/// Below this payload size, permessage-deflate isn't worth the CPU; chosen
/// as a conservative floor, not a spec-mandated constant.
const DEFLATE_THRESHOLD: usize = 32;
const MAX_CLOSE_REASON_BYTES: usize = 123;

#[derive(Debug, Clone)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> ConnectionState {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloseStatus {
    pub code: u16,
    pub reason: String,
    pub initiated_by_us: bool,
}

struct PendingPing {
    sent_at: Instant,
}

struct Shared {
    state: AtomicU8,
    close_status: StdMutex<Option<CloseStatus>>,
    writer: Mutex<WriteHalf<BoxedStream>>,
    pending_pings: StdMutex<HashMap<[u8; 4], PendingPing>>,
    last_rtt: StdMutex<Option<std::time::Duration>>,
    options: WebSocketConnectionOptions,
    deflate: Option<PermessageDeflateConfig>,
    closed_notify: Notify,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// `CloseStatus` is set exactly once.
    fn set_close_status_once(&self, code: u16, reason: String, initiated_by_us: bool) {
        let mut guard = self.close_status.lock().unwrap();
        if guard.is_none() {
            *guard = Some(CloseStatus { code, reason, initiated_by_us });
        }
    }
}

pub struct WebSocketConnection {
    shared: Arc<Shared>,
    incoming: Arc<Mutex<mpsc::Receiver<Message>>>,
    pump: JoinHandle<()>,
    ping_timer: Option<JoinHandle<()>>,
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.pump.abort();
        if let Some(handle) = &self.ping_timer {
            handle.abort();
        }
    }
}

pub async fn connect(mut stream: BoxedStream, req: HandshakeRequest, options: WebSocketConnectionOptions) -> Result<WebSocketConnection, TurboError> {
    let offer_deflate = req.offer_permessage_deflate;

    let outcome = tokio::time::timeout(options.handshake_timeout, handshake::perform(&mut stream, req))
        .await
        .map_err(|_| TurboError::Timeout)??;

    if options.require_negotiated_extensions && offer_deflate && outcome.permessage_deflate.is_none() {
        return Err(TurboError::WebSocket(WebSocketErrorKind::ExtensionNegotiationFailed));
    }

    let (read_half, write_half) = split(stream);

    let shared = Arc::new(Shared {
        state: AtomicU8::new(ConnectionState::Open as u8),
        close_status: StdMutex::new(None),
        writer: Mutex::new(write_half),
        pending_pings: StdMutex::new(HashMap::new()),
        last_rtt: StdMutex::new(None),
        deflate: outcome.permessage_deflate,
        options: options.clone(),
        closed_notify: Notify::new(),
    });

    let (tx, rx) = mpsc::channel(options.receive_queue_capacity);
    let pump_shared = shared.clone();
    let pump = tokio::spawn(async move { pump_loop(pump_shared, read_half, tx).await });

    let ping_timer = if !options.ping_interval.is_zero() {
        let ping_shared = shared.clone();
        Some(tokio::spawn(async move { keepalive_loop(ping_shared).await }))
    } else {
        None
    };

    Ok(WebSocketConnection { shared, incoming: Arc::new(Mutex::new(rx)), pump, ping_timer })
}

impl WebSocketConnection {
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn close_status(&self) -> Option<CloseStatus> {
        self.shared.close_status.lock().unwrap().clone()
    }

    pub fn last_rtt(&self) -> Option<std::time::Duration> {
        *self.shared.last_rtt.lock().unwrap()
    }

    pub async fn send_text(&self, text: &str) -> Result<(), TurboError> {
        self.send_message(OpCode::Text, text.as_bytes()).await
    }

    pub async fn send_binary(&self, data: &[u8]) -> Result<(), TurboError> {
        self.send_message(OpCode::Binary, data).await
    }

    async fn send_message(&self, opcode: OpCode, payload: &[u8]) -> Result<(), TurboError> {
        match self.shared.state() {
            ConnectionState::Closed | ConnectionState::Closing => return Err(TurboError::WebSocket(WebSocketErrorKind::ConnectionClosed)),
            _ => {}
        }

        let (rsv1, owned);
        if self.shared.deflate.is_some() && payload.len() >= DEFLATE_THRESHOLD {
            owned = extensions::deflate(payload)?;
            rsv1 = true;
        } else {
            owned = payload.to_vec();
            rsv1 = false;
        }

        let mut writer = self.shared.writer.lock().await;
        frame::write_message_fragmented(&mut *writer, opcode, &owned, rsv1, self.shared.options.fragmentation_threshold).await
    }

    pub async fn receive(&self) -> Option<Message> {
        self.incoming.lock().await.recv().await
    }

    /// A lazy finite sequence terminating on close; holds an
    /// exclusive claim over the receive gate until dropped.
    pub fn receive_all(&self) -> Result<ReceiveAll, TurboError> {
        let guard = self
            .incoming
            .clone()
            .try_lock_owned()
            .map_err(|_| TurboError::InvalidArgument("a receive_all is already active on this connection".into()))?;
        Ok(ReceiveAll { guard })
    }

    pub async fn close(&self, code: u16, reason: &str) -> Result<(), TurboError> {
        if code == 1005 || code == 1006 {
            return Err(TurboError::WebSocket(WebSocketErrorKind::InvalidCloseCode));
        }
        if self.shared.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.shared.set_state(ConnectionState::Closing);

        let truncated = truncate_utf8(reason, MAX_CLOSE_REASON_BYTES);
        let mut payload = Vec::with_capacity(2 + truncated.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(truncated.as_bytes());
        {
            let mut writer = self.shared.writer.lock().await;
            frame::write_frame(&mut *writer, true, false, OpCode::Close, &payload).await?;
        }
        self.shared.set_close_status_once(code, truncated.to_string(), true);

        let _ = tokio::time::timeout(self.shared.options.close_handshake_timeout, self.shared.closed_notify.notified()).await;
        self.shared.set_state(ConnectionState::Closed);
        Ok(())
    }
}

pub struct ReceiveAll {
    guard: tokio::sync::OwnedMutexGuard<mpsc::Receiver<Message>>,
}

impl ReceiveAll {
    pub async fn next(&mut self) -> Option<Message> {
        self.guard.recv().await
    }
}

fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

async fn pump_loop(shared: Arc<Shared>, mut reader: ReadHalf<BoxedStream>, tx: mpsc::Sender<Message>) {
    let mut assembling: Option<(OpCode, Vec<u8>, bool)> = None;
    let limits = ReaderLimits {
        max_message_size: shared.options.max_message_size,
        allow_masked_server_frames: true,
        permitted_rsv1: shared.deflate.is_some(),
    };

    loop {
        let parsed = match frame::read_frame(&mut reader, &limits).await {
            Ok(f) => f,
            Err(_) => {
                shared.set_close_status_once(1006, String::new(), false);
                shared.set_state(ConnectionState::Closed);
                shared.closed_notify.notify_waiters();
                break;
            }
        };

        match parsed.opcode {
            OpCode::Ping => {
                let mut writer = shared.writer.lock().await;
                let _ = frame::write_frame(&mut *writer, true, false, OpCode::Pong, &parsed.payload).await;
            }
            OpCode::Pong => {
                if parsed.payload.len() == 4 {
                    let mut key = [0u8; 4];
                    key.copy_from_slice(&parsed.payload);
                    if let Some(pending) = shared.pending_pings.lock().unwrap().remove(&key) {
                        *shared.last_rtt.lock().unwrap() = Some(pending.sent_at.elapsed());
                    }
                }
            }
            OpCode::Close => {
                let already_closing = shared.state() == ConnectionState::Closing;
                let (code, reason) = parse_close_payload(&parsed.payload);
                shared.set_close_status_once(code, reason, false);
                if !already_closing {
                    shared.set_state(ConnectionState::Closing);
                    let mut writer = shared.writer.lock().await;
                    let _ = frame::write_frame(&mut *writer, true, false, OpCode::Close, &parsed.payload).await;
                }
                shared.set_state(ConnectionState::Closed);
                shared.closed_notify.notify_waiters();
                break;
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if let Err(_) = accumulate(&mut assembling, &shared, &parsed, &tx).await {
                    shared.set_close_status_once(1002, String::new(), false);
                    shared.set_state(ConnectionState::Closed);
                    shared.closed_notify.notify_waiters();
                    break;
                }
            }
        }
    }
}

async fn accumulate(assembling: &mut Option<(OpCode, Vec<u8>, bool)>, shared: &Arc<Shared>, parsed: &frame::Frame, tx: &mpsc::Sender<Message>) -> Result<(), TurboError> {
    match assembling.take() {
        None => {
            if parsed.opcode == OpCode::Continuation {
                return Err(TurboError::Protocol("continuation frame with no preceding start frame".into()));
            }
            if parsed.fin {
                deliver(shared, parsed.opcode, parsed.payload.clone(), parsed.rsv1, tx).await;
            } else {
                *assembling = Some((parsed.opcode, parsed.payload.clone(), parsed.rsv1));
            }
        }
        Some((opcode, mut buf, rsv1)) => {
            buf.extend_from_slice(&parsed.payload);
            if parsed.fin {
                deliver(shared, opcode, buf, rsv1, tx).await;
            } else {
                *assembling = Some((opcode, buf, rsv1));
            }
        }
    }
    Ok(())
}

async fn deliver(shared: &Arc<Shared>, opcode: OpCode, payload: Vec<u8>, rsv1: bool, tx: &mpsc::Sender<Message>) {
    let payload = if rsv1 {
        match extensions::inflate(&payload, shared.options.max_message_size) {
            Ok(p) => p,
            Err(_) => return,
        }
    } else {
        payload
    };
    let message = match opcode {
        OpCode::Text => match String::from_utf8(payload) {
            Ok(s) => Message::Text(s),
            Err(_) => return,
        },
        _ => Message::Binary(payload),
    };
    let _ = tx.send(message).await;
}

fn parse_close_payload(payload: &[u8]) -> (u16, String) {
    if payload.len() < 2 {
        return (1000, String::new());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    (code, reason)
}

async fn keepalive_loop(shared: Arc<Shared>) {
    let mut interval = tokio::time::interval(shared.options.ping_interval);
    loop {
        interval.tick().await;
        if shared.state() != ConnectionState::Open {
            break;
        }
        let mut payload = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut payload);
        shared.pending_pings.lock().unwrap().insert(payload, PendingPing { sent_at: Instant::now() });
        {
            let mut writer = shared.writer.lock().await;
            if frame::write_frame(&mut *writer, true, false, OpCode::Ping, &payload).await.is_err() {
                break;
            }
        }
        tokio::time::sleep(shared.options.pong_timeout).await;
        if shared.pending_pings.lock().unwrap().remove(&payload).is_some() {
            shared.set_close_status_once(1006, "pong timeout".to_string(), false);
            shared.set_state(ConnectionState::Closed);
            shared.closed_notify.notify_waiters();
            break;
        }
    }
}
