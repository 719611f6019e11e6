//! Per-origin connection pool: idle/in-use accounting, per-origin and
//! global caps enforced with semaphores, and idle-timeout eviction.

use crate::h2;
use crate::origin::Origin;
use httpcore::TurboError;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Any duplex byte stream a connection can be built on (plain TCP or
/// TLS-wrapped), type-erased so the pool does not need to be generic.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}
pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub per_origin_max: usize,
    pub global_max: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            per_origin_max: 6,
            global_max: 256,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

enum ConnKind {
    Http1(BoxedStream),
    Http2(h2::Connection),
}

struct IdleConn {
    kind: ConnKind,
    last_used: Instant,
    keep_alive: bool,
}

struct OriginState {
    idle: Vec<IdleConn>,
    semaphore: Arc<Semaphore>,
    shared_h2: Option<h2::Connection>,
}

pub struct ConnectionPool {
    config: PoolConfig,
    origins: Mutex<HashMap<Origin, OriginState>>,
    global_semaphore: Arc<Semaphore>,
}

/// What a released connection should become: returned to idle, or dropped.
pub enum Disposition {
    Reusable,
    Dead,
}

pub enum LeaseKind {
    Http1(BoxedStream),
    Http2(h2::Connection),
}

/// A scoped lease on one origin's slot. Dropping without calling
/// [`ConnectionPool::release`] counts the connection as dead; the permit is
/// always released back to the semaphore exactly once, on drop.
pub struct Lease {
    origin: Origin,
    kind: Option<LeaseKind>,
    released: bool,
    _global_permit: OwnedSemaphorePermit,
    _origin_permit: OwnedSemaphorePermit,
}

impl Lease {
    pub fn kind(&mut self) -> &mut LeaseKind {
        self.kind.as_mut().expect("lease kind taken exactly once")
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(ConnectionPool {
            global_semaphore: Arc::new(Semaphore::new(config.global_max)),
            config,
            origins: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire a lease for `origin`. If an idle, still-fresh, keep-alive
    /// connection exists it is reused; otherwise `connect` is invoked to
    /// establish a new one. Blocks if the per-origin limit is reached.
    pub async fn acquire<F, Fut>(
        self: &Arc<Self>,
        origin: Origin,
        connect: F,
    ) -> Result<Lease, TurboError>
    where
        F: FnOnce(Origin) -> Fut,
        Fut: std::future::Future<Output = Result<LeaseKind, TurboError>>,
    {
        let global_permit = self
            .global_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TurboError::Cancelled)?;

        let origin_semaphore = {
            let mut origins = self.origins.lock().await;
            origins
                .entry(origin.clone())
                .or_insert_with(|| OriginState {
                    idle: Vec::new(),
                    semaphore: Arc::new(Semaphore::new(self.config.per_origin_max)),
                    shared_h2: None,
                })
                .semaphore
                .clone()
        };
        let origin_permit = origin_semaphore
            .acquire_owned()
            .await
            .map_err(|_| TurboError::Cancelled)?;

        // A live shared H2 connection for this origin can serve any number
        // of concurrent streams; reuse it without consuming an idle slot.
        {
            let origins = self.origins.lock().await;
            if let Some(state) = origins.get(&origin) {
                if let Some(conn) = &state.shared_h2 {
                    return Ok(Lease {
                        origin,
                        kind: Some(LeaseKind::Http2(conn.clone())),
                        released: false,
                        _global_permit: global_permit,
                        _origin_permit: origin_permit,
                    });
                }
            }
        }

        let reused = {
            let mut origins = self.origins.lock().await;
            let state = origins.get_mut(&origin).expect("inserted above");
            pop_fresh_idle(state, self.config.idle_timeout)
        };

        let kind = match reused {
            Some(ConnKind::Http1(stream)) => LeaseKind::Http1(stream),
            Some(ConnKind::Http2(conn)) => LeaseKind::Http2(conn),
            None => connect(origin.clone()).await?,
        };

        if let LeaseKind::Http2(conn) = &kind {
            let mut origins = self.origins.lock().await;
            if let Some(state) = origins.get_mut(&origin) {
                state.shared_h2 = Some(conn.clone());
            }
        }

        Ok(Lease {
            origin,
            kind: Some(kind),
            released: false,
            _global_permit: global_permit,
            _origin_permit: origin_permit,
        })
    }

    /// Return a lease's connection to the idle pool, or drop it if dead or
    /// the peer signaled no keep-alive.
    pub async fn release(&self, mut lease: Lease, disposition: Disposition) {
        lease.released = true;
        let kind = lease.kind.take();
        match (kind, disposition) {
            (Some(LeaseKind::Http1(stream)), Disposition::Reusable) => {
                let mut origins = self.origins.lock().await;
                if let Some(state) = origins.get_mut(&lease.origin) {
                    state.idle.push(IdleConn {
                        kind: ConnKind::Http1(stream),
                        last_used: Instant::now(),
                        keep_alive: true,
                    });
                }
            }
            (Some(LeaseKind::Http2(_)), _) => {
                // The shared H2 connection stays registered until the
                // connection itself reports a fatal error or GOAWAY; a
                // single stream's release never tears it down.
            }
            _ => {
                debug!(origin = ?lease.origin.host, "dropping dead connection on release");
            }
        }
    }

    /// Wait (up to `deadline`) for outstanding leases to drain, then drop
    /// all remaining idle connections.
    pub async fn shutdown(&self, deadline: Duration) {
        let _ = tokio::time::timeout(deadline, async {
            let _ = self.global_semaphore.acquire_many(self.config.global_max as u32).await;
        })
        .await;
        self.origins.lock().await.clear();
    }
}

fn pop_fresh_idle(state: &mut OriginState, idle_timeout: Duration) -> Option<ConnKind> {
    while let Some(candidate) = state.idle.pop() {
        if candidate.keep_alive && candidate.last_used.elapsed() < idle_timeout {
            return Some(candidate.kind);
        }
        // Stale or non-keep-alive connection: drop it and keep looking.
    }
    None
}
