//! Scoped lease of byte buffers with guaranteed return.
//!
//! `PooledBuffer` owns exactly one release right: dropping it (on any exit
//! path — success, error, or cancellation) returns the backing `BytesMut` to
//! the pool. There is no separate "dispose" call to forget.

use bytes::BytesMut;
use std::sync::Mutex;

/// A bounded pool of reusable byte buffers.
///
/// A single `Mutex` guards the free list, matching the workspace's lock
/// discipline ("no operation holds more than one [mutex] at a time").
/// The mutex is only ever held across the in-memory `Vec` operations below,
/// never across I/O.
pub struct BufferPool {
    inner: Mutex<Vec<BytesMut>>,
    default_capacity: usize,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(default_capacity: usize, max_pooled: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::with_capacity(max_pooled.min(32))),
            default_capacity,
            max_pooled,
        }
    }

    /// Lease a buffer, reusing a pooled one if available.
    pub fn lease(self: &std::sync::Arc<Self>) -> PooledBuffer {
        let buf = {
            let mut guard = self.inner.lock().expect("buffer pool mutex poisoned");
            guard.pop()
        }
        .unwrap_or_else(|| BytesMut::with_capacity(self.default_capacity));
        PooledBuffer {
            pool: std::sync::Arc::clone(self),
            buf: Some(buf),
        }
    }

    fn give_back(&self, mut buf: BytesMut) {
        let mut guard = self.inner.lock().expect("buffer pool mutex poisoned");
        if guard.len() < self.max_pooled {
            buf.clear();
            guard.push(buf);
        }
        // else: drop it, the pool is at capacity.
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(8 * 1024, 256)
    }
}

/// A byte buffer leased from a [`BufferPool`].
///
/// `Deref`/`DerefMut` to `BytesMut` for in-place writes; on drop, the buffer
/// is returned to the pool it came from. Response bodies wrap this
/// type so releasing a `Response` always frees its pooled storage.
pub struct PooledBuffer {
    pool: std::sync::Arc<BufferPool>,
    buf: Option<BytesMut>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn leased_buffer_is_returned_to_pool_on_drop() {
        let pool = Arc::new(BufferPool::new(64, 4));
        {
            let mut buf = pool.lease();
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.inner.lock().unwrap().len(), 1);
    }

    #[test]
    fn returned_buffer_is_cleared_before_reuse() {
        let pool = Arc::new(BufferPool::new(64, 4));
        {
            let mut buf = pool.lease();
            buf.extend_from_slice(b"stale data");
        }
        let buf = pool.lease();
        assert!(buf.is_empty());
    }

    #[test]
    fn pool_drops_buffers_beyond_max_pooled() {
        let pool = Arc::new(BufferPool::new(64, 1));
        let a = pool.lease();
        let b = pool.lease();
        drop(a);
        drop(b);
        assert_eq!(pool.inner.lock().unwrap().len(), 1);
    }
}
