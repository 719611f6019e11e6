//! In-memory recording store backing `Record`/`Replay` modes: the loaded
//! envelope, lookup indices by strict and relaxed key, and one-shot
//! consumption of replayed entries.

use crate::envelope::{now_ticks, Entry, Envelope, EnvelopeError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use tokio::fs;

pub struct StoredEntry {
    pub entry: Entry,
    consumed: AtomicBool,
}

impl StoredEntry {
    fn new(entry: Entry) -> Self {
        StoredEntry { entry, consumed: AtomicBool::new(false) }
    }

    /// Atomically claim this entry for replay; returns `false` if another
    /// caller already consumed it.
    fn try_consume(&self) -> bool {
        self.consumed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }
}

struct Inner {
    entries: Vec<std::sync::Arc<StoredEntry>>,
    by_key: HashMap<String, Vec<std::sync::Arc<StoredEntry>>>,
    by_relaxed_key: HashMap<String, Vec<std::sync::Arc<StoredEntry>>>,
    created_utc_ticks: i64,
}

pub struct RecordingStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
    next_sequence: AtomicI64,
}

impl RecordingStore {
    pub fn empty() -> Self {
        RecordingStore {
            path: None,
            inner: Mutex::new(Inner { entries: Vec::new(), by_key: HashMap::new(), by_relaxed_key: HashMap::new(), created_utc_ticks: now_ticks() }),
            next_sequence: AtomicI64::new(1),
        }
    }

    /// Load a recording from disk, or start empty if `path` does not exist
    /// yet (the common case when starting a fresh `Record` session).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EnvelopeError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut store = Self::empty();
            store.path = Some(path);
            return Ok(store);
        }
        let bytes = fs::read(&path).await?;
        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        envelope.check_version()?;

        let next_sequence = envelope.entries.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;
        let mut inner = Inner { entries: Vec::new(), by_key: HashMap::new(), by_relaxed_key: HashMap::new(), created_utc_ticks: envelope.created_utc_ticks };
        for entry in envelope.entries {
            index_entry(&mut inner, entry);
        }
        Ok(RecordingStore { path: Some(path), inner: Mutex::new(inner), next_sequence: AtomicI64::new(next_sequence) })
    }

    /// Strict-key dequeue; each matching entry is eligible exactly once.
    pub fn take_strict(&self, key: &str) -> Option<std::sync::Arc<StoredEntry>> {
        let inner = self.inner.lock().unwrap();
        inner.by_key.get(key).and_then(|candidates| candidates.iter().find(|c| c.try_consume()).cloned())
    }

    /// Relaxed-key dequeue, used as the `Relaxed` mismatch-policy fallback.
    pub fn take_relaxed(&self, relaxed_key: &str) -> Option<std::sync::Arc<StoredEntry>> {
        let inner = self.inner.lock().unwrap();
        inner.by_relaxed_key.get(relaxed_key).and_then(|candidates| candidates.iter().find(|c| c.try_consume()).cloned())
    }

    pub fn append(&self, entry: Entry) {
        let mut inner = self.inner.lock().unwrap();
        index_entry(&mut inner, entry);
    }

    pub fn next_sequence(&self) -> i64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialize the current entry set back to the backing path, if any.
    pub async fn flush(&self) -> Result<(), EnvelopeError> {
        let Some(path) = &self.path else { return Ok(()) };
        let envelope = {
            let inner = self.inner.lock().unwrap();
            Envelope {
                version: 1,
                created_utc_ticks: inner.created_utc_ticks,
                updated_utc_ticks: now_ticks(),
                entries: inner.entries.iter().map(|e| e.entry.clone()).collect(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(path, bytes).await?;
        Ok(())
    }
}

fn index_entry(inner: &mut Inner, entry: Entry) {
    let relaxed_key = crate::fingerprint::relaxed_key(&entry.method.parse().unwrap_or(httpcore::Method::Get), &entry.url);
    let stored = std::sync::Arc::new(StoredEntry::new(entry));
    inner.by_key.entry(stored.entry.request_key.clone()).or_default().push(stored.clone());
    inner.by_relaxed_key.entry(relaxed_key).or_default().push(stored.clone());
    inner.entries.push(stored);
}
