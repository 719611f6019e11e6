//! In-memory LRU cache storage. Serialized through a single mutex;
//! never held across I/O.

use crate::entry::CacheEntry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
pub struct StorageConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig { max_entries: 10_000, max_bytes: 64 * 1024 * 1024 }
    }
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Most-recently-used key at the front.
    order: VecDeque<String>,
    total_bytes: usize,
}

#[derive(Clone)]
pub struct CacheStorage {
    inner: Arc<Mutex<Inner>>,
    config: StorageConfig,
}

impl CacheStorage {
    pub fn new(config: StorageConfig) -> Self {
        CacheStorage {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                total_bytes: 0,
            })),
            config,
        }
    }

    /// Touch-and-return. An entry with no validator that has fallen stale
    /// can never be revalidated, so it is reaped here rather than left for
    /// a caller to notice; entries with a validator are always returned and
    /// left for the cache middleware to judge fresh/stale/revalidate.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let mut inner = self.inner.lock().unwrap();
        let unrevalidatable_and_stale = inner
            .entries
            .get(key)
            .is_some_and(|e| !e.is_fresh() && !e.has_validator());
        if unrevalidatable_and_stale {
            remove_locked(&mut inner, key);
            return None;
        }
        if inner.entries.contains_key(key) {
            touch_locked(&mut inner, key);
            return inner.entries.get(key).cloned();
        }
        None
    }

    pub fn set(&self, key: String, entry: CacheEntry) {
        let mut inner = self.inner.lock().unwrap();
        sweep_expired_locked(&mut inner);

        let size = entry.estimated_bytes();
        if size > self.config.max_bytes {
            // A single entry larger than the whole budget is silently dropped.
            remove_locked(&mut inner, &key);
            return;
        }

        remove_locked(&mut inner, &key);
        inner.total_bytes += size;
        inner.entries.insert(key.clone(), entry);
        inner.order.push_front(key);

        evict_to_fit(&mut inner, self.config.max_entries, self.config.max_bytes);
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        remove_locked(&mut inner, key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.order.clear();
        inner.total_bytes = 0;
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().total_bytes
    }
}

fn touch_locked(inner: &mut Inner, key: &str) {
    if let Some(pos) = inner.order.iter().position(|k| k == key) {
        let k = inner.order.remove(pos).unwrap();
        inner.order.push_front(k);
    }
}

fn remove_locked(inner: &mut Inner, key: &str) {
    if let Some(entry) = inner.entries.remove(key) {
        inner.total_bytes = inner.total_bytes.saturating_sub(entry.estimated_bytes());
    }
    if let Some(pos) = inner.order.iter().position(|k| k == key) {
        inner.order.remove(pos);
    }
}

fn sweep_expired_locked(inner: &mut Inner) {
    let dead: Vec<String> = inner
        .entries
        .iter()
        .filter(|(_, e)| !e.is_fresh() && !e.has_validator())
        .map(|(k, _)| k.clone())
        .collect();
    for key in dead {
        remove_locked(inner, &key);
    }
}

fn evict_to_fit(inner: &mut Inner, max_entries: usize, max_bytes: usize) {
    while inner.entries.len() > max_entries || inner.total_bytes > max_bytes {
        match inner.order.pop_back() {
            Some(key) => {
                if let Some(entry) = inner.entries.remove(&key) {
                    inner.total_bytes = inner.total_bytes.saturating_sub(entry.estimated_bytes());
                }
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpcore::HeaderMap;
    use std::time::Duration;

    fn fresh_entry(body: Vec<u8>) -> CacheEntry {
        CacheEntry::new(200, HeaderMap::new(), body, Duration::ZERO, Some(Duration::from_secs(300)), false)
    }

    #[test]
    fn get_touches_entry_to_front_and_set_evicts_lru_tail() {
        let storage = CacheStorage::new(StorageConfig { max_entries: 2, max_bytes: 1024 * 1024 });
        storage.set("a".into(), fresh_entry(vec![1]));
        storage.set("b".into(), fresh_entry(vec![2]));
        assert!(storage.get("a").is_some()); // "a" is now most recently used
        storage.set("c".into(), fresh_entry(vec![3])); // evicts "b", the LRU tail
        assert!(storage.get("b").is_none());
        assert!(storage.get("a").is_some());
        assert!(storage.get("c").is_some());
    }

    #[test]
    fn entry_larger_than_budget_is_not_stored() {
        let storage = CacheStorage::new(StorageConfig { max_entries: 10, max_bytes: 10 });
        storage.set("a".into(), fresh_entry(vec![0u8; 100]));
        assert_eq!(storage.count(), 0);
    }

    #[test]
    fn clear_resets_counters() {
        let storage = CacheStorage::new(StorageConfig::default());
        storage.set("a".into(), fresh_entry(vec![1, 2, 3]));
        storage.clear();
        assert_eq!(storage.count(), 0);
        assert_eq!(storage.size(), 0);
    }

    #[test]
    fn stale_entry_without_validator_is_reaped_on_get() {
        let storage = CacheStorage::new(StorageConfig::default());
        let stale = CacheEntry::new(200, HeaderMap::new(), vec![1], Duration::ZERO, Some(Duration::ZERO), false);
        storage.set("a".into(), stale);
        assert!(storage.get("a").is_none());
        assert_eq!(storage.count(), 0);
    }
}
