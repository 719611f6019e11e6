//! Variant index: per base key, the set of known `Vary` signatures,
//! a storage-key → signature map, and per-signature reference counts.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct BaseKeyEntry {
    signatures: HashSet<String>,
    storage_key_signature: HashMap<String, String>,
    ref_counts: HashMap<String, usize>,
}

#[derive(Default)]
pub struct VariantIndex {
    by_base_key: Mutex<HashMap<String, BaseKeyEntry>>,
}

impl VariantIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `storage_key` was stored under `signature` for
    /// `base_key`. If the storage key already had a different signature,
    /// its ref count is released first.
    pub fn record(&self, base_key: &str, storage_key: &str, signature: &str) {
        let mut by_base_key = self.by_base_key.lock().unwrap();
        let entry = by_base_key.entry(base_key.to_string()).or_default();

        if let Some(old_signature) = entry.storage_key_signature.get(storage_key).cloned() {
            release_signature(entry, &old_signature);
        }

        entry.signatures.insert(signature.to_string());
        *entry.ref_counts.entry(signature.to_string()).or_insert(0) += 1;
        entry.storage_key_signature.insert(storage_key.to_string(), signature.to_string());
    }

    /// All signatures known for `base_key`, for variant enumeration on
    /// lookup. Empty if the base key has never been stored.
    pub fn signatures(&self, base_key: &str) -> Vec<String> {
        let by_base_key = self.by_base_key.lock().unwrap();
        by_base_key
            .get(base_key)
            .map(|e| e.signatures.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Decrement `storage_key`'s signature ref count; purge the bucket if
    /// it becomes empty.
    pub fn remove(&self, base_key: &str, storage_key: &str) {
        let mut by_base_key = self.by_base_key.lock().unwrap();
        let Some(entry) = by_base_key.get_mut(base_key) else { return };
        if let Some(signature) = entry.storage_key_signature.remove(storage_key) {
            release_signature(entry, &signature);
        }
        if entry.signatures.is_empty() {
            by_base_key.remove(base_key);
        }
    }

    /// Remove the whole base-key bucket (unsafe-method invalidation),
    /// returning every storage key that was tracked under it so the caller
    /// can evict them from storage too.
    pub fn remove_all(&self, base_key: &str) -> Vec<String> {
        let mut by_base_key = self.by_base_key.lock().unwrap();
        by_base_key
            .remove(base_key)
            .map(|e| e.storage_key_signature.into_keys().collect())
            .unwrap_or_default()
    }
}

fn release_signature(entry: &mut BaseKeyEntry, signature: &str) {
    if let Some(count) = entry.ref_counts.get_mut(signature) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            entry.ref_counts.remove(signature);
            entry.signatures.remove(signature);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_enumerate_signatures() {
        let index = VariantIndex::new();
        index.record("GET https://h/x", "GET https://h/x|accept=9:text/html;", "accept");
        assert_eq!(index.signatures("GET https://h/x"), vec!["accept".to_string()]);
    }

    #[test]
    fn remove_purges_bucket_when_last_signature_drops_to_zero() {
        let index = VariantIndex::new();
        index.record("GET https://h/x", "k1", "accept");
        index.remove("GET https://h/x", "k1");
        assert!(index.signatures("GET https://h/x").is_empty());
    }

    #[test]
    fn remove_all_returns_every_tracked_storage_key() {
        let index = VariantIndex::new();
        index.record("GET https://h/x", "k1", "accept");
        index.record("GET https://h/x", "k2", "accept-encoding");
        let mut removed = index.remove_all("GET https://h/x");
        removed.sort();
        assert_eq!(removed, vec!["k1".to_string(), "k2".to_string()]);
        assert!(index.signatures("GET https://h/x").is_empty());
    }

    #[test]
    fn re_storing_under_a_new_signature_releases_the_old_one() {
        let index = VariantIndex::new();
        index.record("GET https://h/x", "k1", "accept");
        index.record("GET https://h/x", "k1", "accept-encoding");
        assert_eq!(index.signatures("GET https://h/x"), vec!["accept-encoding".to_string()]);
    }
}
