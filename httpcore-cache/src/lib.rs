//! RFC 9111 private HTTP cache: keying, freshness, variant indexing, LRU
//! storage, and the cache middleware that wires them into the transport
//! pipeline.

pub mod entry;
pub mod freshness;
pub mod key;
pub mod middleware;
pub mod storage;
pub mod variant_index;

pub use entry::CacheEntry;
pub use freshness::CacheControl;
pub use middleware::{CacheConfig, CacheMiddleware};
pub use storage::{CacheStorage, StorageConfig};
pub use variant_index::VariantIndex;
