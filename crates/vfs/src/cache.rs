//! Optional sector cache for schema v2.
//!
//! Entries are keyed by content-addressed sector id, so a hit can never be
//! stale and no invalidation protocol is needed.

use bytes::Bytes;

/// Content-addressed sector cache.
pub trait SectorCache: Send + Sync {
    fn put(&self, id: &str, data: Bytes);
    fn get(&self, id: &str) -> Option<Bytes>;
}

/// Cache that stores nothing.
pub struct NopCache;

impl SectorCache for NopCache {
    fn put(&self, _id: &str, _data: Bytes) {}

    fn get(&self, _id: &str) -> Option<Bytes> {
        None
    }
}
