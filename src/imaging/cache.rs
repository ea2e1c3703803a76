//! In-memory cache of decoded image headers.
//!
//! Entries are keyed by a [`fingerprint`] of the first [`FINGERPRINT_PREFIX_LEN`]
//! bytes of the upload. The fingerprint is not a content hash: two images that
//! share the same leading bytes map to the same key. That is an accepted
//! approximation for an advisory cache and must not be used for deduplication.
//!
//! Expiry is lazy. Every lookup and insert purges entries older than the TTL;
//! there is no background timer.

use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::debug;

use super::ImageMetadata;

/// Number of leading bytes that feed the fingerprint.
pub const FINGERPRINT_PREFIX_LEN: usize = 1024;

/// Default time-to-live for cached metadata.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Rolling 32-bit hash (`h = h * 31 + byte`, wrapping) over the buffer
/// prefix, rendered as unsigned lowercase hex. Keys never leave the process,
/// so no other rendering has to be matched.
pub fn fingerprint(data: &[u8]) -> String {
    let hash = data
        .iter()
        .take(FINGERPRINT_PREFIX_LEN)
        .fold(0u32, |hash, &byte| {
            (hash << 5).wrapping_sub(hash).wrapping_add(u32::from(byte))
        });
    format!("{:x}", hash)
}

#[derive(Debug, Clone)]
struct CachedMetadata {
    metadata: ImageMetadata,
    stored_at: Instant,
}

/// Hit/miss counters, mostly useful to check that decode work is skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// TTL-bounded metadata cache shared by every upload in the process.
///
/// Concurrent writers on the same fingerprint race benignly: the last `put`
/// wins and readers may observe either value while it is fresh.
#[derive(Debug)]
pub struct MetadataCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedMetadata>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up a fresh entry. Expired entries are purged first.
    pub fn get(&self, key: &str) -> Option<ImageMetadata> {
        let mut entries = self.lock();
        Self::purge(&mut entries, self.ttl);

        match entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.metadata.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or overwrite the entry for `key`, stamping it with the current time.
    pub fn put(&self, key: impl Into<String>, metadata: ImageMetadata) {
        let mut entries = self.lock();
        Self::purge(&mut entries, self.ttl);
        entries.insert(
            key.into(),
            CachedMetadata {
                metadata,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let mut entries = self.lock();
        Self::purge(&mut entries, self.ttl)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }

    fn purge(entries: &mut HashMap<String, CachedMetadata>, ttl: Duration) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "evicted expired metadata cache entries");
        }
        removed
    }

    // A panic while holding the lock cannot leave the map half-written, so a
    // poisoned guard is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedMetadata>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
