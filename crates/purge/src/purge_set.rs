//! Bounded set of URL purges
//!
//! A [`PurgeSet`] maps URLs to the time they were invalidated, plus one
//! global invalidation timestamp covering everything. The set is bounded by
//! the byte size of its entries. When an entry is evicted its timestamp is
//! folded into the global timestamp, so eviction can only make the set more
//! conservative, never resurrect a purged resource.

use crate::{Error, Result};
use lru::LruCache;
use recache_core::timer::MINUTE_MS;

/// How far ahead of the local clock a purge timestamp may be
pub const CLOCK_SKEW_ALLOWANCE_MS: i64 = 10 * MINUTE_MS;

/// Default byte budget
pub const DEFAULT_MAX_BYTES: usize = 1024 * 1024;

/// Bookkeeping cost of one entry beyond its URL
const ENTRY_OVERHEAD: usize = std::mem::size_of::<i64>();

fn entry_size(url: &str) -> usize {
    url.len() + ENTRY_OVERHEAD
}

/// Check that `timestamp_ms` is usable as a purge time relative to `now_ms`
pub fn check_timestamp(timestamp_ms: i64, now_ms: i64) -> Result<()> {
    if timestamp_ms < 0 || timestamp_ms > now_ms.saturating_add(CLOCK_SKEW_ALLOWANCE_MS) {
        return Err(Error::timestamp(timestamp_ms, now_ms));
    }
    Ok(())
}

/// Reject URLs that would not read back as a single purge file record
pub fn check_url(url: &str) -> Result<()> {
    if url.is_empty() || url.contains(['\n', '\r']) {
        return Err(Error::url(url));
    }
    Ok(())
}

/// URL purges with a global invalidation timestamp
#[derive(Clone)]
pub struct PurgeSet {
    // Most recently added at the front
    entries: LruCache<String, i64>,
    global_invalidation_timestamp_ms: i64,
    byte_size: usize,
    max_size: usize,
}

impl std::fmt::Debug for PurgeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeSet")
            .field(
                "global_invalidation_timestamp_ms",
                &self.global_invalidation_timestamp_ms,
            )
            .field("entries", &self.entries.len())
            .field("byte_size", &self.byte_size)
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl Default for PurgeSet {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BYTES)
    }
}

impl PartialEq for PurgeSet {
    fn eq(&self, other: &Self) -> bool {
        self.global_invalidation_timestamp_ms == other.global_invalidation_timestamp_ms
            && self.iter().eq(other.iter())
    }
}

impl Eq for PurgeSet {}

impl PurgeSet {
    /// Create an empty set holding at most `max_size` bytes of entries
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            global_invalidation_timestamp_ms: 0,
            byte_size: 0,
            max_size,
        }
    }

    /// Record that `url` was invalidated at `timestamp_ms`, replacing any
    /// earlier record for it
    pub fn put(&mut self, url: &str, timestamp_ms: i64) {
        if self.entries.put(url.to_string(), timestamp_ms).is_none() {
            self.byte_size += entry_size(url);
        }
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.byte_size > self.max_size {
            let Some((url, timestamp_ms)) = self.entries.pop_lru() else {
                break;
            };
            self.byte_size -= entry_size(&url);
            self.update_global_invalidation_timestamp_ms(timestamp_ms);
        }
    }

    /// Whether a resource fetched from `url` at `timestamp_ms` is still valid
    #[must_use]
    pub fn is_valid(&self, url: &str, timestamp_ms: i64) -> bool {
        if timestamp_ms <= self.global_invalidation_timestamp_ms {
            return false;
        }
        self.entries
            .peek(url)
            .is_none_or(|&purged_ms| purged_ms < timestamp_ms)
    }

    /// Invalidate everything up to `timestamp_ms`; never moves backwards
    pub fn update_global_invalidation_timestamp_ms(&mut self, timestamp_ms: i64) {
        self.global_invalidation_timestamp_ms =
            self.global_invalidation_timestamp_ms.max(timestamp_ms);
    }

    /// Fold `other` into this set, keeping the newer timestamp per URL
    pub fn merge(&mut self, other: &Self) {
        self.update_global_invalidation_timestamp_ms(other.global_invalidation_timestamp_ms);
        for (url, timestamp_ms) in other.iter() {
            let newer = self
                .entries
                .peek(url)
                .is_none_or(|&existing| existing < timestamp_ms);
            if newer {
                self.put(url, timestamp_ms);
            }
        }
    }

    /// Exchange contents with `other`
    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(self, other);
    }

    /// Drop every record and reset the global timestamp
    pub fn clear(&mut self) {
        self.entries.clear();
        self.byte_size = 0;
        self.global_invalidation_timestamp_ms = 0;
    }

    /// Records from least to most recently added
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> + '_ {
        self.entries.iter().rev().map(|(url, &ts)| (url.as_str(), ts))
    }

    /// Number of URL records
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no URL records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Everything at or before this time is invalid
    #[must_use]
    pub const fn global_invalidation_timestamp_ms(&self) -> i64 {
        self.global_invalidation_timestamp_ms
    }

    /// Current byte size of the records
    #[must_use]
    pub const fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Byte budget
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}
