//! Two-tier cache: a small fast tier in front of a large shared one

use crate::headers::{RequestHeaders, ResponseHeaders};
use crate::http_cache::{FindOutcome, FindResult, HttpCache};
use crate::validator::CacheValidator;
use crate::value::Remembered;
use tracing::{debug, trace, warn};

/// Writes go to both tiers; reads try tier 1, then tier 2, and copy tier-2
/// hits into tier 1
#[derive(Debug)]
pub struct WriteThroughHttpCache {
    cache1: HttpCache,
    cache2: HttpCache,
    cache1_limit: usize,
}

impl WriteThroughHttpCache {
    /// Compose `cache1` (local) and `cache2` (shared)
    ///
    /// Values whose encoding exceeds `cache1_limit` bytes skip tier 1.
    #[must_use]
    pub const fn new(cache1: HttpCache, cache2: HttpCache, cache1_limit: usize) -> Self {
        Self {
            cache1,
            cache2,
            cache1_limit,
        }
    }

    /// The local tier
    #[must_use]
    pub const fn cache1(&self) -> &HttpCache {
        &self.cache1
    }

    /// The shared tier
    #[must_use]
    pub const fn cache2(&self) -> &HttpCache {
        &self.cache2
    }

    /// Largest encoded value written to tier 1
    #[must_use]
    pub const fn cache1_limit(&self) -> usize {
        self.cache1_limit
    }

    fn put_cache1(&self, key: &str, bytes: Vec<u8>) {
        if bytes.len() > self.cache1_limit {
            trace!(key, size = bytes.len(), limit = self.cache1_limit, "Skipping local tier");
            return;
        }
        self.cache1.put_encoded(key, bytes);
    }

    /// Look up `key`, tier 1 first
    ///
    /// When neither tier has a usable entry, the fallback is tier 2's stale
    /// value if it has one, else tier 1's.
    pub fn find(
        &self,
        key: &str,
        request: &RequestHeaders,
        validator: &dyn CacheValidator,
    ) -> FindOutcome {
        let first = self.cache1.find(key, request, validator);
        if first.result != FindResult::NotFound {
            return first;
        }

        let mut second = self.cache2.find(key, request, validator);
        match second.result {
            FindResult::Found => {
                if let Some(value) = &second.value {
                    match value.encode() {
                        Ok(bytes) => {
                            debug!(key, "Backfilling local tier");
                            self.put_cache1(key, bytes);
                        }
                        Err(e) => warn!(key, error = %e, "Failed to re-encode for local tier"),
                    }
                }
                second
            }
            FindResult::NotFound => {
                if second.fallback.is_none() {
                    second.fallback = first.fallback;
                }
                second
            }
            FindResult::RecentFetchFailed | FindResult::RecentFetchNotCacheable => second,
        }
    }

    /// Store a response in both tiers
    ///
    /// Returns whether it was cacheable.
    pub fn put(
        &self,
        key: &str,
        request: &RequestHeaders,
        headers: &ResponseHeaders,
        body: &[u8],
    ) -> bool {
        let Some(bytes) = self.cache2.encode_for_put(request, headers, body) else {
            return false;
        };
        self.put_cache1(key, bytes.clone());
        self.cache2.put_encoded(key, bytes);
        true
    }

    fn remember(&self, key: &str, kind: Remembered, ttl_ms: impl Fn(&HttpCache) -> i64) {
        if let Some(bytes) = self.cache1.encode_remembered(kind, ttl_ms(&self.cache1)) {
            self.put_cache1(key, bytes);
        }
        if let Some(bytes) = self.cache2.encode_remembered(kind, ttl_ms(&self.cache2)) {
            self.cache2.put_encoded(key, bytes);
        }
    }

    /// Remember a failed fetch in both tiers
    pub fn remember_fetch_failed(&self, key: &str) {
        self.remember(key, Remembered::FetchFailed, |c| {
            c.config().remember_fetch_failed_ttl_ms
        });
    }

    /// Remember a dropped fetch in both tiers
    pub fn remember_fetch_dropped(&self, key: &str) {
        self.remember(key, Remembered::FetchFailed, |c| {
            c.config().remember_fetch_dropped_ttl_ms
        });
    }

    /// Remember an uncacheable response in both tiers
    pub fn remember_not_cacheable(&self, key: &str) {
        self.remember(key, Remembered::NotCacheable, |c| {
            c.config().remember_not_cacheable_ttl_ms
        });
    }

    /// Remove `key` from both tiers
    pub fn delete(&self, key: &str) {
        self.cache1.delete(key);
        self.cache2.delete(key);
    }
}
