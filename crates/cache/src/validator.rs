//! Per-lookup validity checks

use crate::headers::ResponseHeaders;
use recache_purge::PurgeContext;
use std::sync::Arc;

/// Decides whether a stored response may still be served
pub trait CacheValidator {
    /// Whether the entry stored under `key` has not been invalidated
    fn is_cache_valid(&self, key: &str, headers: &ResponseHeaders) -> bool;

    /// Whether the entry is fresh enough for this caller
    fn is_fresh(&self, _headers: &ResponseHeaders) -> bool {
        true
    }
}

/// Accepts every entry
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysValid;

impl CacheValidator for AlwaysValid {
    fn is_cache_valid(&self, _key: &str, _headers: &ResponseHeaders) -> bool {
        true
    }
}

/// Rejects entries purged after they were fetched
///
/// The cache key is looked up as the purged URL, against the response date.
#[derive(Debug, Clone)]
pub struct PurgeValidator {
    purge: Arc<PurgeContext>,
    min_remaining_ttl_ms: i64,
    now_ms: i64,
}

impl PurgeValidator {
    /// Validate against `purge`
    #[must_use]
    pub fn new(purge: Arc<PurgeContext>) -> Self {
        Self {
            purge,
            min_remaining_ttl_ms: 0,
            now_ms: 0,
        }
    }

    /// Also treat entries expiring within `min_remaining_ttl_ms` of `now_ms`
    /// as stale
    #[must_use]
    pub fn with_min_remaining_ttl(mut self, now_ms: i64, min_remaining_ttl_ms: i64) -> Self {
        self.now_ms = now_ms;
        self.min_remaining_ttl_ms = min_remaining_ttl_ms;
        self
    }
}

impl CacheValidator for PurgeValidator {
    fn is_cache_valid(&self, key: &str, headers: &ResponseHeaders) -> bool {
        self.purge.is_valid(key, headers.date_ms())
    }

    fn is_fresh(&self, headers: &ResponseHeaders) -> bool {
        self.min_remaining_ttl_ms <= 0
            || headers.expiration_ms() - self.now_ms > self.min_remaining_ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recache_core::{MemFileSystem, MemLockManager, MockTimer, Statistics};

    const NOW: i64 = 1_700_000_000_000;

    fn headers_dated(date_ms: i64) -> ResponseHeaders {
        let mut headers = ResponseHeaders::new(200);
        headers.force_caching(date_ms, 60_000);
        headers
    }

    #[test]
    fn test_purge_validator_uses_response_date() {
        let timer = Arc::new(MockTimer::new(NOW));
        let purge = Arc::new(PurgeContext::new(
            "/cache.purge",
            Arc::new(MemFileSystem::new(timer.clone())),
            &MemLockManager::new(timer.clone()),
            timer,
            &Statistics::new(),
        ));
        purge.add_purge_url("http://a/", NOW - 10, |ok| assert!(ok));

        let validator = PurgeValidator::new(purge);
        assert!(!validator.is_cache_valid("http://a/", &headers_dated(NOW - 20)));
        assert!(validator.is_cache_valid("http://a/", &headers_dated(NOW - 5)));
        assert!(validator.is_cache_valid("http://b/", &headers_dated(NOW - 20)));
        assert!(validator.is_fresh(&headers_dated(NOW - 20)));
    }

    #[test]
    fn test_min_remaining_ttl() {
        let timer = Arc::new(MockTimer::new(NOW));
        let purge = Arc::new(PurgeContext::new(
            "/cache.purge",
            Arc::new(MemFileSystem::new(timer.clone())),
            &MemLockManager::new(timer.clone()),
            timer,
            &Statistics::new(),
        ));
        let validator = PurgeValidator::new(purge).with_min_remaining_ttl(NOW, 30_000);
        // Expires 20 s from now
        assert!(!validator.is_fresh(&headers_dated(NOW - 40_000)));
        // Expires 50 s from now
        assert!(validator.is_fresh(&headers_dated(NOW - 10_000)));
        assert!(AlwaysValid.is_fresh(&headers_dated(0)));
    }
}
