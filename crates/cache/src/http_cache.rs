//! HTTP semantics over one cache tier
//!
//! [`HttpCache`] stores responses in a [`CacheInterface`], refuses responses
//! a shared cache may not keep, and on lookup separates fresh hits from
//! stale entries that can still serve as a fallback when a refetch fails.
//! Failed and uncacheable fetches can be remembered for a short while so
//! they are not retried on every request.

use crate::headers::{RequestHeaders, ResponseHeaders};
use crate::interface::CacheInterface;
use crate::validator::CacheValidator;
use crate::value::{HttpValue, Remembered};
use recache_core::{HttpCacheConfig, Statistics, Timer, Variable};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Outcome of a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    /// A valid, fresh entry
    Found,
    /// Nothing usable; a stale fallback may be attached
    NotFound,
    /// A recent fetch failed; do not refetch yet
    RecentFetchFailed,
    /// A recent fetch was not cacheable; do not refetch yet
    RecentFetchNotCacheable,
}

/// Result of [`HttpCache::find`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindOutcome {
    /// What the lookup found
    pub result: FindResult,
    /// The entry, when `result` is [`FindResult::Found`]
    pub value: Option<HttpValue>,
    /// A stale entry usable when a refetch fails
    pub fallback: Option<HttpValue>,
}

impl FindOutcome {
    fn found(value: HttpValue) -> Self {
        Self {
            result: FindResult::Found,
            value: Some(value),
            fallback: None,
        }
    }

    fn not_found(fallback: Option<HttpValue>) -> Self {
        Self {
            result: FindResult::NotFound,
            value: None,
            fallback,
        }
    }

    fn recent(result: FindResult) -> Self {
        Self {
            result,
            value: None,
            fallback: None,
        }
    }

    /// Whether the lookup produced a servable entry
    #[must_use]
    pub fn is_found(&self) -> bool {
        self.result == FindResult::Found
    }
}

/// Counter names registered per tier, prefixed with the tier name
pub mod stat_names {
    /// Fresh, valid entries served
    pub const HITS: &str = "hits";
    /// Lookups that served nothing
    pub const MISSES: &str = "misses";
    /// Entries past their TTL or not fresh enough
    pub const EXPIRATIONS: &str = "expirations";
    /// Stale entries offered as fallback
    pub const FALLBACKS: &str = "fallbacks";
    /// Values written
    pub const INSERTS: &str = "inserts";
    /// Responses refused for storage
    pub const NOT_CACHEABLE: &str = "not_cacheable";
    /// Store errors
    pub const BACKEND_ERRORS: &str = "backend_errors";
}

#[derive(Debug)]
struct CacheStats {
    hits: Arc<Variable>,
    misses: Arc<Variable>,
    expirations: Arc<Variable>,
    fallbacks: Arc<Variable>,
    inserts: Arc<Variable>,
    not_cacheable: Arc<Variable>,
    backend_errors: Arc<Variable>,
}

impl CacheStats {
    fn register(stats: &Statistics, prefix: &str) -> Self {
        let var = |name: &str| stats.add_variable(&format!("{prefix}_{name}"));
        Self {
            hits: var(stat_names::HITS),
            misses: var(stat_names::MISSES),
            expirations: var(stat_names::EXPIRATIONS),
            fallbacks: var(stat_names::FALLBACKS),
            inserts: var(stat_names::INSERTS),
            not_cacheable: var(stat_names::NOT_CACHEABLE),
            backend_errors: var(stat_names::BACKEND_ERRORS),
        }
    }
}

/// One cache tier with HTTP freshness and validity rules
#[derive(Debug)]
pub struct HttpCache {
    cache: Arc<dyn CacheInterface>,
    timer: Arc<dyn Timer>,
    config: HttpCacheConfig,
    stats: CacheStats,
}

impl HttpCache {
    /// Tier over `cache` with default settings, counters prefixed by the
    /// store's name
    pub fn new(cache: Arc<dyn CacheInterface>, timer: Arc<dyn Timer>, stats: &Statistics) -> Self {
        let prefix = cache.name().to_string();
        Self::with_options(cache, timer, &HttpCacheConfig::default(), stats, &prefix)
    }

    /// Tier over `cache` with explicit settings and counter prefix
    pub fn with_options(
        cache: Arc<dyn CacheInterface>,
        timer: Arc<dyn Timer>,
        config: &HttpCacheConfig,
        stats: &Statistics,
        prefix: &str,
    ) -> Self {
        Self {
            cache,
            timer,
            config: config.clone(),
            stats: CacheStats::register(stats, prefix),
        }
    }

    /// The underlying store
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheInterface> {
        &self.cache
    }

    /// Look up `key`
    ///
    /// The validator is consulted for every decoded, non-negative entry
    /// that may be served to `request`.
    pub fn find(
        &self,
        key: &str,
        request: &RequestHeaders,
        validator: &dyn CacheValidator,
    ) -> FindOutcome {
        let outcome = self.lookup(key, request, validator);
        if outcome.is_found() {
            self.stats.hits.increment();
        } else {
            self.stats.misses.increment();
            if outcome.fallback.is_some() {
                self.stats.fallbacks.increment();
            }
        }
        trace!(cache = %self.cache.name(), key, result = ?outcome.result, "Lookup");
        outcome
    }

    fn lookup(
        &self,
        key: &str,
        request: &RequestHeaders,
        validator: &dyn CacheValidator,
    ) -> FindOutcome {
        let bytes = match self.cache.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return FindOutcome::not_found(None),
            Err(e) => {
                self.stats.backend_errors.increment();
                warn!(cache = %self.cache.name(), key, error = %e, "Cache lookup failed");
                return FindOutcome::not_found(None);
            }
        };
        let value = match HttpValue::decode(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(cache = %self.cache.name(), key, error = %e, "Discarding undecodable entry");
                return FindOutcome::not_found(None);
            }
        };

        let now_ms = self.timer.now_ms();
        if let Some(kind) = value.remembered_kind() {
            if value.headers().is_expired(now_ms) {
                return FindOutcome::not_found(None);
            }
            return FindOutcome::recent(match kind {
                Remembered::FetchFailed => FindResult::RecentFetchFailed,
                Remembered::NotCacheable => FindResult::RecentFetchNotCacheable,
            });
        }

        // No fallback either: this variant is not for this request
        if !value.headers().is_proxy_cacheable(request) {
            debug!(cache = %self.cache.name(), key, "Stored variant does not match request");
            return FindOutcome::not_found(None);
        }
        if !validator.is_cache_valid(key, value.headers()) {
            debug!(cache = %self.cache.name(), key, "Entry invalidated");
            return FindOutcome::not_found(Some(value));
        }
        if value.headers().is_expired(now_ms) || !validator.is_fresh(value.headers()) {
            self.stats.expirations.increment();
            return FindOutcome::not_found(Some(value));
        }
        FindOutcome::found(value)
    }

    /// Encode a response for storage, or `None` when it must not be stored
    ///
    /// Headers without computed caching state are evaluated as of now.
    pub fn encode_for_put(
        &self,
        request: &RequestHeaders,
        headers: &ResponseHeaders,
        body: &[u8],
    ) -> Option<Vec<u8>> {
        let mut headers = headers.clone();
        let now_ms = self.timer.now_ms();
        if self.config.force_caching && headers.status_code() == 200 {
            let date_ms = if headers.caching().is_some() {
                headers.date_ms()
            } else {
                now_ms
            };
            headers.force_caching(date_ms, self.config.implicit_ttl_ms);
        } else if headers.caching().is_none() {
            headers.compute_caching(now_ms, self.config.implicit_ttl_ms);
        }

        if !headers.is_proxy_cacheable(request) {
            self.stats.not_cacheable.increment();
            debug!(cache = %self.cache.name(), status = headers.status_code(), "Response not cacheable");
            return None;
        }
        match HttpValue::new(headers, body.to_vec()).encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(cache = %self.cache.name(), error = %e, "Failed to encode response");
                None
            }
        }
    }

    /// Store already-encoded bytes under `key`
    pub fn put_encoded(&self, key: &str, bytes: Vec<u8>) {
        match self.cache.put(key, bytes) {
            Ok(()) => self.stats.inserts.increment(),
            Err(e) => {
                self.stats.backend_errors.increment();
                warn!(cache = %self.cache.name(), key, error = %e, "Cache write failed");
            }
        }
    }

    /// Store a response if a shared cache may keep it for `request`
    ///
    /// Returns whether it was handed to the store.
    pub fn put(
        &self,
        key: &str,
        request: &RequestHeaders,
        headers: &ResponseHeaders,
        body: &[u8],
    ) -> bool {
        match self.encode_for_put(request, headers, body) {
            Some(bytes) => {
                self.put_encoded(key, bytes);
                true
            }
            None => false,
        }
    }

    /// Encode a negative entry living `ttl_ms` from now
    pub fn encode_remembered(&self, kind: Remembered, ttl_ms: i64) -> Option<Vec<u8>> {
        let mut headers = ResponseHeaders::new(200);
        headers.force_caching(self.timer.now_ms(), ttl_ms);
        match HttpValue::remembered(kind, headers).encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(cache = %self.cache.name(), error = %e, "Failed to encode negative entry");
                None
            }
        }
    }

    fn remember(&self, key: &str, kind: Remembered, ttl_ms: i64) {
        if let Some(bytes) = self.encode_remembered(kind, ttl_ms) {
            debug!(cache = %self.cache.name(), key, ?kind, ttl_ms, "Remembering fetch outcome");
            self.put_encoded(key, bytes);
        }
    }

    /// Remember that fetching `key` failed
    pub fn remember_fetch_failed(&self, key: &str) {
        self.remember(key, Remembered::FetchFailed, self.config.remember_fetch_failed_ttl_ms);
    }

    /// Remember that a fetch of `key` was dropped, for a shorter time than a
    /// failure
    pub fn remember_fetch_dropped(&self, key: &str) {
        self.remember(key, Remembered::FetchFailed, self.config.remember_fetch_dropped_ttl_ms);
    }

    /// Remember that `key` could not be cached
    pub fn remember_not_cacheable(&self, key: &str) {
        self.remember(
            key,
            Remembered::NotCacheable,
            self.config.remember_not_cacheable_ttl_ms,
        );
    }

    /// Remove `key`
    pub fn delete(&self, key: &str) {
        if let Err(e) = self.cache.delete(key) {
            self.stats.backend_errors.increment();
            warn!(cache = %self.cache.name(), key, error = %e, "Cache delete failed");
        }
    }

    /// Settings in effect
    #[must_use]
    pub const fn config(&self) -> &HttpCacheConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lru_cache::LruCache;
    use crate::validator::AlwaysValid;
    use recache_core::MockTimer;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        timer: Arc<MockTimer>,
        stats: Statistics,
        cache: HttpCache,
    }

    fn fixture(config: &HttpCacheConfig) -> Fixture {
        let timer = Arc::new(MockTimer::new(NOW));
        let stats = Statistics::new();
        let cache = HttpCache::with_options(
            Arc::new(LruCache::new("lru", 1 << 20)),
            timer.clone(),
            config,
            &stats,
            "t",
        );
        Fixture { timer, stats, cache }
    }

    struct Invalid;

    impl CacheValidator for Invalid {
        fn is_cache_valid(&self, _key: &str, _headers: &ResponseHeaders) -> bool {
            false
        }
    }

    #[test]
    fn test_miss_on_empty() {
        let fx = fixture(&HttpCacheConfig::default());
        let outcome = fx.cache.find("k", &RequestHeaders::new(), &AlwaysValid);
        assert_eq!(outcome, FindOutcome::not_found(None));
        assert_eq!(fx.stats.value("t_misses"), 1);
    }

    #[test]
    fn test_uncacheable_not_stored() {
        let fx = fixture(&HttpCacheConfig::default());
        let headers = ResponseHeaders::new(200).with("Cache-Control", "no-store");
        assert!(!fx.cache.put("k", &RequestHeaders::new(), &headers, b"v"));
        assert_eq!(fx.stats.value("t_not_cacheable"), 1);
        assert_eq!(
            fx.cache.find("k", &RequestHeaders::new(), &AlwaysValid).result,
            FindResult::NotFound
        );
    }

    #[test]
    fn test_force_caching_stores_uncacheable_200() {
        let fx = fixture(&HttpCacheConfig {
            force_caching: true,
            ..HttpCacheConfig::default()
        });
        let headers = ResponseHeaders::new(200).with("Cache-Control", "private, no-store");
        assert!(fx.cache.put("k", &RequestHeaders::new(), &headers, b"v"));
        assert!(fx.cache.find("k", &RequestHeaders::new(), &AlwaysValid).is_found());

        let not_ok = ResponseHeaders::new(404);
        assert!(!fx.cache.put("k404", &RequestHeaders::new(), &not_ok, b""));
    }

    #[test]
    fn test_invalid_entry_is_fallback() {
        let fx = fixture(&HttpCacheConfig::default());
        fx.cache
            .put("k", &RequestHeaders::new(), &ResponseHeaders::new(200), b"v");
        let outcome = fx.cache.find("k", &RequestHeaders::new(), &Invalid);
        assert_eq!(outcome.result, FindResult::NotFound);
        assert_eq!(outcome.fallback.unwrap().body(), b"v");
        assert_eq!(fx.stats.value("t_fallbacks"), 1);
        assert_eq!(fx.stats.value("t_expirations"), 0);
    }

    #[test]
    fn test_remembered_failures_expire_without_fallback() {
        let fx = fixture(&HttpCacheConfig::default());
        let request = RequestHeaders::new();

        fx.cache.remember_fetch_failed("failed");
        fx.cache.remember_fetch_dropped("dropped");
        fx.cache.remember_not_cacheable("uncacheable");
        assert_eq!(
            fx.cache.find("failed", &request, &AlwaysValid).result,
            FindResult::RecentFetchFailed
        );
        assert_eq!(
            fx.cache.find("dropped", &request, &AlwaysValid).result,
            FindResult::RecentFetchFailed
        );
        assert_eq!(
            fx.cache.find("uncacheable", &request, &AlwaysValid).result,
            FindResult::RecentFetchNotCacheable
        );

        // Dropped fetches are forgotten after 10 s, the others after 300 s
        fx.timer.advance_ms(10_000);
        assert_eq!(
            fx.cache.find("dropped", &request, &AlwaysValid),
            FindOutcome::not_found(None)
        );
        assert_eq!(
            fx.cache.find("failed", &request, &AlwaysValid).result,
            FindResult::RecentFetchFailed
        );
        fx.timer.advance_ms(290_000);
        assert_eq!(
            fx.cache.find("failed", &request, &AlwaysValid),
            FindOutcome::not_found(None)
        );
        assert_eq!(
            fx.cache.find("uncacheable", &request, &AlwaysValid),
            FindOutcome::not_found(None)
        );
    }

    #[test]
    fn test_undecodable_entry_is_miss() {
        let fx = fixture(&HttpCacheConfig::default());
        fx.cache.cache().put("k", b"junk".to_vec()).unwrap();
        let outcome = fx.cache.find("k", &RequestHeaders::new(), &AlwaysValid);
        assert_eq!(outcome, FindOutcome::not_found(None));
    }

    #[test]
    fn test_delete() {
        let fx = fixture(&HttpCacheConfig::default());
        fx.cache
            .put("k", &RequestHeaders::new(), &ResponseHeaders::new(200), b"v");
        fx.cache.delete("k");
        assert!(!fx.cache.find("k", &RequestHeaders::new(), &AlwaysValid).is_found());
    }
}
