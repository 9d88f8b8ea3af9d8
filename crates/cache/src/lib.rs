//! Two-tier HTTP response cache
//!
//! - [`ResponseHeaders`] derive a caching decision (TTL, shareability, vary
//!   rules) from a response
//! - [`HttpValue`] is the stored form of a response
//! - [`CacheInterface`] is the byte store behind a tier; [`LruCache`] is the
//!   in-memory implementation
//! - [`HttpCache`] adds HTTP freshness and validity to one tier
//! - [`WriteThroughHttpCache`] puts a fast local tier in front of a shared one
//! - [`PurgeValidator`] checks entries against the cross-process purge log
//!
//! ```rust
//! use recache_cache::{AlwaysValid, HttpCache, LruCache, RequestHeaders, ResponseHeaders};
//! use recache_core::{Statistics, SystemTimer};
//! use std::sync::Arc;
//!
//! let stats = Statistics::new();
//! let cache = HttpCache::new(Arc::new(LruCache::new("local", 1 << 20)), Arc::new(SystemTimer), &stats);
//! let request = RequestHeaders::new();
//! let headers = ResponseHeaders::new(200).with("Cache-Control", "max-age=300");
//! assert!(cache.put("http://example.com/", &request, &headers, b"hello"));
//! let outcome = cache.find("http://example.com/", &request, &AlwaysValid);
//! assert_eq!(outcome.value.unwrap().body(), b"hello");
//! ```

#![expect(
    clippy::missing_errors_doc,
    reason = "Errors are described on the Error enum variants"
)]

mod error;
pub mod headers;
mod http_cache;
mod interface;
mod lru_cache;
mod validator;
mod value;
mod write_through;

pub use error::{Error, Result};
pub use headers::{CachingState, RequestHeaders, ResponseHeaders};
pub use http_cache::{FindOutcome, FindResult, HttpCache, stat_names};
pub use interface::CacheInterface;
pub use lru_cache::LruCache;
pub use validator::{AlwaysValid, CacheValidator, PurgeValidator};
pub use value::{HttpValue, Remembered};
pub use write_through::WriteThroughHttpCache;
