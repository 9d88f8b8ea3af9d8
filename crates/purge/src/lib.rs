//! Cache invalidation shared between processes
//!
//! - [`PurgeSet`]: URL → invalidation time, plus a global invalidation time
//! - [`parse_purge_file`] / [`serialize_purge_set`]: the on-disk text format
//! - [`PurgeContext`]: batches purges into a shared file under a named lock
//!   and answers validity queries from a periodically refreshed snapshot
//!
//! ```rust,no_run
//! use recache_core::{MemLockManager, Statistics, StdFileSystem, SystemTimer, Timer};
//! use recache_purge::PurgeContext;
//! use std::sync::Arc;
//!
//! let timer: Arc<dyn Timer> = Arc::new(SystemTimer);
//! let locks = MemLockManager::new(Arc::clone(&timer));
//! let stats = Statistics::new();
//! let ctx = PurgeContext::new("cache.purge", Arc::new(StdFileSystem), &locks, Arc::clone(&timer), &stats);
//!
//! let now = timer.now_ms();
//! ctx.add_purge_url("http://example.com/style.css", now, |ok| assert!(ok));
//! assert!(!ctx.is_valid("http://example.com/style.css", now - 1));
//! ```

#![expect(
    clippy::missing_errors_doc,
    reason = "Errors are described on the Error enum variants"
)]

mod context;
mod error;
mod file_format;
mod purge_set;

pub use context::{PurgeCallback, PurgeContext, UpdateCallback, stat_names};
pub use error::{Error, Result};
pub use file_format::{parse_purge_file, serialize_purge_set};
pub use purge_set::{CLOCK_SKEW_ALLOWANCE_MS, DEFAULT_MAX_BYTES, PurgeSet, check_timestamp, check_url};
