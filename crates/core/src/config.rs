//! Configuration types for recache
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Durations are expressed in milliseconds.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Worker pool settings
    pub worker_pool: WorkerPoolConfig,
    /// Purge log settings
    pub purge: PurgeConfig,
    /// HTTP cache settings
    pub http_cache: HttpCacheConfig,
}

impl Config {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| Error::configuration(format!("Failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read"))?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.worker_pool.max_workers == 0 {
            return Err(Error::configuration("workerPool.maxWorkers must be at least 1"));
        }
        if self.purge.lock_steal_ms > self.purge.lock_timeout_ms {
            return Err(Error::configuration(format!(
                "purge.lockStealMs ({}) must not exceed purge.lockTimeoutMs ({})",
                self.purge.lock_steal_ms, self.purge.lock_timeout_ms
            )));
        }
        if self.purge.max_bytes == 0 {
            return Err(Error::configuration("purge.maxBytes must be non-zero"));
        }
        Ok(())
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerPoolConfig {
    /// Maximum number of worker threads
    pub max_workers: usize,
    /// Thread name prefix
    pub name: String,
    /// Cancel the oldest queued task once a sequence holds more than this
    /// many; 0 disables load shedding
    pub load_shedding_threshold: usize,
    /// How long a shutdown waits between checks on a running task
    pub shutdown_poll_ms: u64,
    /// How many polls a shutdown makes before giving up on a task
    pub shutdown_max_polls: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            name: "recache-worker".to_string(),
            load_shedding_threshold: 0,
            shutdown_poll_ms: 1_000,
            shutdown_max_polls: 30,
        }
    }
}

/// Purge log settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PurgeConfig {
    /// When false, purges are rejected and every lookup is valid
    pub enabled: bool,
    /// Shared purge file
    pub file: PathBuf,
    /// Directory holding named lock files
    pub lock_dir: PathBuf,
    /// Minimum interval between re-reads of the purge file
    pub check_interval_ms: i64,
    /// How long a writer waits for the interprocess lock
    pub lock_timeout_ms: u64,
    /// Age after which a held lock is considered abandoned and stolen
    pub lock_steal_ms: u64,
    /// Write attempts retried after losing a race to another writer
    pub max_contention_retries: u32,
    /// Byte budget for the in-memory purge set
    pub max_bytes: usize,
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: PathBuf::from("cache.purge"),
            lock_dir: PathBuf::from("locks"),
            check_interval_ms: 5_000,
            lock_timeout_ms: 3_000,
            lock_steal_ms: 2_000,
            max_contention_retries: 2,
            max_bytes: 1024 * 1024,
        }
    }
}

/// HTTP cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpCacheConfig {
    /// TTL for responses with no explicit caching headers
    pub implicit_ttl_ms: i64,
    /// How long a failed fetch is remembered
    pub remember_fetch_failed_ttl_ms: i64,
    /// How long a dropped (low-confidence) fetch failure is remembered
    pub remember_fetch_dropped_ttl_ms: i64,
    /// How long an uncacheable response is remembered
    pub remember_not_cacheable_ttl_ms: i64,
    /// Store every 200 response regardless of its caching headers
    pub force_caching: bool,
    /// Largest encoded value written to the local tier
    pub cache1_limit_bytes: usize,
    /// Byte budget for the in-memory LRU tier
    pub lru_max_bytes: usize,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            implicit_ttl_ms: 300_000,
            remember_fetch_failed_ttl_ms: 300_000,
            remember_fetch_dropped_ttl_ms: 10_000,
            remember_not_cacheable_ttl_ms: 300_000,
            force_caching: false,
            cache1_limit_bytes: 64 * 1024,
            lru_max_bytes: 10 * 1024 * 1024,
        }
    }
}
