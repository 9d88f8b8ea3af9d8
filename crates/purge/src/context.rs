//! Cross-process purge log
//!
//! Every cooperating process shares one purge file. Writers take a named
//! lock, read the file, merge their pending purges into it, write it back
//! atomically and re-read it to verify nobody else wrote in between. A
//! writer that loses that race merges its purges back into the pending set
//! and retries a bounded number of times.
//!
//! Readers never take the lock. They answer from an in-memory snapshot that
//! is refreshed from the file at most once per check interval.

use crate::file_format::{parse_purge_file, serialize_purge_set};
use crate::purge_set::{PurgeSet, check_timestamp, check_url};
use parking_lot::{Mutex, RwLock};
use recache_core::{
    FileSystem, NamedLock, NamedLockManager, PurgeConfig, Statistics, Timer, Variable,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Completion callback for a purge request; receives whether the purge
/// reached the purge file
pub type PurgeCallback = Box<dyn FnOnce(bool) + Send>;

/// Observer invoked with every newly installed snapshot
pub type UpdateCallback = Arc<dyn Fn(&Arc<PurgeSet>) + Send + Sync>;

/// Counter names registered by [`PurgeContext`]
pub mod stat_names {
    /// Batches abandoned because the lock could not be taken
    pub const CANCELLATIONS: &str = "purge_cancellations";
    /// Writes that lost a race with another writer
    pub const CONTENTIONS: &str = "purge_contentions";
    /// Unparseable purge file lines
    pub const FILE_PARSE_FAILURES: &str = "purge_file_parse_failures";
    /// Purge file writes that failed with an I/O error
    pub const FILE_WRITE_FAILURES: &str = "purge_file_write_failures";
    /// Snapshots installed
    pub const INDEX: &str = "purge_index";
}

#[derive(Debug)]
struct PurgeStats {
    cancellations: Arc<Variable>,
    contentions: Arc<Variable>,
    parse_failures: Arc<Variable>,
    write_failures: Arc<Variable>,
    index: Arc<Variable>,
}

impl PurgeStats {
    fn register(stats: &Statistics) -> Self {
        Self {
            cancellations: stats.add_variable(stat_names::CANCELLATIONS),
            contentions: stats.add_variable(stat_names::CONTENTIONS),
            parse_failures: stats.add_variable(stat_names::FILE_PARSE_FAILURES),
            write_failures: stats.add_variable(stat_names::FILE_WRITE_FAILURES),
            index: stats.add_variable(stat_names::INDEX),
        }
    }
}

struct ContextState {
    snapshot: Arc<PurgeSet>,
    /// Bytes the snapshot was parsed from
    snapshot_contents: Option<Vec<u8>>,
    pending: PurgeSet,
    pending_callbacks: Vec<PurgeCallback>,
    waiting_for_lock: bool,
    reading: bool,
    next_check_ms: i64,
    /// Bumped by every snapshot installed from a write
    generation: u64,
    num_consecutive_failures: u32,
}

/// Where a snapshot came from
enum Install {
    /// Verified contents of our own write
    Written,
    /// A periodic read that started at `generation`
    Polled { generation: u64 },
}

enum Cycle {
    Done,
    Retry,
}

enum WriteFailure {
    Contention,
    Io,
}

/// Per-process handle on the shared purge file
pub struct PurgeContext {
    filename: PathBuf,
    config: PurgeConfig,
    fs: Arc<dyn FileSystem>,
    timer: Arc<dyn Timer>,
    lock: Box<dyn NamedLock>,
    stats: PurgeStats,
    state: Mutex<ContextState>,
    update_callback: RwLock<Option<UpdateCallback>>,
}

impl std::fmt::Debug for PurgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeContext")
            .field("filename", &self.filename)
            .field("lock", &self.lock.name())
            .field("enabled", &self.config.enabled)
            .finish_non_exhaustive()
    }
}

impl PurgeContext {
    /// Context for `filename` with default settings
    pub fn new(
        filename: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        lock_manager: &dyn NamedLockManager,
        timer: Arc<dyn Timer>,
        stats: &Statistics,
    ) -> Self {
        let config = PurgeConfig {
            file: filename.into(),
            ..PurgeConfig::default()
        };
        Self::with_options(&config, fs, lock_manager, timer, stats)
    }

    /// Context for the purge file named in `config`
    pub fn with_options(
        config: &PurgeConfig,
        fs: Arc<dyn FileSystem>,
        lock_manager: &dyn NamedLockManager,
        timer: Arc<dyn Timer>,
        stats: &Statistics,
    ) -> Self {
        let lock_name = format!("{}.lock", config.file.display());
        Self {
            filename: config.file.clone(),
            lock: lock_manager.create_named_lock(&lock_name),
            fs,
            timer,
            stats: PurgeStats::register(stats),
            state: Mutex::new(ContextState {
                snapshot: Arc::new(PurgeSet::new(config.max_bytes)),
                snapshot_contents: None,
                pending: PurgeSet::new(config.max_bytes),
                pending_callbacks: Vec::new(),
                waiting_for_lock: false,
                reading: false,
                next_check_ms: i64::MIN,
                generation: 0,
                num_consecutive_failures: 0,
            }),
            update_callback: RwLock::new(None),
            config: config.clone(),
        }
    }

    /// Path of the shared purge file
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Observe every snapshot installed from now on
    pub fn set_update_callback(&self, callback: impl Fn(&Arc<PurgeSet>) + Send + Sync + 'static) {
        *self.update_callback.write() = Some(Arc::new(callback));
    }

    /// Invalidate `url` as of `timestamp_ms`
    ///
    /// If no write cycle is waiting for the lock, this thread runs one;
    /// otherwise the purge joins the waiting cycle. `callback` learns
    /// whether the purge reached the file.
    pub fn add_purge_url(
        &self,
        url: &str,
        timestamp_ms: i64,
        callback: impl FnOnce(bool) + Send + 'static,
    ) {
        if let Err(e) = check_url(url) {
            warn!(error = %e, "Rejecting purge");
            callback(false);
            return;
        }
        self.add_purge(timestamp_ms, Box::new(callback), |pending| {
            pending.put(url, timestamp_ms);
        });
    }

    /// Invalidate everything as of `timestamp_ms`
    pub fn set_cache_purge_global_timestamp_ms(
        &self,
        timestamp_ms: i64,
        callback: impl FnOnce(bool) + Send + 'static,
    ) {
        self.add_purge(timestamp_ms, Box::new(callback), |pending| {
            pending.update_global_invalidation_timestamp_ms(timestamp_ms);
        });
    }

    fn add_purge(
        &self,
        timestamp_ms: i64,
        callback: PurgeCallback,
        apply: impl FnOnce(&mut PurgeSet),
    ) {
        if !self.config.enabled {
            debug!("Purging is disabled, rejecting purge");
            callback(false);
            return;
        }
        if let Err(e) = check_timestamp(timestamp_ms, self.timer.now_ms()) {
            warn!(error = %e, "Rejecting purge");
            callback(false);
            return;
        }

        {
            let mut state = self.state.lock();
            apply(&mut state.pending);
            state.pending_callbacks.push(callback);
            if state.waiting_for_lock {
                return;
            }
            state.waiting_for_lock = true;
        }
        self.grab_lock_and_update();
    }

    fn grab_lock_and_update(&self) {
        let wait = Duration::from_millis(self.config.lock_timeout_ms);
        let steal_after = Duration::from_millis(self.config.lock_steal_ms);
        loop {
            if !self.lock.lock_timed_wait_steal_old(wait, steal_after) {
                self.cancel_cache_purge_file();
                return;
            }
            match self.update_cache_purge_file() {
                Cycle::Done => return,
                Cycle::Retry => {}
            }
        }
    }

    /// Give up on the pending batch: every waiting callback fails and the
    /// pending purges are discarded
    pub fn cancel_cache_purge_file(&self) {
        let callbacks = {
            let mut state = self.state.lock();
            state.waiting_for_lock = false;
            state.pending.clear();
            std::mem::take(&mut state.pending_callbacks)
        };
        self.stats.cancellations.increment();
        warn!(
            file = %self.filename.display(),
            callbacks = callbacks.len(),
            "Could not lock purge file, cancelling pending purges"
        );
        for callback in callbacks {
            callback(false);
        }
    }

    /// Read the file, or an empty set when it does not exist yet
    fn read_purge_file(&self) -> recache_core::Result<(PurgeSet, Vec<u8>)> {
        let contents = match self.fs.read_file(&self.filename) {
            Ok(contents) => contents,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        let text = String::from_utf8_lossy(&contents);
        let (set, failures) = parse_purge_file(&text, self.timer.now_ms(), self.config.max_bytes);
        if failures > 0 {
            warn!(file = %self.filename.display(), failures, "Purge file had malformed lines");
            self.stats
                .parse_failures
                .add(i64::try_from(failures).unwrap_or(i64::MAX));
        }
        Ok((set, contents))
    }

    /// One read-merge-write-verify pass; called with the lock held
    fn update_cache_purge_file(&self) -> Cycle {
        let read = self.read_purge_file();

        let (pending, callbacks) = {
            let mut state = self.state.lock();
            state.waiting_for_lock = false;
            let mut pending = PurgeSet::new(self.config.max_bytes);
            state.pending.swap(&mut pending);
            (pending, std::mem::take(&mut state.pending_callbacks))
        };

        let outcome = read.map_err(|e| (e, WriteFailure::Io)).and_then(|(mut file_set, _)| {
            file_set.merge(&pending);
            let text = serialize_purge_set(&file_set);
            self.fs
                .write_file_atomic(&self.filename, text.as_bytes())
                .and_then(|()| self.fs.read_file(&self.filename))
                .map_err(|e| (e, WriteFailure::Io))
                .and_then(|written| {
                    if written == text.as_bytes() {
                        Ok((file_set, written))
                    } else {
                        Err((
                            recache_core::Error::lock(self.lock.name(), "purge file changed during write"),
                            WriteFailure::Contention,
                        ))
                    }
                })
        });
        self.lock.unlock();

        match outcome {
            Ok((file_set, written)) => {
                self.state.lock().num_consecutive_failures = 0;
                debug!(
                    file = %self.filename.display(),
                    records = file_set.len(),
                    callbacks = callbacks.len(),
                    "Wrote purge file"
                );
                self.install_snapshot(file_set, written, Install::Written);
                for callback in callbacks {
                    callback(true);
                }
                Cycle::Done
            }
            Err((e, failure)) => {
                match failure {
                    WriteFailure::Contention => {
                        self.stats.contentions.increment();
                        warn!(file = %self.filename.display(), "Purge file contention");
                    }
                    WriteFailure::Io => {
                        self.stats.write_failures.increment();
                        error!(file = %self.filename.display(), error = %e, "Failed to write purge file");
                    }
                }
                self.retry_or_fail(pending, callbacks)
            }
        }
    }

    fn retry_or_fail(&self, pending: PurgeSet, mut callbacks: Vec<PurgeCallback>) -> Cycle {
        let mut state = self.state.lock();
        state.num_consecutive_failures += 1;
        if state.num_consecutive_failures <= self.config.max_contention_retries {
            // Older purges go first so newer ones keep their eviction order
            let mut restored = pending;
            restored.merge(&state.pending);
            state.pending = restored;
            callbacks.append(&mut state.pending_callbacks);
            state.pending_callbacks = callbacks;
            info!(
                attempt = state.num_consecutive_failures,
                "Retrying purge file update"
            );
            if state.waiting_for_lock {
                return Cycle::Done;
            }
            state.waiting_for_lock = true;
            return Cycle::Retry;
        }

        state.num_consecutive_failures = 0;
        drop(state);
        error!(
            file = %self.filename.display(),
            callbacks = callbacks.len(),
            "Giving up on purge batch"
        );
        for callback in callbacks {
            callback(false);
        }
        Cycle::Done
    }

    /// Swap in a new snapshot when the file contents changed
    ///
    /// A polled read that overlapped a write is dropped, since it may
    /// predate the written contents.
    fn install_snapshot(&self, set: PurgeSet, contents: Vec<u8>, source: Install) {
        let installed = {
            let mut state = self.state.lock();
            match source {
                Install::Written => {
                    state.generation += 1;
                    state.next_check_ms = i64::MIN;
                }
                Install::Polled { generation } if generation != state.generation => {
                    debug!(file = %self.filename.display(), "Dropping read that overlapped a write");
                    return;
                }
                Install::Polled { .. } => {}
            }
            if state.snapshot_contents.as_deref() == Some(contents.as_slice()) {
                None
            } else {
                let snapshot = Arc::new(set);
                state.snapshot = Arc::clone(&snapshot);
                state.snapshot_contents = Some(contents);
                Some(snapshot)
            }
        };
        if let Some(snapshot) = installed {
            self.stats.index.increment();
            let callback = self.update_callback.read().clone();
            if let Some(callback) = callback {
                callback(&snapshot);
            }
        }
    }

    /// Re-read the file now, unless another thread already is
    pub fn poll_file_system_for_updates(&self) {
        {
            let mut state = self.state.lock();
            if state.reading {
                return;
            }
            state.reading = true;
        }
        self.refresh_snapshot();
    }

    fn refresh_snapshot(&self) {
        let generation = self.state.lock().generation;
        let read = self.read_purge_file();
        let now_ms = self.timer.now_ms();
        {
            let mut state = self.state.lock();
            state.reading = false;
            if state.generation == generation {
                state.next_check_ms = now_ms.saturating_add(self.config.check_interval_ms);
            }
        }
        match read {
            Ok((set, contents)) => self.install_snapshot(set, contents, Install::Polled { generation }),
            Err(e) => warn!(file = %self.filename.display(), error = %e, "Failed to read purge file"),
        }
    }

    /// Whether a resource fetched from `url` at `timestamp_ms` is still
    /// valid
    ///
    /// Answers from the in-memory snapshot, re-reading the file first when
    /// the check interval has passed and no other thread is reading it.
    pub fn is_valid(&self, url: &str, timestamp_ms: i64) -> bool {
        if !self.config.enabled {
            return true;
        }
        let should_read = {
            let mut state = self.state.lock();
            let due = !state.reading && self.timer.now_ms() >= state.next_check_ms;
            if due {
                state.reading = true;
            }
            due
        };
        if should_read {
            self.refresh_snapshot();
        }
        self.snapshot().is_valid(url, timestamp_ms)
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<PurgeSet> {
        Arc::clone(&self.state.lock().snapshot)
    }

    /// Whether a write cycle is waiting for the lock
    #[must_use]
    pub fn is_waiting_for_lock(&self) -> bool {
        self.state.lock().waiting_for_lock
    }

    /// Number of purges accumulated for the next write
    #[must_use]
    pub fn num_pending_callbacks(&self) -> usize {
        self.state.lock().pending_callbacks.len()
    }
}
