//! Subcommand execution against the shared purge file

use crate::cli::{CliError, Command};
use recache_core::{
    Config, FileLockManager, FileSystem, NamedLockManager, Statistics, StdFileSystem, Timer,
};
use recache_purge::{PurgeContext, serialize_purge_set, stat_names};
use std::io::Write;
use std::sync::{Arc, mpsc};
use tracing::{info, instrument, warn};

/// Runs CLI subcommands through a [`PurgeContext`]
pub struct Runner {
    context: PurgeContext,
    timer: Arc<dyn Timer>,
    stats: Statistics,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Runner using the real file system and interprocess file locks
    #[must_use]
    pub fn new(config: &Config, timer: Arc<dyn Timer>) -> Self {
        let locks = FileLockManager::new(config.purge.lock_dir.clone(), Arc::clone(&timer));
        Self::with_capabilities(config, Arc::new(StdFileSystem), &locks, timer)
    }

    /// Runner over explicit capabilities
    #[must_use]
    pub fn with_capabilities(
        config: &Config,
        fs: Arc<dyn FileSystem>,
        locks: &dyn NamedLockManager,
        timer: Arc<dyn Timer>,
    ) -> Self {
        let stats = Statistics::new();
        let context =
            PurgeContext::with_options(&config.purge, fs, locks, Arc::clone(&timer), &stats);
        Self {
            context,
            timer,
            stats,
        }
    }

    /// The purge context commands run through
    #[must_use]
    pub const fn context(&self) -> &PurgeContext {
        &self.context
    }

    /// Run `command`, writing its report to `out`
    #[instrument(skip(self, out), fields(file = %self.context.filename().display()))]
    pub fn execute(&self, command: &Command, out: &mut dyn Write) -> Result<(), CliError> {
        match command {
            Command::Purge { urls } => self.purge(urls, out),
            Command::PurgeAll => self.purge_all(out),
            Command::Check { url, timestamp_ms } => self.check(url, *timestamp_ms, out),
            Command::Show => self.show(out),
        }
    }

    fn purge(&self, urls: &[String], out: &mut dyn Write) -> Result<(), CliError> {
        let now_ms = self.timer.now_ms();
        let (tx, rx) = mpsc::channel();
        for url in urls {
            let tx = tx.clone();
            let url_owned = url.clone();
            self.context.add_purge_url(url, now_ms, move |ok| {
                // The receiver outlives every purge
                let _ = tx.send((url_owned, ok));
            });
        }
        drop(tx);

        let mut failed = Vec::new();
        for (url, ok) in rx {
            if ok {
                writeln!(out, "purged {url} at {now_ms}")?;
            } else {
                warn!(url = %url, "Purge failed");
                failed.push(url);
            }
        }
        if failed.is_empty() {
            info!(count = urls.len(), now_ms, "Purged URLs");
            return Ok(());
        }
        Err(recache_purge::Error::batch(format!(
            "{} of {} purges failed ({} contentions): {}",
            failed.len(),
            urls.len(),
            self.stats.value(stat_names::CONTENTIONS),
            failed.join(", ")
        ))
        .into())
    }

    fn purge_all(&self, out: &mut dyn Write) -> Result<(), CliError> {
        let now_ms = self.timer.now_ms();
        let (tx, rx) = mpsc::channel();
        self.context
            .set_cache_purge_global_timestamp_ms(now_ms, move |ok| {
                let _ = tx.send(ok);
            });
        if rx.recv().unwrap_or(false) {
            info!(now_ms, "Raised global invalidation timestamp");
            writeln!(out, "purged everything at {now_ms}")?;
            Ok(())
        } else {
            Err(recache_purge::Error::batch("global purge did not reach the purge file").into())
        }
    }

    fn check(&self, url: &str, timestamp_ms: i64, out: &mut dyn Write) -> Result<(), CliError> {
        if self.context.is_valid(url, timestamp_ms) {
            writeln!(out, "valid")?;
            Ok(())
        } else {
            writeln!(out, "invalid")?;
            Err(CliError::Invalid {
                url: url.to_owned(),
                timestamp_ms,
            })
        }
    }

    fn show(&self, out: &mut dyn Write) -> Result<(), CliError> {
        self.context.poll_file_system_for_updates();
        let snapshot = self.context.snapshot();
        if self.stats.value(stat_names::FILE_PARSE_FAILURES) > 0 {
            warn!(
                failures = self.stats.value(stat_names::FILE_PARSE_FAILURES),
                "Purge file has unparseable lines"
            );
        }
        out.write_all(serialize_purge_set(&snapshot).as_bytes())?;
        Ok(())
    }
}
