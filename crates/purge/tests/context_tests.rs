//! Integration tests for the shared purge file
//!
//! These tests exercise PurgeContext against the real file system and lock
//! files, and against a file system that simulates a competing writer.

use parking_lot::Mutex;
use recache_core::{
    FileLockManager, FileSystem, MemFileSystem, MemLockManager, MockTimer, PurgeConfig,
    Statistics, StdFileSystem, SystemTimer, Timer,
};
use recache_purge::{PurgeContext, parse_purge_file, stat_names};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const START_MS: i64 = 1_700_000_000_000;

/// File system where another process rewrites the purge file right after
/// each of our renames, a set number of times
#[derive(Debug)]
struct RacingFileSystem {
    inner: MemFileSystem,
    target: PathBuf,
    races_left: AtomicUsize,
    competing_contents: Mutex<Vec<u8>>,
}

impl RacingFileSystem {
    fn new(timer: Arc<dyn Timer>, target: &Path, races: usize, competing: &str) -> Self {
        Self {
            inner: MemFileSystem::new(timer),
            target: target.to_path_buf(),
            races_left: AtomicUsize::new(races),
            competing_contents: Mutex::new(competing.as_bytes().to_vec()),
        }
    }
}

impl FileSystem for RacingFileSystem {
    fn read_file(&self, path: &Path) -> recache_core::Result<Vec<u8>> {
        self.inner.read_file(path)
    }

    fn write_temp_file(&self, target: &Path, contents: &[u8]) -> recache_core::Result<PathBuf> {
        self.inner.write_temp_file(target, contents)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> recache_core::Result<()> {
        self.inner.rename_file(from, to)?;
        let race = self
            .races_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if race && to == self.target {
            self.inner.write_file(to, &self.competing_contents.lock());
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> recache_core::Result<()> {
        self.inner.remove_file(path)
    }

    fn mtime_ms(&self, path: &Path) -> recache_core::Result<i64> {
        self.inner.mtime_ms(path)
    }
}

fn counting_callback(ok: &Arc<AtomicUsize>, failed: &Arc<AtomicUsize>) -> impl FnOnce(bool) + Send + 'static {
    let (ok, failed) = (Arc::clone(ok), Arc::clone(failed));
    move |success| {
        if success {
            ok.fetch_add(1, Ordering::SeqCst);
        } else {
            failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn racing_context(races: usize) -> (PurgeContext, Arc<RacingFileSystem>, Statistics) {
    let timer: Arc<dyn Timer> = Arc::new(MockTimer::new(START_MS));
    let file = PathBuf::from("/shared/cache.purge");
    let competing = format!("0\n{} http://other/\n", START_MS - 1);
    let fs = Arc::new(RacingFileSystem::new(Arc::clone(&timer), &file, races, &competing));
    let stats = Statistics::new();
    let locks = MemLockManager::new(Arc::clone(&timer));
    let config = PurgeConfig {
        file,
        lock_timeout_ms: 100,
        lock_steal_ms: 50,
        max_contention_retries: 2,
        ..PurgeConfig::default()
    };
    let ctx = PurgeContext::with_options(&config, fs.clone(), &locks, timer, &stats);
    (ctx, fs, stats)
}

#[test]
fn test_contention_retry_succeeds_and_keeps_competing_purges() {
    let (ctx, fs, stats) = racing_context(2);
    let ok = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    ctx.add_purge_url("http://mine/", START_MS, counting_callback(&ok, &failed));

    assert_eq!(ok.load(Ordering::SeqCst), 1);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
    assert_eq!(stats.value(stat_names::CONTENTIONS), 2);

    // The last attempt merged on top of the competing writer's file
    let written = fs.inner.contents(ctx.filename()).unwrap();
    let (set, _) = parse_purge_file(std::str::from_utf8(&written).unwrap(), START_MS, 4096);
    assert!(!set.is_valid("http://mine/", START_MS));
    assert!(!set.is_valid("http://other/", START_MS - 1));
}

#[test]
fn test_contention_beyond_bound_fails_every_callback() {
    let (ctx, _fs, stats) = racing_context(usize::MAX);
    let ok = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));

    ctx.add_purge_url("http://mine/", START_MS, counting_callback(&ok, &failed));

    assert_eq!(ok.load(Ordering::SeqCst), 0);
    assert_eq!(failed.load(Ordering::SeqCst), 1);
    assert_eq!(stats.value(stat_names::CONTENTIONS), 3);
    assert_eq!(ctx.num_pending_callbacks(), 0);
    assert!(!ctx.is_waiting_for_lock());
}

#[test]
fn test_two_processes_share_purge_file_on_disk() {
    let dir = TempDir::new().unwrap();
    let timer: Arc<dyn Timer> = Arc::new(SystemTimer);
    let config = PurgeConfig {
        file: dir.path().join("cache.purge"),
        lock_dir: dir.path().join("locks"),
        check_interval_ms: 0,
        ..PurgeConfig::default()
    };
    let stats = Statistics::new();

    // Separate lock managers stand in for separate processes
    let make = || {
        let locks = FileLockManager::new(&config.lock_dir, Arc::clone(&timer));
        PurgeContext::with_options(&config, Arc::new(StdFileSystem), &locks, Arc::clone(&timer), &stats)
    };
    let first = make();
    let second = make();

    let now = timer.now_ms();
    let ok = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    first.add_purge_url("http://a/", now, counting_callback(&ok, &failed));
    second.add_purge_url("http://b/", now, counting_callback(&ok, &failed));
    assert_eq!(ok.load(Ordering::SeqCst), 2);

    for ctx in [&first, &second] {
        assert!(!ctx.is_valid("http://a/", now));
        assert!(!ctx.is_valid("http://b/", now));
        assert!(ctx.is_valid("http://c/", now));
    }

    // Lock files are removed after each write; only guard files remain
    let leftover_locks = std::fs::read_dir(&config.lock_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "lock"))
        .count();
    assert_eq!(leftover_locks, 0);
}

#[test]
fn test_concurrent_purges_all_land() {
    let timer: Arc<dyn Timer> = Arc::new(MockTimer::new(START_MS));
    let fs: Arc<dyn FileSystem> = Arc::new(MemFileSystem::new(Arc::clone(&timer)));
    let locks = MemLockManager::new(Arc::clone(&timer));
    let stats = Statistics::new();
    let ctx = PurgeContext::new("/shared/cache.purge", fs, &locks, timer, &stats);

    let ok = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    std::thread::scope(|scope| {
        for thread in 0..8 {
            let ctx = &ctx;
            let (ok, failed) = (&ok, &failed);
            scope.spawn(move || {
                for n in 0..10 {
                    let url = format!("http://h/{thread}/{n}");
                    ctx.add_purge_url(&url, START_MS, counting_callback(ok, failed));
                }
            });
        }
    });

    assert_eq!(ok.load(Ordering::SeqCst), 80);
    assert_eq!(failed.load(Ordering::SeqCst), 0);
    ctx.poll_file_system_for_updates();
    let snapshot = ctx.snapshot();
    assert_eq!(snapshot.len(), 80);
    assert!(!snapshot.is_valid("http://h/7/9", START_MS));
}
