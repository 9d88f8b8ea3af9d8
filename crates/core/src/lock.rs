//! Named advisory locks with steal-after-timeout
//!
//! A lock moves through `Unlocked -> Held { owner, acquired_ms } -> Stolen`.
//! A contender that finds the lock held for at least `steal_after` takes it
//! over; the previous holder discovers the theft when it unlocks. Nothing
//! here stops a slow holder from continuing to write after being stolen
//! from, so callers must verify their writes.

use crate::timer::Timer;
use crate::{Error, Result};
use fs4::fs_std::FileExt;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Current holder of a named lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHolder {
    /// Opaque owner token
    pub owner: String,
    /// When the holder took the lock
    pub acquired_ms: i64,
}

impl LockHolder {
    fn encode(&self) -> String {
        format!("{} {}\n", self.owner, self.acquired_ms)
    }

    fn decode(text: &str) -> Option<Self> {
        let (owner, acquired) = text.trim().split_once(' ')?;
        Some(Self {
            owner: owner.to_string(),
            acquired_ms: acquired.parse().ok()?,
        })
    }
}

/// Outcome of one attempt to take a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The lock was free
    Acquired,
    /// The lock was held past the steal threshold and has been taken over
    Stolen,
    /// The lock is held and still fresh
    Busy,
}

/// Decide whether a contender may take a lock currently held by `current`
#[must_use]
pub fn claim(current: Option<&LockHolder>, now_ms: i64, steal_after_ms: i64) -> Claim {
    match current {
        None => Claim::Acquired,
        Some(holder) if now_ms - holder.acquired_ms >= steal_after_ms => Claim::Stolen,
        Some(_) => Claim::Busy,
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn new_owner_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A lock shared by name between cooperating threads or processes
pub trait NamedLock: Send + Sync + std::fmt::Debug {
    /// Name the lock was created with
    fn name(&self) -> &str;

    /// Wait up to `wait` for the lock, stealing it if the current holder has
    /// held it for at least `steal_after`. Returns true once held.
    fn lock_timed_wait_steal_old(&self, wait: Duration, steal_after: Duration) -> bool;

    /// Release the lock if this instance still holds it
    fn unlock(&self);

    /// Whether this instance currently holds the lock
    fn held(&self) -> bool;
}

/// Factory for named locks
pub trait NamedLockManager: Send + Sync + std::fmt::Debug {
    /// Create a handle for the lock called `name`
    fn create_named_lock(&self, name: &str) -> Box<dyn NamedLock>;
}

#[derive(Debug, Default)]
struct MemLockTable {
    holders: Mutex<HashMap<String, LockHolder>>,
    released: Condvar,
}

/// In-process lock manager
#[derive(Debug, Clone)]
pub struct MemLockManager {
    table: Arc<MemLockTable>,
    timer: Arc<dyn Timer>,
}

impl MemLockManager {
    /// Create a manager whose steal decisions use `timer`
    #[must_use]
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            table: Arc::new(MemLockTable::default()),
            timer,
        }
    }

    /// Current holder of `name`, if any
    #[must_use]
    pub fn holder(&self, name: &str) -> Option<LockHolder> {
        self.table.holders.lock().get(name).cloned()
    }
}

impl NamedLockManager for MemLockManager {
    fn create_named_lock(&self, name: &str) -> Box<dyn NamedLock> {
        Box::new(MemLock {
            name: name.to_string(),
            owner: new_owner_token(),
            table: Arc::clone(&self.table),
            timer: Arc::clone(&self.timer),
        })
    }
}

#[derive(Debug)]
struct MemLock {
    name: String,
    owner: String,
    table: Arc<MemLockTable>,
    timer: Arc<dyn Timer>,
}

impl NamedLock for MemLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_timed_wait_steal_old(&self, wait: Duration, steal_after: Duration) -> bool {
        let deadline = Instant::now() + wait;
        let mut holders = self.table.holders.lock();
        loop {
            let now_ms = self.timer.now_ms();
            match claim(holders.get(&self.name), now_ms, duration_ms(steal_after)) {
                Claim::Busy => {}
                outcome => {
                    if outcome == Claim::Stolen {
                        warn!(lock = %self.name, "Stealing stale lock");
                    }
                    holders.insert(
                        self.name.clone(),
                        LockHolder {
                            owner: self.owner.clone(),
                            acquired_ms: now_ms,
                        },
                    );
                    return true;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %self.name, "Timed out waiting for lock");
                return false;
            }
            let remaining = (deadline - now).min(POLL_INTERVAL);
            let _ = self.table.released.wait_for(&mut holders, remaining);
        }
    }

    fn unlock(&self) {
        let mut holders = self.table.holders.lock();
        match holders.get(&self.name) {
            Some(holder) if holder.owner == self.owner => {
                holders.remove(&self.name);
                self.table.released.notify_all();
            }
            Some(_) => warn!(lock = %self.name, "Lock was stolen before unlock"),
            None => debug!(lock = %self.name, "Unlock of a lock that is not held"),
        }
    }

    fn held(&self) -> bool {
        self.table
            .holders
            .lock()
            .get(&self.name)
            .is_some_and(|h| h.owner == self.owner)
    }
}

/// Lock manager backed by lock files in a shared directory
///
/// Each lock is a file `<dir>/<name>.lock` holding `<owner> <acquired_ms>`.
/// The read-decide-write step runs under an OS advisory lock on a sidecar
/// `<name>.guard` file, held only for that step.
#[derive(Debug, Clone)]
pub struct FileLockManager {
    dir: PathBuf,
    timer: Arc<dyn Timer>,
}

impl FileLockManager {
    /// Create a manager storing lock files under `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, timer: Arc<dyn Timer>) -> Self {
        Self {
            dir: dir.into(),
            timer,
        }
    }
}

fn sanitize_lock_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl NamedLockManager for FileLockManager {
    fn create_named_lock(&self, name: &str) -> Box<dyn NamedLock> {
        let base = sanitize_lock_name(name);
        Box::new(FileLock {
            name: name.to_string(),
            path: self.dir.join(format!("{base}.lock")),
            guard_path: self.dir.join(format!("{base}.guard")),
            owner: new_owner_token(),
            timer: Arc::clone(&self.timer),
        })
    }
}

#[derive(Debug)]
struct FileLock {
    name: String,
    path: PathBuf,
    guard_path: PathBuf,
    owner: String,
    timer: Arc<dyn Timer>,
}

impl FileLock {
    /// Run `f` with the current holder while holding the guard file lock
    fn with_guard<T>(&self, f: impl FnOnce(Option<LockHolder>) -> Result<T>) -> Result<T> {
        if let Some(dir) = self.guard_path.parent() {
            fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;
        }
        let guard = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.guard_path)
            .map_err(|e| Error::io(e, &self.guard_path, "open"))?;
        FileExt::lock_exclusive(&guard).map_err(|e| Error::io(e, &self.guard_path, "lock"))?;
        let result = f(read_holder(&self.path));
        // Dropping the handle releases the guard
        drop(guard);
        result
    }

    fn try_claim(&self, steal_after: Duration) -> Result<Claim> {
        self.with_guard(|current| {
            let now_ms = self.timer.now_ms();
            let outcome = claim(current.as_ref(), now_ms, duration_ms(steal_after));
            if outcome != Claim::Busy {
                let holder = LockHolder {
                    owner: self.owner.clone(),
                    acquired_ms: now_ms,
                };
                fs::write(&self.path, holder.encode())
                    .map_err(|e| Error::io(e, &self.path, "write"))?;
            }
            Ok(outcome)
        })
    }
}

fn read_holder(path: &Path) -> Option<LockHolder> {
    let text = fs::read_to_string(path).ok()?;
    // An unreadable record is treated as abandoned long ago
    Some(LockHolder::decode(&text).unwrap_or(LockHolder {
        owner: String::new(),
        acquired_ms: 0,
    }))
}

impl NamedLock for FileLock {
    fn name(&self) -> &str {
        &self.name
    }

    fn lock_timed_wait_steal_old(&self, wait: Duration, steal_after: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            match self.try_claim(steal_after) {
                Ok(Claim::Acquired) => return true,
                Ok(Claim::Stolen) => {
                    warn!(lock = %self.name, path = %self.path.display(), "Stealing stale lock");
                    return true;
                }
                Ok(Claim::Busy) => {}
                Err(e) => warn!(lock = %self.name, error = %e, "Lock attempt failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %self.name, "Timed out waiting for lock");
                return false;
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    fn unlock(&self) {
        let result = self.with_guard(|current| match current {
            Some(holder) if holder.owner == self.owner => {
                fs::remove_file(&self.path).map_err(|e| Error::io(e, &self.path, "remove_file"))
            }
            Some(_) => Err(Error::lock(&self.name, "stolen before unlock")),
            None => Ok(()),
        });
        if let Err(e) = result {
            warn!(lock = %self.name, error = %e, "Unlock failed");
        }
    }

    fn held(&self) -> bool {
        read_holder(&self.path).is_some_and(|h| h.owner == self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::MockTimer;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_millis(50);
    const STEAL: Duration = Duration::from_millis(2_000);

    #[test]
    fn test_claim_state_machine() {
        let holder = LockHolder {
            owner: "a".to_string(),
            acquired_ms: 1_000,
        };
        assert_eq!(claim(None, 1_000, 2_000), Claim::Acquired);
        assert_eq!(claim(Some(&holder), 2_999, 2_000), Claim::Busy);
        assert_eq!(claim(Some(&holder), 3_000, 2_000), Claim::Stolen);
    }

    #[test]
    fn test_holder_encoding() {
        let holder = LockHolder {
            owner: "abc".to_string(),
            acquired_ms: 42,
        };
        assert_eq!(LockHolder::decode(&holder.encode()), Some(holder));
        assert_eq!(LockHolder::decode("garbage"), None);
    }

    #[test]
    fn test_mem_lock_exclusive_until_unlock() {
        let timer = Arc::new(MockTimer::new(10_000));
        let manager = MemLockManager::new(timer);
        let a = manager.create_named_lock("purge");
        let b = manager.create_named_lock("purge");

        assert!(a.lock_timed_wait_steal_old(WAIT, STEAL));
        assert!(a.held());
        assert!(!b.lock_timed_wait_steal_old(WAIT, STEAL));
        assert!(!b.held());

        a.unlock();
        assert!(!a.held());
        assert!(b.lock_timed_wait_steal_old(WAIT, STEAL));
    }

    #[test]
    fn test_mem_lock_stolen_after_threshold() {
        let timer = Arc::new(MockTimer::new(10_000));
        let manager = MemLockManager::new(timer.clone());
        let a = manager.create_named_lock("purge");
        let b = manager.create_named_lock("purge");

        assert!(a.lock_timed_wait_steal_old(WAIT, STEAL));
        timer.advance_ms(2_000);
        assert!(b.lock_timed_wait_steal_old(WAIT, STEAL));
        assert!(b.held());
        assert!(!a.held());

        // The previous holder's unlock leaves the new holder in place
        a.unlock();
        assert!(b.held());
        assert_eq!(manager.holder("purge").unwrap().acquired_ms, 12_000);
    }

    #[test]
    fn test_mem_lock_waiter_wakes_on_unlock() {
        let timer = Arc::new(MockTimer::new(0));
        let manager = MemLockManager::new(timer);
        let a = manager.create_named_lock("purge");
        assert!(a.lock_timed_wait_steal_old(WAIT, STEAL));

        let waiter = {
            let manager = manager.clone();
            std::thread::spawn(move || {
                let b = manager.create_named_lock("purge");
                b.lock_timed_wait_steal_old(Duration::from_secs(5), STEAL)
            })
        };
        std::thread::sleep(Duration::from_millis(30));
        a.unlock();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_file_lock_exclusive_and_steal() {
        let tmp = TempDir::new().unwrap();
        let timer = Arc::new(MockTimer::new(50_000));
        let manager = FileLockManager::new(tmp.path().join("locks"), timer.clone());
        let a = manager.create_named_lock("cache.purge");
        let b = manager.create_named_lock("cache.purge");

        assert!(a.lock_timed_wait_steal_old(WAIT, STEAL));
        assert!(tmp.path().join("locks/cache.purge.lock").exists());
        assert!(!b.lock_timed_wait_steal_old(WAIT, STEAL));

        timer.advance_ms(2_500);
        assert!(b.lock_timed_wait_steal_old(WAIT, STEAL));
        assert!(b.held());
        assert!(!a.held());

        a.unlock();
        assert!(b.held());
        b.unlock();
        assert!(!tmp.path().join("locks/cache.purge.lock").exists());
    }

    #[test]
    fn test_file_lock_corrupt_record_is_stealable() {
        let tmp = TempDir::new().unwrap();
        let timer = Arc::new(MockTimer::new(50_000));
        std::fs::write(tmp.path().join("purge.lock"), "not a record").unwrap();
        let manager = FileLockManager::new(tmp.path(), timer);
        let lock = manager.create_named_lock("purge");
        assert!(lock.lock_timed_wait_steal_old(WAIT, STEAL));
    }

    #[test]
    fn test_lock_names_are_sanitized() {
        assert_eq!(sanitize_lock_name("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_lock_name("cache.purge"), "cache.purge");
    }
}
