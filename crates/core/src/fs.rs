//! File-system capability
//!
//! Writers that share a file with other processes go through
//! [`FileSystem::write_file_atomic`]: the bytes land in a temporary file in
//! the same directory, which is then renamed over the target. Readers never
//! observe a partially written file.

use crate::timer::Timer;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Minimal file operations the purge log needs
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Read a whole file
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write `contents` to a fresh temporary file next to `target` and return
    /// its path
    fn write_temp_file(&self, target: &Path, contents: &[u8]) -> Result<PathBuf>;

    /// Rename `from` to `to`, replacing `to` if it exists
    fn rename_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// Remove a file
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Last modification time in milliseconds since the epoch
    fn mtime_ms(&self, path: &Path) -> Result<i64>;

    /// Atomically replace `path` with `contents`
    fn write_file_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let temp = self.write_temp_file(path, contents)?;
        if let Err(e) = self.rename_file(&temp, path) {
            let _ = self.remove_file(&temp);
            return Err(e);
        }
        Ok(())
    }
}

/// File system backed by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| Error::io(e, path, "read"))
    }

    fn write_temp_file(&self, target: &Path, contents: &[u8]) -> Result<PathBuf> {
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| Error::io(e, dir, "create_dir_all"))?;

        let file_name = target
            .file_name()
            .map_or_else(|| "recache".to_string(), |n| n.to_string_lossy().into_owned());
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| Error::io(e, dir, "create_temp"))?;
        temp.write_all(contents)
            .map_err(|e| Error::io(e, temp.path(), "write"))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, temp.path(), "sync"))?;
        temp.into_temp_path()
            .keep()
            .map_err(|e| Error::io(e.error, dir, "persist_temp"))
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).map_err(|e| Error::io(e, to, "rename"))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::io(e, path, "remove_file"))
    }

    fn mtime_ms(&self, path: &Path) -> Result<i64> {
        let modified = fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::io(e, path, "metadata"))?;
        Ok(DateTime::<Utc>::from(modified).timestamp_millis())
    }
}

#[derive(Debug, Clone)]
struct MemFile {
    contents: Vec<u8>,
    mtime_ms: i64,
}

/// In-memory file system for tests and single-process deployments
#[derive(Debug)]
pub struct MemFileSystem {
    files: Mutex<HashMap<PathBuf, MemFile>>,
    timer: Arc<dyn Timer>,
    temp_counter: AtomicU64,
    reads: AtomicUsize,
    fail_writes: Mutex<bool>,
}

impl MemFileSystem {
    /// Create an empty file system stamping mtimes from `timer`
    #[must_use]
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            files: Mutex::new(HashMap::new()),
            timer,
            temp_counter: AtomicU64::new(0),
            reads: AtomicUsize::new(0),
            fail_writes: Mutex::new(false),
        }
    }

    /// Replace a file's contents directly, as another process would
    pub fn write_file(&self, path: &Path, contents: &[u8]) {
        let mtime_ms = self.timer.now_ms();
        self.files.lock().insert(
            path.to_path_buf(),
            MemFile {
                contents: contents.to_vec(),
                mtime_ms,
            },
        );
    }

    /// Current contents of a file, without counting as a read
    #[must_use]
    pub fn contents(&self, path: &Path) -> Option<Vec<u8>> {
        self.files.lock().get(path).map(|f| f.contents.clone())
    }

    /// Number of `read_file` calls so far
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make subsequent temp-file writes fail with an I/O error
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    /// Paths of all files currently stored
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl FileSystem for MemFileSystem {
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .get(path)
            .map(|f| f.contents.clone())
            .ok_or_else(|| {
                Error::io(
                    std::io::Error::from(std::io::ErrorKind::NotFound),
                    path,
                    "read",
                )
            })
    }

    fn write_temp_file(&self, target: &Path, contents: &[u8]) -> Result<PathBuf> {
        if *self.fail_writes.lock() {
            return Err(Error::io(
                std::io::Error::other("injected write failure"),
                target,
                "write",
            ));
        }
        let n = self.temp_counter.fetch_add(1, Ordering::SeqCst);
        let mut name = target.as_os_str().to_os_string();
        name.push(format!(".{n}.tmp"));
        let temp = PathBuf::from(name);
        self.write_file(&temp, contents);
        Ok(temp)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> Result<()> {
        let mut files = self.files.lock();
        let file = files.remove(from).ok_or_else(|| {
            Error::io(
                std::io::Error::from(std::io::ErrorKind::NotFound),
                from,
                "rename",
            )
        })?;
        files.insert(to.to_path_buf(), file);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        self.files.lock().remove(path).map(|_| ()).ok_or_else(|| {
            Error::io(
                std::io::Error::from(std::io::ErrorKind::NotFound),
                path,
                "remove_file",
            )
        })
    }

    fn mtime_ms(&self, path: &Path) -> Result<i64> {
        self.files.lock().get(path).map(|f| f.mtime_ms).ok_or_else(|| {
            Error::io(
                std::io::Error::from(std::io::ErrorKind::NotFound),
                path,
                "metadata",
            )
        })
    }
}
