//! Shared foundations for the recache crates
//!
//! This crate holds the pieces every other recache crate leans on:
//! - The error type and `Result` alias used at capability boundaries
//! - Workspace configuration (`Config`) loaded from TOML
//! - The capability contracts the cache and purge layers require from their
//!   environment: [`Timer`], [`FileSystem`], [`NamedLockManager`]
//! - An injectable [`Statistics`] registry for operational counters
//!
//! Reference implementations of each capability are provided so the
//! higher layers can run for real (`SystemTimer`, `StdFileSystem`,
//! `FileLockManager`) or under test (`MockTimer`, `MemFileSystem`,
//! `MemLockManager`).

#![expect(
    clippy::missing_errors_doc,
    reason = "Errors are described on the Error enum variants"
)]

pub mod config;
mod error;
pub mod fs;
pub mod lock;
pub mod stats;
pub mod timer;

pub use config::{Config, HttpCacheConfig, PurgeConfig, WorkerPoolConfig};
pub use error::{Error, Result};
pub use fs::{FileSystem, MemFileSystem, StdFileSystem};
pub use lock::{
    Claim, FileLockManager, LockHolder, MemLockManager, NamedLock, NamedLockManager, claim,
};
pub use stats::{Statistics, Variable};
pub use timer::{MockTimer, SystemTimer, Timer};
