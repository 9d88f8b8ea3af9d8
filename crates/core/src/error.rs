//! Error types for recache capability boundaries

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for capability and configuration operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error during a file-system operation
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(recache::core::io),
        help("Check file permissions and ensure the directory exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "rename")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    #[diagnostic(code(recache::core::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(code(recache::core::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Named lock could not be acquired or released
    #[error("Lock {name} unavailable: {message}")]
    #[diagnostic(
        code(recache::core::lock),
        help("Another process may hold the lock; it is stolen once it ages past the steal threshold")
    )]
    Lock {
        /// Name of the lock
        name: String,
        /// What went wrong
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a lock error
    #[must_use]
    pub fn lock(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Lock {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// True when this is an I/O error for a file that does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Result type for capability operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/tmp/cache.purge",
            "write",
        );
        assert_eq!(err.to_string(), "I/O write failed: /tmp/cache.purge");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_is_not_found() {
        let err = Error::io_no_path(
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
            "read",
        );
        assert!(err.is_not_found());
        assert!(!Error::configuration("x").is_not_found());
    }

    #[test]
    fn test_lock_error_display() {
        let err = Error::lock("cache.purge", "timed out");
        assert_eq!(err.to_string(), "Lock cache.purge unavailable: timed out");
    }
}
