//! Error types for the cache crate

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Error type for cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A stored value could not be encoded or decoded
    #[error("Serialization error: {message}")]
    #[diagnostic(code(recache::cache::serialization))]
    Serialization {
        /// Error message describing the serialization issue
        message: String,
    },

    /// Value does not fit the tier it was written to
    #[error("Value of {size} bytes for {key} exceeds the {limit} byte limit")]
    #[diagnostic(
        code(recache::cache::too_large),
        help("Raise the tier's byte budget or route large values to another tier")
    )]
    ValueTooLarge {
        /// The key being written
        key: String,
        /// Size of the value in bytes
        size: usize,
        /// Largest value the tier accepts
        limit: usize,
    },

}

impl Error {
    /// Create a serialization error
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a value-too-large error
    #[must_use]
    pub fn value_too_large(key: impl Into<String>, size: usize, limit: usize) -> Self {
        Self::ValueTooLarge {
            key: key.into(),
            size,
            limit,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, Error>;
