//! Error types for the purge log

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while reading or applying purges
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A line of the purge file could not be parsed
    #[error("Malformed purge file line {line}: {message}")]
    #[diagnostic(
        code(recache::purge::parse),
        help("Each line after the first must be `<timestamp_ms> <url>`")
    )]
    Parse {
        /// One-based line number
        line: usize,
        /// What was wrong with it
        message: String,
    },

    /// A timestamp is negative or too far in the future
    #[error("Timestamp {timestamp_ms} is out of range (now is {now_ms})")]
    #[diagnostic(
        code(recache::purge::timestamp),
        help("Purge timestamps are milliseconds since the Unix epoch")
    )]
    Timestamp {
        /// The rejected timestamp
        timestamp_ms: i64,
        /// Clock reading it was checked against
        now_ms: i64,
    },

    /// A purge batch did not reach the purge file
    #[error("Purge batch failed: {message}")]
    #[diagnostic(code(recache::purge::batch))]
    Batch {
        /// Why the batch failed
        message: String,
    },

    /// A URL cannot be recorded as one purge file line
    #[error("URL {url:?} cannot be recorded in the purge file")]
    #[diagnostic(
        code(recache::purge::url),
        help("Purged URLs must be non-empty and must not contain line breaks")
    )]
    Url {
        /// The rejected URL
        url: String,
    },
}

impl Error {
    /// Create a parse error for a one-based line number
    #[must_use]
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Create an out-of-range timestamp error
    #[must_use]
    pub const fn timestamp(timestamp_ms: i64, now_ms: i64) -> Self {
        Self::Timestamp {
            timestamp_ms,
            now_ms,
        }
    }

    /// Create an unrecordable-URL error
    #[must_use]
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    /// Create a failed-batch error
    #[must_use]
    pub fn batch(message: impl Into<String>) -> Self {
        Self::Batch {
            message: message.into(),
        }
    }
}

/// Result type for purge operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = Error::parse(3, "missing space");
        assert_eq!(err.to_string(), "Malformed purge file line 3: missing space");
    }

    #[test]
    fn test_url_error_escapes_line_breaks() {
        let err = Error::url("http://a/\nx");
        assert_eq!(
            err.to_string(),
            "URL \"http://a/\\nx\" cannot be recorded in the purge file"
        );
    }
}
