//! Text encoding of a [`PurgeSet`]
//!
//! ```text
//! <global_invalidation_timestamp_ms>
//! <timestamp_ms> <url>
//! <timestamp_ms> <url>
//! ```
//!
//! Records are written oldest first so that re-reading a file reproduces
//! the eviction order.

use crate::purge_set::{PurgeSet, check_timestamp};
use crate::{Error, Result};
use std::fmt::Write as _;
use tracing::warn;

fn parse_timestamp(line: usize, text: &str, now_ms: i64) -> Result<i64> {
    let timestamp_ms: i64 = text
        .trim()
        .parse()
        .map_err(|e| Error::parse(line, format!("bad timestamp {text:?}: {e}")))?;
    check_timestamp(timestamp_ms, now_ms)?;
    Ok(timestamp_ms)
}

fn parse_record(line: usize, text: &str, now_ms: i64) -> Result<(i64, &str)> {
    let (timestamp, url) = text
        .split_once(' ')
        .ok_or_else(|| Error::parse(line, "missing space between timestamp and url"))?;
    if url.is_empty() {
        return Err(Error::parse(line, "empty url"));
    }
    Ok((parse_timestamp(line, timestamp, now_ms)?, url))
}

/// Parse purge file contents
///
/// Returns the set and the number of lines that could not be parsed. Bad
/// lines are logged and skipped; an empty file is an empty set.
#[must_use]
pub fn parse_purge_file(text: &str, now_ms: i64, max_bytes: usize) -> (PurgeSet, usize) {
    let mut set = PurgeSet::new(max_bytes);
    let mut failures = 0usize;
    let mut lines = text.lines().enumerate();

    match lines.next() {
        None => return (set, 0),
        Some((_, first)) if first.trim().is_empty() => {}
        Some((_, first)) => match parse_timestamp(1, first, now_ms) {
            Ok(global) => set.update_global_invalidation_timestamp_ms(global),
            Err(e) => {
                warn!(error = %e, "Ignoring global invalidation timestamp");
                failures += 1;
            }
        },
    }

    for (index, line) in lines {
        if line.is_empty() {
            continue;
        }
        match parse_record(index + 1, line, now_ms) {
            Ok((timestamp_ms, url)) => set.put(url, timestamp_ms),
            Err(e) => {
                warn!(error = %e, "Skipping purge record");
                failures += 1;
            }
        }
    }
    (set, failures)
}

/// Render a set in purge file format
#[must_use]
pub fn serialize_purge_set(set: &PurgeSet) -> String {
    let mut out = String::with_capacity(set.byte_size() + 32);
    let _ = writeln!(out, "{}", set.global_invalidation_timestamp_ms());
    for (url, timestamp_ms) in set.iter() {
        let _ = writeln!(out, "{timestamp_ms} {url}");
    }
    out
}
