//! Millisecond clocks

use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Milliseconds in a second
pub const SECOND_MS: i64 = 1_000;
/// Milliseconds in a minute
pub const MINUTE_MS: i64 = 60 * SECOND_MS;

/// Source of wall-clock time in milliseconds since the Unix epoch
pub trait Timer: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the epoch
    fn now_ms(&self) -> i64;
}

/// Timer backed by the system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimer;

impl Timer for SystemTimer {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven timer for tests and simulations
#[derive(Debug, Default)]
pub struct MockTimer {
    now_ms: AtomicI64,
}

impl MockTimer {
    /// Create a timer frozen at `start_ms`
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    /// Jump to an absolute time
    pub fn set_time_ms(&self, ms: i64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }

    /// Move the clock forward by `delta_ms`
    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Move the clock forward by a duration
    pub fn advance(&self, delta: Duration) {
        self.advance_ms(i64::try_from(delta.as_millis()).unwrap_or(i64::MAX));
    }
}

impl Timer for MockTimer {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
