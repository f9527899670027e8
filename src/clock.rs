//! Wall-clock sources.
//!
//! Token expiry is expressed in Unix seconds, so every component that
//! compares against `exp` reads time through [`Clock`] rather than calling
//! the system clock directly.

use std::fmt::Debug;
use std::sync::Arc;

/// Source of the current wall-clock time in Unix epoch milliseconds.
pub trait Clock: Debug + Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Reads the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Wall clock anchored at construction and advanced by `tokio::time::Instant`.
///
/// Under a paused tokio runtime `tokio::time::advance` moves this clock too,
/// which keeps expiry arithmetic and timers on the same timeline.
#[derive(Debug, Clone)]
pub struct TokioClock {
    anchor_ms: i64,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(chrono::Utc::now().timestamp_millis())
    }

    /// Anchor the clock at an explicit wall-clock time.
    pub fn anchored_at(anchor_ms: i64) -> Self {
        Self {
            anchor_ms,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> i64 {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.anchor);
        self.anchor_ms + elapsed.as_millis() as i64
    }
}
