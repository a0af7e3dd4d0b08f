//! Time sources for buckets.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A source of "now" in nanoseconds.
pub trait TimeMeter: Send + Sync + fmt::Debug {
    /// Current instant in nanoseconds.
    fn now_nanos(&self) -> u64;

    /// Whether [`now_nanos`](Self::now_nanos) counts from the Unix epoch.
    fn is_wall_clock_based(&self) -> bool;
}

/// Wall clock with millisecond resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMillis;

impl TimeMeter for SystemMillis {
    fn now_nanos(&self) -> u64 {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        millis.saturating_mul(1_000_000)
    }

    fn is_wall_clock_based(&self) -> bool {
        true
    }
}

/// Monotonic clock with nanosecond resolution, counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemNanotime {
    origin: Instant,
}

impl SystemNanotime {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemNanotime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeMeter for SystemNanotime {
    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn is_wall_clock_based(&self) -> bool {
        false
    }
}

/// A clock that only moves when told to. Useful in tests.
///
/// Cloning shares the underlying instant.
#[derive(Debug, Clone)]
pub struct ManualTimeMeter {
    nanos: Arc<AtomicU64>,
    wall_clock: bool,
}

impl ManualTimeMeter {
    /// Create a clock starting at `nanos` that reports itself as not wall-clock based.
    pub fn new(nanos: u64) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(nanos)),
            wall_clock: false,
        }
    }

    /// Create a clock starting at `nanos` that claims to be a wall clock.
    pub fn wall_clock(nanos: u64) -> Self {
        Self {
            nanos: Arc::new(AtomicU64::new(nanos)),
            wall_clock: true,
        }
    }

    pub fn set_nanos(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.advance_nanos(by);
    }

    pub fn advance_nanos(&self, by: u64) {
        self.nanos.fetch_add(by, Ordering::SeqCst);
    }
}

impl TimeMeter for ManualTimeMeter {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }

    fn is_wall_clock_based(&self) -> bool {
        self.wall_clock
    }
}
