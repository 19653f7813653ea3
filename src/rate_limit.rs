//! Update cadence control.
//!
//! A lock session accepts at most one smoothing update per interval, whichever
//! producer (camera or IMU) gets there first. Everything in between is absorbed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time source for the rate limiter, in wall-clock milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Hand-driven clock for tests and trace replay. Clones share the same time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Minimum-interval gate.
///
/// The first attempt always passes. A wall clock that steps backwards is
/// treated as a fresh start rather than blocking until it catches up.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    interval_ms: u64,
    last_accepted_ms: Option<u64>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_accepted_ms: None,
        }
    }

    /// Returns true and records `now_ms` when the interval has elapsed.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        let ready = match self.last_accepted_ms {
            None => true,
            Some(last) if now_ms < last => true,
            Some(last) => now_ms - last >= self.interval_ms,
        };
        if ready {
            self.last_accepted_ms = Some(now_ms);
        }
        ready
    }

    pub fn last_accepted_ms(&self) -> Option<u64> {
        self.last_accepted_ms
    }
}
