//! Call counters for the dispatcher.
//!
//! Two scopes are tracked: since the dispatcher was created, and since the
//! last explicit pacing reset. "Attempted" counts every call issued
//! (including throttled retries); "succeeded" counts calls the remote did
//! not throttle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Snapshot of the counters for one scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub elapsed: Duration,
}

impl CallStats {
    fn per_minute(&self, count: u64) -> f64 {
        let minutes = self.elapsed.as_secs_f64() / 60.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        count as f64 / minutes
    }

    pub fn attempted_per_minute(&self) -> f64 {
        self.per_minute(self.attempted)
    }

    pub fn succeeded_per_minute(&self) -> f64 {
        self.per_minute(self.succeeded)
    }

    /// Share of attempts that were not throttled, in percent.
    pub fn success_percent(&self) -> f64 {
        if self.attempted == 0 {
            return 100.0;
        }
        self.succeeded as f64 / self.attempted as f64 * 100.0
    }

    pub fn failed_attempts(&self) -> u64 {
        self.attempted.saturating_sub(self.succeeded)
    }
}

#[derive(Debug)]
pub struct DispatchMetrics {
    started: Instant,
    attempted: AtomicU64,
    succeeded: AtomicU64,
    pacing_started: Mutex<Instant>,
    pacing_attempted: AtomicU64,
    pacing_succeeded: AtomicU64,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        let now = Instant::now();
        Self {
            started: now,
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            pacing_started: Mutex::new(now),
            pacing_attempted: AtomicU64::new(0),
            pacing_succeeded: AtomicU64::new(0),
        }
    }
}

impl DispatchMetrics {
    pub(crate) fn record_attempt(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
        self.pacing_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.pacing_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Restart the pacing scope at zero.
    pub fn reset_pacing(&self) {
        let mut started = self
            .pacing_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *started = Instant::now();
        self.pacing_attempted.store(0, Ordering::Relaxed);
        self.pacing_succeeded.store(0, Ordering::Relaxed);
    }

    pub fn lifetime(&self) -> CallStats {
        CallStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }

    pub fn since_pacing_reset(&self) -> CallStats {
        let started = *self
            .pacing_started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        CallStats {
            attempted: self.pacing_attempted.load(Ordering::Relaxed),
            succeeded: self.pacing_succeeded.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
        }
    }
}
