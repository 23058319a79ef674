//! Two-tier sliding rate window.
//!
//! The sustained window holds at most `rate_limit` call times over the last
//! second; once it is full, calls overflow into the burst window (at most
//! `burst_limit` over the last ten seconds). A call is admitted while either
//! window has room, so pacing only blocks when both are saturated. Each
//! window expires its own entries independently.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DispatchConfig;

#[derive(Debug)]
pub struct RateWindow {
    sustained: VecDeque<Instant>,
    burst: VecDeque<Instant>,
    rate_limit: usize,
    burst_limit: usize,
    sustained_horizon: Duration,
    burst_horizon: Duration,
}

impl RateWindow {
    pub fn new(config: &DispatchConfig) -> Self {
        Self {
            sustained: VecDeque::new(),
            burst: VecDeque::new(),
            rate_limit: config.rate_limit.max(1),
            burst_limit: config.burst_limit,
            sustained_horizon: config.sustained_window(),
            burst_horizon: config.burst_window(),
        }
    }

    /// Drop entries that have aged out of their own window.
    fn purge(&mut self, now: Instant) {
        expire(&mut self.sustained, now, self.sustained_horizon);
        expire(&mut self.burst, now, self.burst_horizon);
    }

    /// How long until a call may be issued. `Duration::ZERO` means now.
    pub fn time_until_admitted(&mut self, now: Instant) -> Duration {
        self.purge(now);

        if self.sustained.len() < self.rate_limit || self.burst.len() < self.burst_limit {
            return Duration::ZERO;
        }

        let sustained_free = self
            .sustained
            .front()
            .map(|t| (*t + self.sustained_horizon).saturating_duration_since(now));
        let burst_free = self
            .burst
            .front()
            .map(|t| (*t + self.burst_horizon).saturating_duration_since(now));

        match (sustained_free, burst_free) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => Duration::ZERO,
        }
    }

    /// Record an issued call: sustained window first, burst on overflow.
    pub fn record(&mut self, now: Instant) {
        self.purge(now);

        if self.sustained.len() < self.rate_limit {
            self.sustained.push_back(now);
        } else {
            self.burst.push_back(now);
            while self.burst.len() > self.burst_limit {
                self.burst.pop_front();
            }
        }
    }

    pub fn sustained_len(&self) -> usize {
        self.sustained.len()
    }

    pub fn burst_len(&self) -> usize {
        self.burst.len()
    }
}

fn expire(window: &mut VecDeque<Instant>, now: Instant, horizon: Duration) {
    while let Some(oldest) = window.front() {
        if now.saturating_duration_since(*oldest) >= horizon {
            window.pop_front();
        } else {
            break;
        }
    }
}
