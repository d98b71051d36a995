//! Stale-connection detection from consecutive decode failures.
//!
//! Only byte-level decode failures feed this tracker. Records that decode but
//! fail to parse say nothing about the link and are ignored here.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

/// Result of recording one decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Failures have not yet outlasted the timeout.
    Degraded,
    /// Failures have persisted longer than the timeout.
    Stale,
}

/// Tracks decode failures since the last successful parse.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    timeout: Duration,
    consecutive_failures: u64,
    first_failure_at: Option<Instant>,
}

impl ConnectionState {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            consecutive_failures: 0,
            first_failure_at: None,
        }
    }

    /// Record an undecodable line observed at `now`.
    pub fn record_decode_failure(&mut self, now: Instant) -> LinkHealth {
        self.consecutive_failures += 1;
        let Some(first) = self.first_failure_at else {
            self.first_failure_at = Some(now);
            return LinkHealth::Degraded;
        };
        if now.saturating_duration_since(first) > self.timeout {
            LinkHealth::Stale
        } else {
            LinkHealth::Degraded
        }
    }

    /// Clear all failure state after a successful parse.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.first_failure_at = None;
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures
    }

    pub fn first_failure_at(&self) -> Option<Instant> {
        self.first_failure_at
    }
}
