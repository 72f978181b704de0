//! In-process counters for the query gate.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts validation and execution outcomes.
#[derive(Debug, Default)]
pub struct GuardMetrics {
    /// Validation attempts, accepted or not
    validated: AtomicU64,
    /// Attempts rejected with at least one error
    blocked: AtomicU64,
    /// Accepted attempts that carried warnings
    warned: AtomicU64,
    /// Queries that reached the backend and returned
    executed: AtomicU64,
    /// Queries cut off by the execution timeout
    timed_out: AtomicU64,
    /// Backend failures other than timeouts
    failed: AtomicU64,
}

impl GuardMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_validation(&self, valid: bool, warnings: usize) {
        self.validated.fetch_add(1, Ordering::Relaxed);
        if !valid {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        } else if warnings > 0 {
            self.warned.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_execution(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GuardStats {
        GuardStats {
            validated: self.validated.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            warned: self.warned.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.validated.store(0, Ordering::Relaxed);
        self.blocked.store(0, Ordering::Relaxed);
        self.warned.store(0, Ordering::Relaxed);
        self.executed.store(0, Ordering::Relaxed);
        self.timed_out.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`GuardMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardStats {
    pub validated: u64,
    pub blocked: u64,
    pub warned: u64,
    pub executed: u64,
    pub timed_out: u64,
    pub failed: u64,
}

impl GuardStats {
    /// Percentage of validation attempts that were rejected.
    pub fn block_rate(&self) -> f64 {
        if self.validated == 0 {
            0.0
        } else {
            (self.blocked as f64 / self.validated as f64) * 100.0
        }
    }
}
