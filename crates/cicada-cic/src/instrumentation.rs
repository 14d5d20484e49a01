//! Protocol instrumentation.
//!
//! Process-wide counters updated by every manager. Counters only grow;
//! read them through [`Metrics::snapshot`].
//!
//! ```ignore
//! use cicada_cic::instrumentation::METRICS;
//!
//! let before = METRICS.snapshot();
//! // ... serve requests ...
//! let taken = METRICS.snapshot().checkpoints_taken - before.checkpoints_taken;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance for the checkpointing protocol.
pub static METRICS: Metrics = Metrics::new();

#[derive(Debug)]
pub struct Metrics {
    checkpoints_taken: AtomicU64,
    /// Checkpoints abandoned because the storage server was unreachable
    checkpoint_failures: AtomicU64,
    history_commits: AtomicU64,
    requests_logged: AtomicU64,
    replies_logged: AtomicU64,
    /// Messages sent again after a RESEND answer
    resends: AtomicU64,
    recoveries: AtomicU64,
    orphans_tagged: AtomicU64,
    output_commits: AtomicU64,
    /// Collaborator failures that were logged and skipped
    transport_failures: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub checkpoints_taken: u64,
    pub checkpoint_failures: u64,
    pub history_commits: u64,
    pub requests_logged: u64,
    pub replies_logged: u64,
    pub resends: u64,
    pub recoveries: u64,
    pub orphans_tagged: u64,
    pub output_commits: u64,
    pub transport_failures: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            checkpoints_taken: AtomicU64::new(0),
            checkpoint_failures: AtomicU64::new(0),
            history_commits: AtomicU64::new(0),
            requests_logged: AtomicU64::new(0),
            replies_logged: AtomicU64::new(0),
            resends: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            orphans_tagged: AtomicU64::new(0),
            output_commits: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
        }
    }

    pub fn increment_checkpoints_taken(&self) {
        self.checkpoints_taken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoint_failures(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_history_commits(&self) {
        self.history_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_logged(&self) {
        self.requests_logged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replies_logged(&self) {
        self.replies_logged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_resends(&self) {
        self.resends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_recoveries(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_orphans_tagged(&self) {
        self.orphans_tagged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_output_commits(&self) {
        self.output_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_transport_failures(&self) {
        self.transport_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checkpoints_taken: self.checkpoints_taken.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            history_commits: self.history_commits.load(Ordering::Relaxed),
            requests_logged: self.requests_logged.load(Ordering::Relaxed),
            replies_logged: self.replies_logged.load(Ordering::Relaxed),
            resends: self.resends.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            orphans_tagged: self.orphans_tagged.load(Ordering::Relaxed),
            output_commits: self.output_commits.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_metrics_count_independently() {
        let metrics = Metrics::new();
        metrics.increment_checkpoints_taken();
        metrics.increment_checkpoints_taken();
        metrics.increment_resends();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.checkpoints_taken, 2);
        assert_eq!(snapshot.resends, 1);
        assert_eq!(snapshot.recoveries, 0);
    }
}
