//! Engine Statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the router and both dispatch backends
#[derive(Debug, Default)]
pub struct EngineStats {
    pub delivered: AtomicU64,
    pub handler_failures: AtomicU64,
    /// Two workers inside one mailbox; never expected
    pub reentrancy_violations: AtomicU64,
    /// Envelopes discarded because their mailbox closed first
    pub dropped: AtomicU64,
}

impl EngineStats {
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reentrancy(&self) {
        self.reentrancy_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            reentrancy_violations: self.reentrancy_violations.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub handler_failures: u64,
    pub reentrancy_violations: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = EngineStats::default();
        stats.record_delivered();
        stats.record_delivered();
        stats.record_failure();
        stats.record_dropped(0);
        stats.record_dropped(3);

        let snap = stats.snapshot();
        assert_eq!(snap.delivered, 2);
        assert_eq!(snap.handler_failures, 1);
        assert_eq!(snap.reentrancy_violations, 0);
        assert_eq!(snap.dropped, 3);
    }
}
