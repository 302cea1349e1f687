//! Engine statistics
//!
//! Lock-free counters recorded on every interesting state transition.
//! These are plain observability counters; exposition (Prometheus, logs,
//! dashboards) is the embedding system's concern.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Statistics for the read-ahead engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Extents created (fresh insertions into the global index)
    pub extents_created: AtomicU64,

    /// Lookups that coalesced onto an already-live extent
    pub extents_coalesced: AtomicU64,

    /// Extents fully torn down (refcount reached zero)
    pub extents_released: AtomicU64,

    /// Zones created across all devices
    pub zones_created: AtomicU64,

    /// Zones torn down across all devices
    pub zones_released: AtomicU64,

    /// Reads handed to the block reader
    pub reads_submitted: AtomicU64,

    /// Reads that completed successfully
    pub reads_completed: AtomicU64,

    /// Reads that failed (I/O error or invalid block)
    pub reads_failed: AtomicU64,

    /// Internal nodes expanded by the completion hook
    pub nodes_expanded: AtomicU64,

    /// Child blocks enqueued during expansion
    pub children_enqueued: AtomicU64,

    /// Branches dropped because of a stale generation
    pub branches_pruned: AtomicU64,

    /// Branches dropped because no mirror could be resolved
    pub children_unresolvable: AtomicU64,

    /// Prefetch requests started
    pub controls_started: AtomicU64,

    /// Prefetch requests that ran to completion
    pub controls_completed: AtomicU64,

    /// Synchronous dispatch passes run
    pub dispatch_passes: AtomicU64,

    /// Overflow passes scheduled onto background tasks
    pub background_passes: AtomicU64,
}

impl EngineStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one completed read.
    pub fn record_read_done(&self, ok: bool) {
        if ok {
            self.reads_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reads_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            extents_created: self.extents_created.load(Ordering::Relaxed),
            extents_coalesced: self.extents_coalesced.load(Ordering::Relaxed),
            extents_released: self.extents_released.load(Ordering::Relaxed),
            zones_created: self.zones_created.load(Ordering::Relaxed),
            zones_released: self.zones_released.load(Ordering::Relaxed),
            reads_submitted: self.reads_submitted.load(Ordering::Relaxed),
            reads_completed: self.reads_completed.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            nodes_expanded: self.nodes_expanded.load(Ordering::Relaxed),
            children_enqueued: self.children_enqueued.load(Ordering::Relaxed),
            branches_pruned: self.branches_pruned.load(Ordering::Relaxed),
            children_unresolvable: self.children_unresolvable.load(Ordering::Relaxed),
            controls_started: self.controls_started.load(Ordering::Relaxed),
            controls_completed: self.controls_completed.load(Ordering::Relaxed),
            dispatch_passes: self.dispatch_passes.load(Ordering::Relaxed),
            background_passes: self.background_passes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    pub extents_created: u64,
    pub extents_coalesced: u64,
    pub extents_released: u64,
    pub zones_created: u64,
    pub zones_released: u64,
    pub reads_submitted: u64,
    pub reads_completed: u64,
    pub reads_failed: u64,
    pub nodes_expanded: u64,
    pub children_enqueued: u64,
    pub branches_pruned: u64,
    pub children_unresolvable: u64,
    pub controls_started: u64,
    pub controls_completed: u64,
    pub dispatch_passes: u64,
    pub background_passes: u64,
}

impl EngineStatsSnapshot {
    /// Fraction of lookups satisfied by an already-live extent.
    pub fn coalesce_rate(&self) -> f64 {
        let total = self.extents_created + self.extents_coalesced;
        if total == 0 {
            0.0
        } else {
            self.extents_coalesced as f64 / total as f64
        }
    }

    /// Reads still outstanding according to the counters.
    pub fn reads_outstanding(&self) -> u64 {
        self.reads_submitted
            .saturating_sub(self.reads_completed + self.reads_failed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_recording() {
        let stats = EngineStats::default();

        EngineStats::bump(&stats.extents_created);
        EngineStats::bump(&stats.extents_coalesced);
        EngineStats::bump(&stats.reads_submitted);
        stats.record_read_done(true);
        EngineStats::bump(&stats.reads_submitted);
        stats.record_read_done(false);

        let snap = stats.snapshot();
        assert_eq!(snap.extents_created, 1);
        assert_eq!(snap.extents_coalesced, 1);
        assert_eq!(snap.reads_submitted, 2);
        assert_eq!(snap.reads_completed, 1);
        assert_eq!(snap.reads_failed, 1);
        assert_eq!(snap.reads_outstanding(), 0);
    }

    #[test]
    fn test_coalesce_rate() {
        let stats = EngineStats::default();
        assert_eq!(stats.snapshot().coalesce_rate(), 0.0);

        EngineStats::bump(&stats.extents_created);
        EngineStats::bump(&stats.extents_coalesced);
        assert_eq!(stats.snapshot().coalesce_rate(), 0.5);
    }
}
