//! Global extent index: deduplication and ownership of read-ahead units
//!
//! The index guarantees at most one live extent per logical address
//! system-wide, so overlapping prefetch requests coalesce onto one read.
//! All logical reference-count transitions on extents go through here: the
//! decrement that reaches zero and the removal from the index happen under
//! one lock, so no lookup can observe a half-torn-down extent.
//!
//! Mirror resolution runs *outside* the index lock; a creation that loses
//! the resulting race unwinds its zone memberships and adopts the winner.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::extent::Extent;
use crate::ports::BlockMap;
use crate::scheduler::Scheduler;
use crate::stats::EngineStats;
use crate::types::{DeviceId, Key, MAX_MIRRORS};

/// Global dedup index over every in-flight read-ahead unit.
#[derive(Debug, Default)]
pub struct ExtentIndex {
    extents: Mutex<HashMap<u64, Arc<Extent>>>,
}

impl ExtentIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of live extents.
    pub fn live(&self) -> usize {
        self.extents.lock().len()
    }

    /// Look up the extent at `logical`, or create it with freshly resolved
    /// mirrors. The returned extent carries one reference owned by the
    /// caller.
    ///
    /// Fails with [`Error::Unresolvable`] when no eligible mirror exists
    /// (address unmapped, or every mirror device unknown or quiesced).
    pub(crate) fn find_or_create(
        &self,
        sched: &Scheduler,
        map: &dyn BlockMap,
        logical: u64,
        top: Key,
        owner_root: u64,
        level: u8,
        stats: &EngineStats,
    ) -> Result<Arc<Extent>> {
        if let Some(existing) = self.find_and_hold(logical) {
            EngineStats::bump(&stats.extents_coalesced);
            trace!(logical, "coalesced onto live extent");
            return Ok(existing);
        }

        // Resolve placement without holding the index lock
        let mapped = map.map(logical)?;
        let mut eligible: Vec<DeviceId> = mapped
            .mirrors
            .iter()
            .copied()
            .filter(|id| sched.device(*id).map_or(false, |dev| !dev.is_quiesced()))
            .collect();
        eligible.truncate(MAX_MIRRORS);
        if eligible.is_empty() {
            return Err(Error::Unresolvable { logical });
        }

        // Build zone memberships on every eligible device
        let mut members = Vec::with_capacity(eligible.len());
        for id in &eligible {
            let Some(dev) = sched.device(*id) else {
                continue;
            };
            let zone = sched.zone_join(&dev, &mapped, &eligible, stats);
            members.push((dev, zone));
        }
        if members.is_empty() {
            return Err(Error::Unresolvable { logical });
        }

        let zones = members
            .iter()
            .map(|(dev, zone)| (dev.id(), Arc::clone(zone)))
            .collect();
        let extent = Arc::new(Extent::new(logical, top, owner_root, level, zones));

        // Insert, unless a concurrent creator won the race
        let winner = {
            let mut index = self.extents.lock();
            match index.get(&logical) {
                Some(existing) => {
                    let existing = Arc::clone(existing);
                    existing.hold();
                    Some(existing)
                }
                None => {
                    index.insert(logical, Arc::clone(&extent));
                    None
                }
            }
        };

        if let Some(winner) = winner {
            for (dev, zone) in &members {
                sched.zone_leave(dev, zone, stats);
            }
            EngineStats::bump(&stats.extents_coalesced);
            debug!(logical, "lost creation race; adopting winner");
            return Ok(winner);
        }

        for (dev, _) in &members {
            sched.insert_extent(dev, Arc::clone(&extent));
        }

        EngineStats::bump(&stats.extents_created);
        trace!(logical, level, mirrors = members.len(), "extent created");
        Ok(extent)
    }

    /// Take a reference on an extent found in the index.
    fn find_and_hold(&self, logical: u64) -> Option<Arc<Extent>> {
        let index = self.extents.lock();
        let extent = index.get(&logical)?;
        extent.hold();
        Some(Arc::clone(extent))
    }

    /// Take a reference on an extent discovered through a per-device index.
    /// Fails if the extent has since been removed from the global index,
    /// which is how teardown races are kept harmless.
    pub(crate) fn try_hold(&self, extent: &Arc<Extent>) -> bool {
        let index = self.extents.lock();
        match index.get(&extent.logical()) {
            Some(live) if Arc::ptr_eq(live, extent) => {
                extent.hold();
                true
            }
            _ => false,
        }
    }

    /// Drop one reference. At zero, the extent leaves the global index
    /// first and every per-device structure after, in that order.
    pub(crate) fn release(&self, sched: &Scheduler, extent: &Arc<Extent>, stats: &EngineStats) {
        {
            let mut index = self.extents.lock();
            if !extent.release_ref() {
                return;
            }
            index.remove(&extent.logical());
        }

        for (device, zone) in extent.zones() {
            let Some(dev) = sched.device(*device) else {
                continue;
            };
            sched.remove_extent(&dev, extent.logical());
            sched.zone_leave(&dev, zone, stats);
        }

        EngineStats::bump(&stats.extents_released);
        trace!(logical = extent.logical(), "extent torn down");
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, extent: &Arc<Extent>) {
        self.extents.lock().insert(extent.logical(), Arc::clone(extent));
    }
}

// =============================================================================
// Tests
// =============================================================================
