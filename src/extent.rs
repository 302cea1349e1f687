//! Extents: one in-flight read-ahead unit per tree block
//!
//! An extent exists per logical address system-wide (the global index
//! deduplicates), carries the pending link records of every control waiting
//! on that block, and knows which zone on which device holds each mirror of
//! it. Not to be confused with an on-disk extent record.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::control::Control;
use crate::types::{DeviceId, Key};
use crate::zone::Zone;

/// Link record: "control C is waiting on this extent, and considers it
/// valid only if the block's generation matches".
#[derive(Debug, Clone)]
pub struct ExtentCtl {
    /// Owning control
    pub control: Arc<Control>,

    /// Generation recorded from the pointer when this record was enqueued
    pub generation: u64,
}

/// One tree block queued for read-ahead.
///
/// Reference-count discipline: `refs` is only mutated through the global
/// extent index ([`crate::index::ExtentIndex`]), which pairs the decrement
/// to zero with index removal under one lock. One reference is owned by
/// each attached [`ExtentCtl`] and one, transiently, by a scheduled read.
#[derive(Debug)]
pub struct Extent {
    /// Logical address of the block (block-aligned)
    logical: u64,

    /// Upper key bound; no descendant of this block lies beyond it
    top: Key,

    /// Owning root identifier
    owner_root: u64,

    /// Tree level of the block (0 = leaf)
    level: u8,

    /// Resolved mirrors: the zone this block falls into on each device,
    /// in mirror order. Fixed at creation, at most `MAX_MIRRORS` long.
    zones: Vec<(DeviceId, Arc<Zone>)>,

    /// Pending link records
    ctls: Mutex<Vec<ExtentCtl>>,

    /// Set while a read for this block is outstanding
    submitted: AtomicBool,

    /// Logical reference count
    refs: AtomicUsize,
}

impl Extent {
    /// Create a fresh extent holding one reference for the creator.
    pub(crate) fn new(
        logical: u64,
        top: Key,
        owner_root: u64,
        level: u8,
        zones: Vec<(DeviceId, Arc<Zone>)>,
    ) -> Self {
        Self {
            logical,
            top,
            owner_root,
            level,
            zones,
            ctls: Mutex::new(Vec::new()),
            submitted: AtomicBool::new(false),
            refs: AtomicUsize::new(1),
        }
    }

    pub fn logical(&self) -> u64 {
        self.logical
    }

    pub fn top(&self) -> Key {
        self.top
    }

    pub fn owner_root(&self) -> u64 {
        self.owner_root
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn zones(&self) -> &[(DeviceId, Arc<Zone>)] {
        &self.zones
    }

    /// Position of `device` within the mirror list.
    pub fn mirror_index_of(&self, device: DeviceId) -> Option<usize> {
        self.zones.iter().position(|(d, _)| *d == device)
    }

    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn hold(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    #[must_use]
    pub(crate) fn release_ref(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Attach a link record. The record takes over the reference its
    /// creator obtained from the index lookup.
    pub(crate) fn attach_ctl(&self, ctl: ExtentCtl) {
        self.ctls.lock().push(ctl);
    }

    /// Atomically take every pending link record and clear the submitted
    /// marker, so a concurrently attached record triggers a fresh read
    /// instead of being lost.
    pub(crate) fn take_ctls(&self) -> Vec<ExtentCtl> {
        let mut guard = self.ctls.lock();
        let taken = std::mem::take(&mut *guard);
        self.submitted.store(false, Ordering::Release);
        taken
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.ctls.lock().is_empty()
    }

    /// Claim this extent for submission; false if a read is already out.
    pub(crate) fn mark_submitted(&self) -> bool {
        self.submitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::Acquire)
    }
}

// =============================================================================
// Tests
// =============================================================================
