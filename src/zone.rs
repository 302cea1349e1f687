//! Zones: one block-group span as seen from one device
//!
//! A zone exists per (device, block-group span) pair and only while at
//! least one extent has resolved a mirror into it. Zones are what the
//! scheduler batches on: draining one zone at a time keeps a device's reads
//! clustered, and the `locked` flag keeps two devices from draining copies
//! of the same span concurrently.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::types::DeviceId;

/// One block-group-sized span of logical address space on one device.
///
/// Reference-count discipline: `refs` and `elems` are only mutated while
/// holding the owning device's zone-index lock, so a zone can never be
/// revived after the decrement that removed it from the index. `locked` is
/// toggled by the scheduler under its coordinating lock.
#[derive(Debug)]
pub struct Zone {
    /// Start of the logical span (inclusive)
    start: u64,

    /// End of the logical span (inclusive)
    end: u64,

    /// Device this copy belongs to
    device: DeviceId,

    /// All devices holding a mirror of this span, in mirror order
    mirrors: Vec<DeviceId>,

    /// Number of live extents queued against this zone
    elems: AtomicUsize,

    /// Set while some device is draining a copy of this span
    locked: AtomicBool,

    /// Logical reference count (extent memberships + scheduler's current zone)
    refs: AtomicUsize,
}

impl Zone {
    pub fn new(start: u64, end: u64, device: DeviceId, mirrors: Vec<DeviceId>) -> Self {
        Self {
            start,
            end,
            device,
            mirrors,
            elems: AtomicUsize::new(0),
            locked: AtomicBool::new(false),
            refs: AtomicUsize::new(0),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn mirrors(&self) -> &[DeviceId] {
        &self.mirrors
    }

    pub fn contains(&self, logical: u64) -> bool {
        logical >= self.start && logical <= self.end
    }

    /// Take one logical reference.
    pub fn hold(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one logical reference; returns true when it was the last one
    /// and the caller must remove the zone from the device index.
    #[must_use]
    pub fn release(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn add_elem(&self) {
        self.elems.fetch_add(1, Ordering::AcqRel);
    }

    pub fn remove_elem(&self) {
        self.elems.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn elems(&self) -> usize {
        self.elems.load(Ordering::Acquire)
    }

    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

// =============================================================================
// Tests
// =============================================================================
