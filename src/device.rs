//! Per-device scheduling state

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::extent::Extent;
use crate::types::DeviceId;
use crate::zone::Zone;

/// Read cursor of a device's scheduler.
#[derive(Debug, Default)]
pub(crate) struct DeviceCursor {
    /// Zone currently being drained (holds one zone reference)
    pub zone: Option<Arc<Zone>>,

    /// Next logical address to look at inside the current zone
    pub next: u64,
}

/// Everything the engine tracks for one physical device.
#[derive(Debug)]
pub struct DeviceState {
    id: DeviceId,

    /// Zones on this device, keyed by span start
    pub(crate) zones: Mutex<BTreeMap<u64, Arc<Zone>>>,

    /// Extents with a mirror on this device, keyed by logical address
    pub(crate) extents: Mutex<BTreeMap<u64, Arc<Extent>>>,

    /// Scheduler cursor
    pub(crate) cursor: Mutex<DeviceCursor>,

    /// Reads currently outstanding on this device
    in_flight: AtomicUsize,

    /// Set while the device is being quiesced for removal; mirror
    /// resolution skips it
    quiesced: AtomicBool,

    /// Signalled whenever `in_flight` drops to zero
    drained: Notify,
}

impl DeviceState {
    pub(crate) fn new(id: DeviceId) -> Self {
        Self {
            id,
            zones: Mutex::new(BTreeMap::new()),
            extents: Mutex::new(BTreeMap::new()),
            cursor: Mutex::new(DeviceCursor::default()),
            in_flight: AtomicUsize::new(0),
            quiesced: AtomicBool::new(false),
            drained: Notify::new(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Extents queued against this device at this instant.
    pub fn backlog(&self) -> usize {
        self.extents.lock().len()
    }

    pub fn is_quiesced(&self) -> bool {
        self.quiesced.load(Ordering::Acquire)
    }

    pub(crate) fn set_quiesced(&self, quiesced: bool) {
        self.quiesced.store(quiesced, Ordering::Release);
    }

    pub(crate) fn begin_read(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn finish_read(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait for the in-flight count to touch zero or for `tick` to elapse.
    /// Quiesce loops on this, so a missed wakeup only costs one tick.
    pub(crate) async fn drain_tick(&self, tick: std::time::Duration) {
        if self.in_flight() == 0 {
            return;
        }
        let notified = self.drained.notified();
        if self.in_flight() == 0 {
            return;
        }
        let _ = tokio::time::timeout(tick, notified).await;
    }
}

// =============================================================================
// Tests
// =============================================================================
