//! The read-ahead engine
//!
//! Ties the pieces together: the public entry points (`start`, `wait`,
//! `detach`, `quiesce`), the dispatch loop that fans reads out across
//! devices, and the completion hook that turns one finished block into
//! zero or more newly queued children.
//!
//! # Architecture
//!
//! ```text
//! start(root, range) ──► ExtentIndex ──► per-device zones/extents
//!                             │
//!                             ▼
//!                       Dispatch Loop ──► BlockReader (async read tasks)
//!                             ▲                  │
//!                             │                  ▼
//!                             └──────── Completion Hook
//!                                    (parse, expand children,
//!                                     dispatch link records)
//! ```
//!
//! Read-ahead is a hint layer: a failed read is never retried here and is
//! never surfaced to a waiter beyond "the prefetch expanded less far than
//! it might have". The authoritative read path lives outside this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::control::Control;
use crate::device::DeviceState;
use crate::error::{Error, Result};
use crate::extent::{Extent, ExtentCtl};
use crate::index::ExtentIndex;
use crate::ports::{BlockMap, BlockReader, NodeParser};
use crate::scheduler::Scheduler;
use crate::stats::{EngineStats, EngineStatsSnapshot};
use crate::types::{DeviceId, Key, ParsedNode, RootCursor};

/// Queued and in-flight work on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBacklog {
    /// Extents queued against the device
    pub queued: usize,

    /// Reads currently outstanding
    pub in_flight: usize,
}

/// One read-ahead engine per storage-engine instance.
///
/// All methods are safe to call concurrently from any number of tasks.
/// Methods that can submit reads (`start`, `wait`, `quiesce`, and the
/// completion path) must run inside a Tokio runtime.
pub struct Engine {
    config: EngineConfig,
    map: Arc<dyn BlockMap>,
    reader: Arc<dyn BlockReader>,
    parser: Arc<dyn NodeParser>,
    index: ExtentIndex,
    sched: Scheduler,
    stats: Arc<EngineStats>,

    /// Background overflow passes currently scheduled
    bg_passes: AtomicUsize,
}

impl Engine {
    /// Create a new engine over the given collaborators.
    pub fn new(
        config: EngineConfig,
        map: Arc<dyn BlockMap>,
        reader: Arc<dyn BlockReader>,
        parser: Arc<dyn NodeParser>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            map,
            reader,
            parser,
            index: ExtentIndex::new(),
            sched: Scheduler::new(),
            stats: Arc::new(EngineStats::default()),
            bg_passes: AtomicUsize::new(0),
        }))
    }

    // =========================================================================
    // Device registry
    // =========================================================================

    /// Register a device. Idempotent.
    pub fn add_device(&self, device: DeviceId) {
        self.sched.add_device(device);
        debug!(%device, "device registered");
    }

    /// Registered devices, in id order.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.sched.device_ids()
    }

    /// Remove a device from the engine. Requires a completed
    /// [`Engine::quiesce`]: the device must be drained and still marked
    /// quiesced.
    pub fn remove_device(&self, device: DeviceId) -> Result<()> {
        let dev = self
            .sched
            .device(device)
            .ok_or(Error::UnknownDevice(device))?;
        let (in_flight, queued) = (dev.in_flight(), dev.backlog());
        if !dev.is_quiesced() || in_flight > 0 || queued > 0 {
            return Err(Error::DeviceBusy {
                device,
                in_flight,
                queued,
            });
        }
        self.sched.remove_device(device);
        info!(%device, "device removed");
        Ok(())
    }

    /// Queued and in-flight work on one device.
    pub fn device_backlog(&self, device: DeviceId) -> Result<DeviceBacklog> {
        let dev = self
            .sched
            .device(device)
            .ok_or(Error::UnknownDevice(device))?;
        Ok(DeviceBacklog {
            queued: dev.backlog(),
            in_flight: dev.in_flight(),
        })
    }

    /// Snapshot of the engine counters.
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of live read-ahead units (test and debugging aid).
    pub fn extents_live(&self) -> usize {
        self.index.live()
    }

    // =========================================================================
    // Public entry points
    // =========================================================================

    /// Start prefetching every block that can satisfy the half-open range
    /// `[key_start, key_end)` under `root`.
    ///
    /// Fails only if the root itself cannot be resolved; deeper resolution
    /// failures silently prune the affected branch instead.
    #[instrument(skip(self, root), fields(root = root.root, addr = root.addr))]
    pub fn start(
        self: &Arc<Self>,
        root: RootCursor,
        key_start: Key,
        key_end: Key,
    ) -> Result<Arc<Control>> {
        let control = Arc::new(Control::new(root.root, key_start, key_end));
        self.enqueue(
            &control,
            root.addr,
            Key::MAX,
            root.root,
            root.level,
            root.generation,
        )?;
        EngineStats::bump(&self.stats.controls_started);
        info!(control = %control.id(), %key_start, %key_end, "prefetch started");
        self.dispatch();
        Ok(control)
    }

    /// Block until `control` finishes, then release the caller's handle.
    ///
    /// Self-sufficient: if no background pass is making progress, the
    /// bounded tick re-kicks the dispatch loop from here.
    pub async fn wait(self: &Arc<Self>, control: Arc<Control>) {
        while !control.wait_tick(self.config.wait_tick).await {
            self.dispatch();
        }
        debug!(control = %control.id(), "wait complete");
    }

    /// Release the caller's handle without waiting; the prefetch finishes
    /// in the background.
    pub fn detach(&self, control: Arc<Control>) {
        debug!(control = %control.id(), outstanding = control.outstanding(), "detached");
        drop(control);
    }

    // =========================================================================
    // Device removal interlock
    // =========================================================================

    /// Make `device` ineligible for new mirror resolution, then drain its
    /// queued extents and in-flight reads. After this returns the device
    /// holds no read-ahead state and can be detached safely.
    #[instrument(skip(self))]
    pub async fn quiesce(self: &Arc<Self>, device: DeviceId) -> Result<()> {
        let dev = self
            .sched
            .device(device)
            .ok_or(Error::UnknownDevice(device))?;
        dev.set_quiesced(true);
        info!(%device, "quiescing device");

        loop {
            self.dispatch();
            if dev.in_flight() == 0 && dev.backlog() == 0 {
                break;
            }
            if dev.in_flight() > 0 {
                dev.drain_tick(self.config.wait_tick).await;
            } else {
                // Backlog held by reads in flight on other devices; wait a
                // tick instead of spinning
                tokio::time::sleep(self.config.wait_tick).await;
            }
        }

        info!(%device, "device quiesced");
        Ok(())
    }

    /// Reverse the eligibility flag set by [`Engine::quiesce`]. Idempotent
    /// and safe to call on an aborted removal.
    pub fn unquiesce(&self, device: DeviceId) -> Result<()> {
        let dev = self
            .sched
            .device(device)
            .ok_or(Error::UnknownDevice(device))?;
        dev.set_quiesced(false);
        info!(%device, "device eligible for read-ahead again");
        Ok(())
    }

    // =========================================================================
    // Dispatch loop
    // =========================================================================

    /// One synchronous dispatch pass: keep offering work to every device
    /// below its in-flight cap until nothing more can be submitted or the
    /// pass budget is hit, in which case the remainder moves to background
    /// tasks.
    pub fn dispatch(self: &Arc<Self>) {
        let cap = self.config.max_in_flight_per_device;
        let mut total = 0usize;

        loop {
            let mut enqueued = 0usize;
            for dev in self.sched.devices_snapshot() {
                if dev.in_flight() >= cap {
                    continue;
                }
                if let Some(extent) = self.sched.next_extent(&self.index, &dev, &self.stats) {
                    enqueued += self.submit(&dev, extent);
                }
            }
            if enqueued == 0 {
                break;
            }
            total += enqueued;
            if total >= self.config.pass_budget {
                // Cache-hit storms must not monopolize this thread
                self.kick_background(2);
                break;
            }
        }

        EngineStats::bump(&self.stats.dispatch_passes);
    }

    /// Schedule up to `n` overflow passes, bounded by the configured cap.
    fn kick_background(self: &Arc<Self>, n: usize) {
        for _ in 0..n {
            if self.bg_passes.fetch_add(1, Ordering::AcqRel) >= self.config.max_background_passes {
                self.bg_passes.fetch_sub(1, Ordering::AcqRel);
                return;
            }
            EngineStats::bump(&self.stats.background_passes);
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.dispatch();
                engine.bg_passes.fetch_sub(1, Ordering::AcqRel);
            });
        }
    }

    /// Submit one read for `extent` on `dev`. Returns how many reads were
    /// actually issued (0 when the extent turned out inert).
    fn submit(self: &Arc<Self>, dev: &Arc<DeviceState>, extent: Arc<Extent>) -> usize {
        // An extent with nothing pending, or with a read already out, is
        // inert; drop the scheduler's reference and move on.
        if !extent.has_pending() || !extent.mark_submitted() {
            self.index.release(&self.sched, &extent, &self.stats);
            return 0;
        }

        let mirror = extent.mirror_index_of(dev.id()).unwrap_or(0);
        dev.begin_read();
        EngineStats::bump(&self.stats.reads_submitted);
        debug!(
            device = %dev.id(),
            logical = extent.logical(),
            level = extent.level(),
            mirror,
            "read submitted"
        );

        let engine = Arc::clone(self);
        let dev = Arc::clone(dev);
        tokio::spawn(async move {
            let result = engine.reader.read(dev.id(), extent.logical(), mirror).await;
            engine.on_read_done(&extent, result);
            dev.finish_read();
            engine.index.release(&engine.sched, &extent, &engine.stats);
            // Expansion may have unblocked other devices
            engine.dispatch();
        });
        1
    }

    // =========================================================================
    // Completion hook
    // =========================================================================

    /// Turn one finished block into zero or more newly queued children,
    /// then dispatch every link record that was pending on it.
    fn on_read_done(self: &Arc<Self>, extent: &Arc<Extent>, result: Result<Bytes>) {
        // Taking the list atomically makes each record dispatch exactly
        // once; clearing the submitted marker lets a record attached after
        // this point trigger a fresh read.
        let ctls = extent.take_ctls();
        self.stats.record_read_done(result.is_ok());

        match result {
            Ok(buf) if extent.level() > 0 => {
                let node = self.parser.parse(&buf);
                self.expand(extent, &node, &ctls);
                EngineStats::bump(&self.stats.nodes_expanded);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    logical = extent.logical(),
                    error = %err,
                    "read-ahead read failed; branch not expanded"
                );
            }
        }

        for ctl in ctls {
            if ctl.control.complete_elem() {
                EngineStats::bump(&self.stats.controls_completed);
                debug!(control = %ctl.control.id(), "prefetch request completed");
            }
            self.index.release(&self.sched, extent, &self.stats);
        }
    }

    /// Enqueue every in-range child of `node` for every link record whose
    /// expected generation matches the block.
    fn expand(self: &Arc<Self>, extent: &Arc<Extent>, node: &ParsedNode, ctls: &[ExtentCtl]) {
        let mut live: Vec<&ExtentCtl> = Vec::with_capacity(ctls.len());
        for ctl in ctls {
            if ctl.generation != node.generation {
                // The branch was superseded by a concurrent tree update;
                // not an error, just no longer worth prefetching.
                EngineStats::bump(&self.stats.branches_pruned);
                debug!(
                    control = %ctl.control.id(),
                    expected = ctl.generation,
                    actual = node.generation,
                    "stale generation; pruning branch"
                );
            } else {
                live.push(ctl);
            }
        }
        if live.is_empty() {
            return;
        }

        for (i, entry) in node.entries.iter().enumerate() {
            let next_key = node
                .entries
                .get(i + 1)
                .map(|next| next.key)
                .unwrap_or_else(|| extent.top());

            for ctl in &live {
                if !ctl.control.intersects(entry.key, next_key) {
                    continue;
                }
                match self.enqueue(
                    &ctl.control,
                    entry.addr,
                    next_key,
                    extent.owner_root(),
                    extent.level() - 1,
                    entry.generation,
                ) {
                    Ok(()) => EngineStats::bump(&self.stats.children_enqueued),
                    Err(err) => {
                        EngineStats::bump(&self.stats.children_unresolvable);
                        debug!(
                            child = entry.addr,
                            error = %err,
                            "child unresolvable; pruning branch"
                        );
                    }
                }
            }
        }
    }

    /// Attach one link record for `control` to the extent at `addr`,
    /// creating the extent if this is the first reference to it.
    fn enqueue(
        &self,
        control: &Arc<Control>,
        addr: u64,
        top: Key,
        owner_root: u64,
        level: u8,
        generation: u64,
    ) -> Result<()> {
        let extent =
            self.index
                .find_or_create(&self.sched, self.map.as_ref(), addr, top, owner_root, level, &self.stats)?;
        control.add_elem();
        // The record takes over the reference obtained above
        extent.attach_ctl(ExtentCtl {
            control: Arc::clone(control),
            generation,
        });
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("devices", &self.sched.device_ids())
            .field("extents_live", &self.index.live())
            .finish()
    }
}
