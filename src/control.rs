//! Control handles: one outstanding range-prefetch request
//!
//! A control is shared between the caller (who may `wait` on it or detach)
//! and every pending link record created on its behalf during the tree
//! walk. Its `elems` counter tracks outstanding link records; when it
//! reaches zero the control is done, exactly once.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;
use uuid::Uuid;

use crate::types::Key;

/// Caller-visible handle for one `[key_start, key_end)` prefetch request
/// against one tree root.
#[derive(Debug)]
pub struct Control {
    /// Identity for log correlation
    id: Uuid,

    /// Owning root identifier
    root: u64,

    /// First key of the requested range (inclusive)
    key_start: Key,

    /// Upper key bound of the requested range (exclusive)
    key_end: Key,

    /// Outstanding link records
    elems: AtomicUsize,

    /// Latched once `elems` first reaches zero
    finished: AtomicBool,

    /// Signalled when the control finishes
    done: Notify,
}

impl Control {
    pub(crate) fn new(root: u64, key_start: Key, key_end: Key) -> Self {
        Self {
            id: Uuid::new_v4(),
            root,
            key_start,
            key_end,
            elems: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            done: Notify::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    pub fn key_start(&self) -> Key {
        self.key_start
    }

    pub fn key_end(&self) -> Key {
        self.key_end
    }

    /// Outstanding link records at this instant.
    pub fn outstanding(&self) -> usize {
        self.elems.load(Ordering::Acquire)
    }

    /// True once every link record has been dispatched.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// A child interval `[start, end)` intersects the half-open requested
    /// range.
    pub(crate) fn intersects(&self, start: Key, end: Key) -> bool {
        start < self.key_end && end > self.key_start
    }

    /// Account one new link record.
    pub(crate) fn add_elem(&self) {
        self.elems.fetch_add(1, Ordering::AcqRel);
    }

    /// Account one dispatched link record; returns true when this was the
    /// last one and the control just finished.
    pub(crate) fn complete_elem(&self) -> bool {
        if self.elems.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finished.store(true, Ordering::Release);
            self.done.notify_waiters();
            true
        } else {
            false
        }
    }

    /// Wait for completion or for `tick` to elapse; returns true once
    /// finished. Callers loop on this, so a missed wakeup only costs one
    /// tick.
    pub(crate) async fn wait_tick(&self, tick: std::time::Duration) -> bool {
        if self.is_finished() {
            return true;
        }
        let notified = self.done.notified();
        if self.is_finished() {
            return true;
        }
        let _ = tokio::time::timeout(tick, notified).await;
        self.is_finished()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_elems_lifecycle() {
        let control = Control::new(1, Key(0), Key(100));
        assert_eq!(control.outstanding(), 0);
        assert!(!control.is_finished());

        control.add_elem();
        control.add_elem();
        assert_eq!(control.outstanding(), 2);

        assert!(!control.complete_elem());
        assert!(control.complete_elem());
        assert!(control.is_finished());
        assert_eq!(control.outstanding(), 0);
    }

    #[test]
    fn test_intersects() {
        let control = Control::new(1, Key(10), Key(20));

        assert!(control.intersects(Key(0), Key(11)));
        assert!(control.intersects(Key(19), Key(30)));
        assert!(control.intersects(Key(12), Key(15)));
        assert!(control.intersects(Key(0), Key(100)));

        assert!(!control.intersects(Key(0), Key(9)));
        assert!(!control.intersects(Key(21), Key(100)));
    }

    #[test]
    fn test_intersects_bounds_are_half_open() {
        let control = Control::new(1, Key(10), Key(20));

        // A child starting exactly at key_end is outside the range
        assert!(!control.intersects(Key(20), Key(30)));
        // A child ending exactly at key_start is outside the range, since
        // its `end` is the next sibling's first key
        assert!(!control.intersects(Key(0), Key(10)));
        // One key inside either bound is enough
        assert!(control.intersects(Key(19), Key(20)));
        assert!(control.intersects(Key(10), Key(11)));
    }

    #[tokio::test]
    async fn test_wait_tick_returns_on_completion() {
        let control = std::sync::Arc::new(Control::new(1, Key(0), Key(10)));
        control.add_elem();

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move {
                while !control.wait_tick(Duration::from_millis(10)).await {}
            })
        };

        control.complete_elem();
        waiter.await.expect("waiter task panicked");
        assert!(control.is_finished());
    }

    #[tokio::test]
    async fn test_wait_tick_times_out_while_pending() {
        let control = Control::new(1, Key(0), Key(10));
        control.add_elem();
        assert!(!control.wait_tick(Duration::from_millis(5)).await);
    }

    proptest::proptest! {
        #[test]
        fn prop_intersects_matches_interval_overlap(
            key_start in 0u64..1000,
            key_end in 0u64..1000,
            start in 0u64..1000,
            end in 0u64..1000,
        ) {
            let (key_start, key_end) = (key_start.min(key_end), key_start.max(key_end));
            let (start, end) = (start.min(end), start.max(end));
            proptest::prop_assume!(key_start < key_end && start < end);
            let control = Control::new(1, Key(key_start), Key(key_end));
            let overlap = start.max(key_start) < end.min(key_end);
            proptest::prop_assert_eq!(control.intersects(Key(start), Key(end)), overlap);
        }
    }
}
