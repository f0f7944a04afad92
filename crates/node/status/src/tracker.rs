//! The sync status tracker.

use crate::SyncStatus;
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};
use tiller_event::{Deriver, Event};
use tiller_protocol::{L1BlockRef, L2BlockRef};
use tokio::sync::watch;

/// Folds head and L1 events into a [`SyncStatus`].
///
/// The status lives in a [`watch`] channel. Events that leave every field unchanged do not
/// notify subscribers.
#[derive(Debug)]
pub struct StatusTracker {
    status: watch::Sender<SyncStatus>,
    last_reorg_depth: Mutex<Option<u64>>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    /// Creates a tracker with an empty status.
    pub fn new() -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self { status, last_reorg_depth: Mutex::new(None) }
    }

    /// The current status.
    pub fn sync_status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// The current L1 head.
    pub fn l1_head(&self) -> L1BlockRef {
        self.status.borrow().head_l1
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Depth of the last L1 reorg seen in the L1 head stream.
    pub fn last_l1_reorg_depth(&self) -> Option<u64> {
        *self.last_reorg_depth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, apply: impl FnOnce(&mut SyncStatus)) {
        self.status.send_if_modified(|status| {
            let before = *status;
            apply(status);
            *status != before
        });
    }

    fn on_l1_unsafe(&self, status: &mut SyncStatus, l1_unsafe: L1BlockRef) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::L1_REF,
            "kind",
            crate::Metrics::L1_HEAD_LABEL,
            l1_unsafe.number as f64
        );
        let head = status.head_l1;
        if head.is_zero() {
            info!(target: "status", l1_head = %l1_unsafe.id(), "Received first L1 head signal");
        } else if head.hash == l1_unsafe.hash {
            trace!(target: "status", l1_head = %l1_unsafe.id(), "L1 head unchanged");
        } else if head.hash == l1_unsafe.parent_hash {
            debug!(target: "status", l1_head = %l1_unsafe.id(), "L1 head moved forward");
        } else {
            if head.number >= l1_unsafe.number {
                let depth = head.number - l1_unsafe.number;
                tiller_macros::record!(histogram, crate::Metrics::L1_REORG_DEPTH, depth as f64);
                *self.last_reorg_depth.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(depth);
            }
            // A long extension, a reorg, or a missed head update.
            warn!(
                target: "status",
                old_l1_head = %head.id(),
                new_l1_head = %l1_unsafe.id(),
                new_l1_parent = %l1_unsafe.parent_hash,
                "L1 head signal indicates a possible L1 re-org"
            );
        }
        status.head_l1 = l1_unsafe;
    }

    fn set_l2_heads(
        status: &mut SyncStatus,
        unsafe_head: L2BlockRef,
        safe_head: L2BlockRef,
        finalized: L2BlockRef,
    ) {
        status.unsafe_l2 = unsafe_head;
        status.safe_l2 = safe_head;
        status.finalized_l2 = finalized;
    }
}

#[async_trait]
impl Deriver for StatusTracker {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::ForkchoiceUpdate { unsafe_head, safe_head, finalized } |
            Event::EngineResetConfirmed { unsafe_head, safe_head, finalized } => {
                self.update(|s| Self::set_l2_heads(s, *unsafe_head, *safe_head, *finalized))
            }
            Event::PendingSafeUpdate { pending_safe, unsafe_head } => self.update(|s| {
                s.unsafe_l2 = *unsafe_head;
                s.pending_safe_l2 = *pending_safe;
            }),
            Event::CrossUnsafeUpdate { cross_unsafe, .. } => {
                self.update(|s| s.cross_unsafe_l2 = *cross_unsafe)
            }
            Event::LocalSafeUpdate { local_safe, .. } => {
                self.update(|s| s.local_safe_l2 = *local_safe)
            }
            Event::CrossSafeUpdate { cross_safe, .. } => self.update(|s| s.safe_l2 = *cross_safe),
            Event::DeriverL1Status { origin } => self.update(|s| s.current_l1 = *origin),
            Event::L1Unsafe { l1_unsafe } => self.update(|s| self.on_l1_unsafe(s, *l1_unsafe)),
            Event::L1Safe { l1_safe } => {
                tiller_macros::set!(
                    gauge,
                    crate::Metrics::L1_REF,
                    "kind",
                    crate::Metrics::L1_SAFE_LABEL,
                    l1_safe.number as f64
                );
                self.update(|s| s.safe_l1 = *l1_safe)
            }
            Event::FinalizeL1 { finalized_l1 } => {
                tiller_macros::set!(
                    gauge,
                    crate::Metrics::L1_REF,
                    "kind",
                    crate::Metrics::L1_FINALIZED_LABEL,
                    finalized_l1.number as f64
                );
                self.update(|s| {
                    s.finalized_l1 = *finalized_l1;
                    s.current_l1_finalized = *finalized_l1;
                })
            }
            Event::Reset { .. } => self.update(|s| {
                s.unsafe_l2 = L2BlockRef::default();
                s.safe_l2 = L2BlockRef::default();
                s.current_l1 = L1BlockRef::default();
            }),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use rstest::rstest;
    use tiller_event::EventError;
    use tiller_protocol::test_utils::{l1_ref, l2_ref};

    fn l2(number: u64) -> L2BlockRef {
        l2_ref(number, number * 2, &l1_ref(number / 6), number % 6)
    }

    #[tokio::test]
    async fn tracks_engine_heads() {
        let tracker = StatusTracker::new();
        tracker
            .on_event(&Event::ForkchoiceUpdate {
                unsafe_head: l2(10),
                safe_head: l2(8),
                finalized: l2(4),
            })
            .await;
        tracker
            .on_event(&Event::PendingSafeUpdate { pending_safe: l2(9), unsafe_head: l2(11) })
            .await;
        tracker
            .on_event(&Event::CrossUnsafeUpdate { cross_unsafe: l2(11), local_unsafe: l2(11) })
            .await;
        tracker
            .on_event(&Event::LocalSafeUpdate { local_safe: l2(9), derived_from: l1_ref(3) })
            .await;
        tracker
            .on_event(&Event::CrossSafeUpdate { cross_safe: l2(9), local_safe: l2(9) })
            .await;

        let status = tracker.sync_status();
        assert_eq!(status.unsafe_l2, l2(11));
        assert_eq!(status.cross_unsafe_l2, l2(11));
        assert_eq!(status.pending_safe_l2, l2(9));
        assert_eq!(status.local_safe_l2, l2(9));
        assert_eq!(status.safe_l2, l2(9));
        assert_eq!(status.finalized_l2, l2(4));
    }

    #[tokio::test]
    async fn tracks_l1_views() {
        let tracker = StatusTracker::new();
        tracker.on_event(&Event::L1Unsafe { l1_unsafe: l1_ref(20) }).await;
        tracker.on_event(&Event::L1Safe { l1_safe: l1_ref(15) }).await;
        tracker.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(10) }).await;
        tracker.on_event(&Event::DeriverL1Status { origin: l1_ref(12) }).await;

        let status = tracker.sync_status();
        assert_eq!(tracker.l1_head(), l1_ref(20));
        assert_eq!(status.safe_l1, l1_ref(15));
        assert_eq!(status.finalized_l1, l1_ref(10));
        assert_eq!(status.current_l1_finalized, l1_ref(10));
        assert_eq!(status.current_l1, l1_ref(12));
    }

    #[tokio::test]
    async fn reset_clears_derived_heads() {
        let tracker = StatusTracker::new();
        tracker
            .on_event(&Event::ForkchoiceUpdate {
                unsafe_head: l2(10),
                safe_head: l2(8),
                finalized: l2(4),
            })
            .await;
        tracker.on_event(&Event::DeriverL1Status { origin: l1_ref(12) }).await;
        tracker.on_event(&Event::Reset { err: EventError::msg("reorg") }).await;

        let status = tracker.sync_status();
        assert!(status.unsafe_l2.is_zero());
        assert!(status.safe_l2.is_zero());
        assert!(status.current_l1.is_zero());
        assert_eq!(status.finalized_l2, l2(4));

        tracker
            .on_event(&Event::EngineResetConfirmed {
                unsafe_head: l2(9),
                safe_head: l2(7),
                finalized: l2(4),
            })
            .await;
        assert_eq!(tracker.sync_status().unsafe_l2, l2(9));
    }

    #[tokio::test]
    async fn publishes_only_changes() {
        let tracker = StatusTracker::new();
        let mut status = tracker.subscribe();

        tracker.on_event(&Event::L1Unsafe { l1_unsafe: l1_ref(20) }).await;
        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().head_l1, l1_ref(20));

        // Same head again: handled, but nothing to publish.
        assert!(tracker.on_event(&Event::L1Unsafe { l1_unsafe: l1_ref(20) }).await);
        assert!(!status.has_changed().unwrap());

        assert!(!tracker.on_event(&Event::SequencerAction).await);
        assert!(!status.has_changed().unwrap());
    }

    #[rstest]
    #[case::extension(l1_ref(21), None)]
    #[case::same_height(sibling(20), Some(0))]
    #[case::deeper(sibling(17), Some(3))]
    #[case::gap(l1_ref(25), None)]
    #[tokio::test]
    async fn records_l1_reorg_depth(#[case] next: L1BlockRef, #[case] depth: Option<u64>) {
        let tracker = StatusTracker::new();
        tracker.on_event(&Event::L1Unsafe { l1_unsafe: l1_ref(20) }).await;
        tracker.on_event(&Event::L1Unsafe { l1_unsafe: next }).await;
        assert_eq!(tracker.l1_head(), next);
        assert_eq!(tracker.last_l1_reorg_depth(), depth);
    }

    fn sibling(number: u64) -> L1BlockRef {
        L1BlockRef { hash: B256::repeat_byte(0xee), ..l1_ref(number) }
    }
}
