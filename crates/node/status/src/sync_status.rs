//! The sync status record.

use serde::{Deserialize, Serialize};
use tiller_protocol::{L1BlockRef, L2BlockRef};

/// A snapshot of every head the node tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncStatus {
    /// The L1 block the derivation pipeline is reading.
    pub current_l1: L1BlockRef,
    /// The L1 finalized block known when [`SyncStatus::current_l1`] was last updated.
    pub current_l1_finalized: L1BlockRef,
    /// The L1 head.
    pub head_l1: L1BlockRef,
    /// The L1 safe block.
    pub safe_l1: L1BlockRef,
    /// The L1 finalized block.
    pub finalized_l1: L1BlockRef,
    /// The L2 unsafe head.
    pub unsafe_l2: L2BlockRef,
    /// The L2 safe head.
    pub safe_l2: L2BlockRef,
    /// The L2 finalized head.
    pub finalized_l2: L2BlockRef,
    /// The L2 pending-safe head.
    pub pending_safe_l2: L2BlockRef,
    /// The L2 cross-unsafe head.
    pub cross_unsafe_l2: L2BlockRef,
    /// The L2 local-safe head.
    pub local_safe_l2: L2BlockRef,
}
