//! The forkchoice heads owned by the engine controller.

use alloy_rpc_types_engine::ForkchoiceState;
use tiller_protocol::L2BlockRef;

/// The seven L2 heads tracked by the engine controller.
///
/// Pre-interop the cross-unsafe head follows the unsafe head and the safe head follows the
/// local-safe head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineHeads {
    /// Local tip.
    pub unsafe_head: L2BlockRef,
    /// Cross-verified tip.
    pub cross_unsafe: L2BlockRef,
    /// Mid-span derivation cursor.
    pub pending_safe: L2BlockRef,
    /// End of the last completed derivation span.
    pub local_safe: L2BlockRef,
    /// Cross-verified safe head.
    pub safe: L2BlockRef,
    /// Finalized head.
    pub finalized: L2BlockRef,
    /// Rollback target after a failed pending-safe attempt.
    pub backup_unsafe: L2BlockRef,
}

impl EngineHeads {
    /// The forkchoice state sent to the engine.
    pub const fn forkchoice_state(&self) -> ForkchoiceState {
        ForkchoiceState {
            head_block_hash: self.unsafe_head.hash,
            safe_block_hash: self.safe.hash,
            finalized_block_hash: self.finalized.hash,
        }
    }

    /// Describes what moved between `prev` and `self`, by decreasing importance.
    pub(crate) fn progress_since(&self, prev: &Self) -> Option<&'static str> {
        if prev.finalized != self.finalized {
            Some("finalized block")
        } else if prev.safe != self.safe {
            if prev.safe == prev.unsafe_head {
                Some("derived safe block from L1")
            } else {
                Some("consolidated block with L1")
            }
        } else if prev.unsafe_head != self.unsafe_head {
            Some("new chain head block")
        } else if prev.pending_safe != self.pending_safe {
            Some("pending new safe block")
        } else if prev.backup_unsafe != self.backup_unsafe {
            Some("new backup unsafe block")
        } else {
            None
        }
    }
}
