//! Mutable state of the engine controller.

use super::EngineHeads;
use crate::{ElSyncState, SyncConfig};
use std::time::Instant;
use tiller_protocol::{ChainSpec, L2BlockRef, PayloadInfo};

#[derive(Debug)]
pub(super) struct ControllerState {
    pub(super) heads: EngineHeads,
    /// Heads as of the last logged sync progress.
    logged: EngineHeads,
    pub(super) need_fcu: bool,
    pub(super) need_fcu_for_backup_unsafe_reorg: bool,
    pub(super) el_sync: ElSyncState,
    pub(super) el_started: Option<Instant>,
    pub(super) building: Option<PayloadInfo>,
    chain_spec: ChainSpec,
}

impl ControllerState {
    pub(super) fn new(chain_spec: ChainSpec, sync_config: &SyncConfig) -> Self {
        Self {
            heads: EngineHeads::default(),
            logged: EngineHeads::default(),
            need_fcu: false,
            need_fcu_for_backup_unsafe_reorg: false,
            el_sync: ElSyncState::initial(sync_config),
            el_started: None,
            building: None,
            chain_spec,
        }
    }

    pub(super) fn set_unsafe(&mut self, block: L2BlockRef) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::BLOCK_LABELS,
            "label",
            crate::Metrics::UNSAFE_LABEL,
            block.number as f64
        );
        self.heads.unsafe_head = block;
        self.need_fcu = true;
        self.chain_spec.check_fork_activation(&block);
    }

    pub(super) fn set_cross_unsafe(&mut self, block: L2BlockRef) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::BLOCK_LABELS,
            "label",
            crate::Metrics::CROSS_UNSAFE_LABEL,
            block.number as f64
        );
        self.heads.cross_unsafe = block;
    }

    pub(super) fn set_pending_safe(&mut self, block: L2BlockRef) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::BLOCK_LABELS,
            "label",
            crate::Metrics::PENDING_SAFE_LABEL,
            block.number as f64
        );
        self.heads.pending_safe = block;
    }

    pub(super) fn set_local_safe(&mut self, block: L2BlockRef) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::BLOCK_LABELS,
            "label",
            crate::Metrics::LOCAL_SAFE_LABEL,
            block.number as f64
        );
        self.heads.local_safe = block;
    }

    pub(super) fn set_safe(&mut self, block: L2BlockRef) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::BLOCK_LABELS,
            "label",
            crate::Metrics::SAFE_LABEL,
            block.number as f64
        );
        self.heads.safe = block;
        self.need_fcu = true;
    }

    pub(super) fn set_finalized(&mut self, block: L2BlockRef) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::BLOCK_LABELS,
            "label",
            crate::Metrics::FINALIZED_LABEL,
            block.number as f64
        );
        self.heads.finalized = block;
        self.need_fcu = true;
    }

    pub(super) fn set_backup_unsafe(&mut self, block: L2BlockRef, trigger_reorg: bool) {
        tiller_macros::set!(
            gauge,
            crate::Metrics::BLOCK_LABELS,
            "label",
            crate::Metrics::BACKUP_UNSAFE_LABEL,
            block.number as f64
        );
        self.heads.backup_unsafe = block;
        self.need_fcu_for_backup_unsafe_reorg = trigger_reorg;
    }

    /// Replaces every head. The cross-unsafe head restarts at the safe head.
    pub(super) fn force_reset(
        &mut self,
        unsafe_head: L2BlockRef,
        safe: L2BlockRef,
        finalized: L2BlockRef,
    ) {
        self.set_unsafe(unsafe_head);
        self.set_local_safe(safe);
        self.set_pending_safe(safe);
        self.set_finalized(finalized);
        self.set_safe(safe);
        self.set_cross_unsafe(safe);
        self.set_backup_unsafe(L2BlockRef::default(), false);
    }

    pub(super) fn start_el_sync(&mut self) {
        info!(target: "engine", "Starting EL sync");
        self.el_sync = ElSyncState::StartedEl;
        self.el_started = Some(Instant::now());
    }

    /// Logs which head moved since the last log line, once the engine has seen the heads.
    pub(super) fn log_sync_progress(&mut self) {
        if self.need_fcu {
            return;
        }
        if let Some(reason) = self.heads.progress_since(&self.logged) {
            let heads = &self.heads;
            info!(
                target: "engine",
                reason,
                l2_finalized = %heads.finalized.id(),
                l2_safe = %heads.safe.id(),
                l2_pending_safe = %heads.pending_safe.id(),
                l2_unsafe = %heads.unsafe_head.id(),
                l2_backup_unsafe = %heads.backup_unsafe.id(),
                l2_time = heads.unsafe_head.time,
                "Sync progress"
            );
        }
        self.logged = self.heads;
    }
}
