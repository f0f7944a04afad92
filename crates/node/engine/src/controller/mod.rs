//! The engine controller.

use crate::{
    ElSyncState, EngineApi, EngineApiError, EngineControllerError, SyncConfig, api::timed_call,
};
use std::{fmt, sync::Arc};
use tiller_event::{Deriver, Emitter, Event, EventError};
use tiller_protocol::{
    BlockLabel, ChainSpec, ExecutionPayloadEnvelope, L2BlockRef, RollupConfig,
};
use tokio::sync::Mutex;

mod build;

mod heads;
pub use heads::EngineHeads;

mod state;
use state::ControllerState;

/// Owns the forkchoice heads and every call to the execution engine.
///
/// Registered as an actor, it reacts to forkchoice, build, payload and reset events. All
/// other components learn about the heads through the events it emits.
pub struct EngineController<E> {
    engine: E,
    config: Arc<RollupConfig>,
    sync_config: SyncConfig,
    emitter: Arc<dyn Emitter>,
    state: Mutex<ControllerState>,
}

impl<E: fmt::Debug> fmt::Debug for EngineController<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineController")
            .field("engine", &self.engine)
            .field("sync_config", &self.sync_config)
            .finish_non_exhaustive()
    }
}

impl<E: EngineApi> EngineController<E> {
    /// Creates a controller with all heads zeroed.
    pub fn new(
        engine: E,
        config: Arc<RollupConfig>,
        sync_config: SyncConfig,
        emitter: Arc<dyn Emitter>,
    ) -> Self {
        let state = ControllerState::new(ChainSpec::new((*config).clone()), &sync_config);
        Self { engine, config, sync_config, emitter, state: Mutex::new(state) }
    }

    /// A snapshot of the heads.
    pub async fn heads(&self) -> EngineHeads {
        self.state.lock().await.heads
    }

    /// The execution-layer sync state.
    pub async fn el_sync_state(&self) -> ElSyncState {
        self.state.lock().await.el_sync
    }

    /// Returns `true` while the execution client runs its own sync.
    pub async fn is_engine_syncing(&self) -> bool {
        self.state.lock().await.el_sync.is_syncing()
    }

    /// Returns `true` if the heads changed since the last forkchoice update.
    pub async fn needs_forkchoice_update(&self) -> bool {
        self.state.lock().await.need_fcu
    }

    async fn emit(&self, event: Event) {
        self.emitter.emit(event).await;
    }

    /// Sends the current heads to the engine if they changed since the last update.
    pub async fn try_update_engine(&self) -> Result<(), EngineControllerError> {
        let mut state = self.state.lock().await;
        if !state.need_fcu {
            return Err(EngineControllerError::NoForkchoiceUpdateNeeded);
        }
        if state.el_sync.is_syncing() {
            warn!(target: "engine", "Attempting to update forkchoice state while EL syncing");
        }
        let heads = state.heads;
        if heads.unsafe_head.number < heads.finalized.number {
            return Err(EngineControllerError::UnsafeBehindFinalized {
                unsafe_head: heads.unsafe_head.id(),
                finalized: heads.finalized.id(),
            });
        }

        let updated = timed_call(
            self.engine.forkchoice_update(heads.forkchoice_state(), None),
            crate::Metrics::FORKCHOICE_UPDATE_METHOD,
        )
        .await
        .map_err(EngineControllerError::from_forkchoice)?;

        if updated.payload_status.status.is_valid() {
            self.emit(Event::ForkchoiceUpdate {
                unsafe_head: heads.unsafe_head,
                safe_head: heads.safe,
                finalized: heads.finalized,
            })
            .await;
        }
        if heads.unsafe_head == heads.safe && heads.safe == heads.pending_safe {
            state.set_backup_unsafe(L2BlockRef::default(), false);
        }
        state.need_fcu = false;
        state.log_sync_progress();
        Ok(())
    }

    /// Inserts a payload received outside of derivation and makes it the unsafe head.
    ///
    /// Drives the execution-layer sync state machine when it is enabled.
    pub async fn insert_unsafe_payload(
        &self,
        envelope: &Arc<ExecutionPayloadEnvelope>,
        block: L2BlockRef,
    ) -> Result<(), EngineControllerError> {
        let mut state = self.state.lock().await;

        if state.el_sync == ElSyncState::WillStartEl {
            let finalized = timed_call(
                self.engine.l2_block_ref_by_label(BlockLabel::Finalized),
                crate::Metrics::L2_BLOCK_BY_LABEL_METHOD,
            )
            .await;
            match finalized {
                Err(EngineApiError::NotFound) => state.start_el_sync(),
                Ok(finalized) if finalized.hash == self.config.genesis.l2.hash => {
                    state.start_el_sync()
                }
                Ok(_) if self.sync_config.supports_post_finalization_el_sync => {
                    state.start_el_sync()
                }
                Ok(finalized) => {
                    info!(
                        target: "engine",
                        finalized = %finalized.id(),
                        "Skipping EL sync and going straight to CL sync because there is a finalized block"
                    );
                    state.el_sync = ElSyncState::FinishedEl;
                    return Ok(());
                }
                Err(err) => return Err(EngineControllerError::FinalizedLookup(err)),
            }
        }

        let payload = &envelope.execution_payload;
        let status = timed_call(
            self.engine.new_payload(payload.clone(), envelope.parent_beacon_block_root),
            crate::Metrics::NEW_PAYLOAD_METHOD,
        )
        .await
        .map_err(EngineControllerError::NewPayloadFailed)?;

        let status_err = || EngineControllerError::NewPayloadStatus {
            block: payload.id(),
            parent: payload.parent_id(),
            status: status.status.clone(),
        };
        if status.status.is_invalid() {
            self.emit(Event::PayloadInvalid {
                envelope: Arc::clone(envelope),
                err: EventError::new(status_err()),
            })
            .await;
        }
        let sync_mode = self.sync_config.sync_mode;
        if !state.el_sync.check_new_payload_status(sync_mode, &status.status) {
            return Err(status_err());
        }

        let mut forkchoice = state.heads.forkchoice_state();
        forkchoice.head_block_hash = payload.block_hash;
        if state.el_sync == ElSyncState::FinishedElButNotFinalized {
            forkchoice.safe_block_hash = payload.block_hash;
            forkchoice.finalized_block_hash = payload.block_hash;
            state.set_unsafe(block);
            state.set_cross_unsafe(block);
            self.emit(Event::UnsafeUpdate { block }).await;
            state.set_pending_safe(block);
            state.set_local_safe(block);
            state.set_safe(block);
            self.emit(Event::CrossSafeUpdate { cross_safe: block, local_safe: block }).await;
            state.set_finalized(block);
        }

        let updated = timed_call(
            self.engine.forkchoice_update(forkchoice, None),
            crate::Metrics::FORKCHOICE_UPDATE_METHOD,
        )
        .await
        .map_err(EngineControllerError::from_forkchoice)?;
        let fcu_status = updated.payload_status.status;
        if !state.el_sync.check_forkchoice_status(sync_mode, &fcu_status) {
            return Err(EngineControllerError::ForkchoiceStatus(fcu_status));
        }

        state.set_unsafe(block);
        state.set_cross_unsafe(block);
        state.need_fcu = false;
        self.emit(Event::UnsafeUpdate { block }).await;
        self.emit(Event::CrossUnsafeUpdate { cross_unsafe: block, local_unsafe: block }).await;

        if state.el_sync == ElSyncState::FinishedElButNotFinalized {
            info!(
                target: "engine",
                sync_duration = ?state.el_started.map(|start| start.elapsed()),
                finalized_block = %block.id(),
                "Finished EL sync"
            );
            state.el_sync = ElSyncState::FinishedEl;
        }
        if fcu_status.is_valid() {
            self.emit(Event::ForkchoiceUpdate {
                unsafe_head: block,
                safe_head: state.heads.safe,
                finalized: state.heads.finalized,
            })
            .await;
        }
        state.log_sync_progress();
        Ok(())
    }

    /// Reorgs the engine back to the backup-unsafe head when a reorg was requested.
    ///
    /// Returns `true` if a forkchoice update was sent.
    pub async fn try_backup_unsafe_reorg(&self) -> Result<bool, EngineControllerError> {
        let mut state = self.state.lock().await;
        if !state.need_fcu_for_backup_unsafe_reorg {
            return Ok(false);
        }
        if state.el_sync.is_syncing() {
            warn!(target: "engine", "Attempting to unsafe reorg using backupUnsafe while engine syncing");
            return Ok(false);
        }
        let backup = state.heads.backup_unsafe;
        if backup.is_zero() {
            warn!(target: "engine", "Attempting to unsafe reorg using backupUnsafe even though it is empty");
            state.set_backup_unsafe(L2BlockRef::default(), false);
            return Ok(false);
        }

        // Only retried when the engine could not be reached.
        state.need_fcu_for_backup_unsafe_reorg = false;
        warn!(
            target: "engine",
            backup_unsafe = %backup.id(),
            unsafe_head = %state.heads.unsafe_head.id(),
            "Trying to restore unsafe head"
        );
        let mut forkchoice = state.heads.forkchoice_state();
        forkchoice.head_block_hash = backup.hash;

        let updated = match timed_call(
            self.engine.forkchoice_update(forkchoice, None),
            crate::Metrics::FORKCHOICE_UPDATE_METHOD,
        )
        .await
        {
            Ok(updated) => updated,
            Err(err) => {
                if err.is_input_error() {
                    state.set_backup_unsafe(L2BlockRef::default(), false);
                } else {
                    state.need_fcu_for_backup_unsafe_reorg = true;
                }
                return Err(EngineControllerError::from_forkchoice(err));
            }
        };

        let status = updated.payload_status.status;
        if status.is_valid() {
            self.emit(Event::ForkchoiceUpdate {
                unsafe_head: backup,
                safe_head: state.heads.safe,
                finalized: state.heads.finalized,
            })
            .await;
            info!(target: "engine", unsafe_head = %backup.id(), "Successfully reorged unsafe head using backupUnsafe");
            state.set_unsafe(backup);
            state.set_cross_unsafe(backup);
            state.set_backup_unsafe(L2BlockRef::default(), false);
            self.emit(Event::UnsafeUpdate { block: backup }).await;
            self.emit(Event::CrossUnsafeUpdate { cross_unsafe: backup, local_unsafe: backup })
                .await;
            state.log_sync_progress();
            return Ok(true);
        }

        state.set_backup_unsafe(L2BlockRef::default(), false);
        Err(EngineControllerError::ForkchoiceStatus(status))
    }

    /// Cancels an outstanding build job. Called on shutdown.
    pub async fn close(&self) {
        let building = self.state.lock().await.building.take();
        if let Some(info) = building {
            self.emit(Event::BuildCancel { info, force: true }).await;
        }
    }

    async fn on_force_reset(
        &self,
        unsafe_head: L2BlockRef,
        safe_head: L2BlockRef,
        finalized: L2BlockRef,
    ) {
        self.state.lock().await.force_reset(unsafe_head, safe_head, finalized);
        tiller_macros::inc!(counter, crate::Metrics::ENGINE_RESET_COUNT);

        self.emit(Event::EngineResetConfirmed { unsafe_head, safe_head, finalized }).await;
        self.emit(Event::TryUpdateEngine).await;
        info!(
            target: "engine",
            unsafe_head = %unsafe_head.id(),
            safe_head = %safe_head.id(),
            finalized = %finalized.id(),
            "Reset of engine is completed"
        );
    }

    async fn on_promote_finalized(&self, block: L2BlockRef) {
        let mut state = self.state.lock().await;
        if block.number < state.heads.finalized.number {
            error!(
                target: "engine",
                block = %block.id(),
                finalized = %state.heads.finalized.id(),
                "Cannot rewind finality"
            );
            return;
        }
        if block.number > state.heads.safe.number {
            error!(
                target: "engine",
                block = %block.id(),
                safe = %state.heads.safe.id(),
                "Block must be safe before it can be finalized"
            );
            return;
        }
        state.set_finalized(block);
        self.emit(Event::FinalizedUpdate { block }).await;
        self.emit(Event::TryUpdateEngine).await;
    }

    async fn on_process_unsafe_payload(&self, envelope: &Arc<ExecutionPayloadEnvelope>) {
        let block =
            match L2BlockRef::from_payload(&envelope.execution_payload, &self.config.genesis) {
                Ok(block) => block,
                Err(err) => {
                    error!(target: "engine", %err, "Failed to decode L2 block ref from payload");
                    return;
                }
            };
        let txs = envelope.execution_payload.transactions.len();
        match self.insert_unsafe_payload(envelope, block).await {
            Ok(()) => info!(target: "engine", block = %block.id(), txs, "Successfully processed payload"),
            Err(err) => {
                info!(target: "engine", block = %block.id(), txs, %err, "Failed to insert payload");
                self.emit(err.into_event()).await;
            }
        }
    }

    async fn report(&self, result: Result<(), EngineControllerError>) {
        match result {
            Ok(()) | Err(EngineControllerError::NoForkchoiceUpdateNeeded) => {}
            Err(err) => self.emit(err.into_event()).await,
        }
    }
}

#[async_trait::async_trait]
impl<E: EngineApi> Deriver for EngineController<E> {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::TryUpdateEngine => {
                let result = self.try_update_engine().await;
                self.report(result).await;
            }
            Event::ProcessUnsafePayload { envelope } => {
                self.on_process_unsafe_payload(envelope).await;
            }
            Event::ForkchoiceRequest => {
                let heads = self.heads().await;
                self.emit(Event::ForkchoiceUpdate {
                    unsafe_head: heads.unsafe_head,
                    safe_head: heads.safe,
                    finalized: heads.finalized,
                })
                .await;
            }
            Event::PendingSafeRequest => {
                let heads = self.heads().await;
                self.emit(Event::PendingSafeUpdate {
                    pending_safe: heads.pending_safe,
                    unsafe_head: heads.unsafe_head,
                })
                .await;
            }
            Event::ForceEngineReset { unsafe_head, safe_head, finalized } => {
                self.on_force_reset(*unsafe_head, *safe_head, *finalized).await;
            }
            Event::PromoteFinalized { block } => self.on_promote_finalized(*block).await,
            Event::TryBackupUnsafeReorg => {
                let result = self.try_backup_unsafe_reorg().await.map(|_| ());
                self.report(result).await;
            }
            Event::BuildStart { attributes } => self.on_build_start(attributes).await,
            Event::BuildStarted { info, build_started, is_last_in_span, derived_from, .. } => {
                self.on_build_started(*info, *build_started, *is_last_in_span, *derived_from).await
            }
            Event::BuildSeal { info, build_started, is_last_in_span, derived_from } => {
                self.on_build_seal(*info, *build_started, *is_last_in_span, *derived_from).await
            }
            Event::BuildSealed { envelope, block, is_last_in_span, derived_from, .. } => {
                self.on_build_sealed(envelope, *block, *is_last_in_span, *derived_from).await
            }
            Event::BuildInvalid { attributes, err } => {
                self.on_build_invalid(attributes, err).await
            }
            Event::BuildCancel { info, force } => self.on_build_cancel(*info, *force).await,
            Event::PayloadProcess { envelope, block, is_last_in_span, derived_from } => {
                self.on_payload_process(envelope, *block, *is_last_in_span, *derived_from).await
            }
            Event::PayloadSuccess { envelope, block, is_last_in_span, derived_from } => {
                self.on_payload_success(envelope, *block, *is_last_in_span, *derived_from).await
            }
            Event::PayloadInvalid { envelope, err } => {
                error!(
                    target: "engine",
                    block = %envelope.execution_payload.id(),
                    %err,
                    "Failed to process payload"
                );
            }
            _ => return false,
        }
        true
    }
}
