//! Block building and payload processing.

use super::EngineController;
use crate::{
    BuildStartError, EngineApi, EngineApiError, EngineControllerError, EngineSyncingError,
    api::timed_call,
};
use alloy_rpc_types_engine::{ForkchoiceState, PayloadId, PayloadStatusEnum};
use std::{sync::Arc, time::Instant};
use tiller_event::{Event, EventError};
use tiller_protocol::{
    AttributesWithParent, ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef, PayloadAttributes,
    PayloadInfo, sanity_check_payload,
};

impl<E: EngineApi> EngineController<E> {
    /// Starts a build job on the engine.
    async fn start_payload(
        &self,
        forkchoice: ForkchoiceState,
        attributes: PayloadAttributes,
    ) -> Result<PayloadId, BuildStartError> {
        let updated = timed_call(
            self.engine.forkchoice_update(forkchoice, Some(attributes)),
            crate::Metrics::FORKCHOICE_UPDATE_METHOD,
        )
        .await
        .map_err(BuildStartError::from_engine)?;

        match updated.payload_status.status {
            PayloadStatusEnum::Valid => updated.payload_id.ok_or(BuildStartError::MissingPayloadId),
            PayloadStatusEnum::Invalid { validation_error } => {
                Err(BuildStartError::InvalidStatus(validation_error))
            }
            PayloadStatusEnum::Syncing => Err(BuildStartError::Syncing(EngineSyncingError)),
            status => Err(BuildStartError::UnexpectedStatus(status)),
        }
    }

    pub(super) async fn on_build_start(&self, attributes: &Arc<AttributesWithParent>) {
        let mut state = self.state.lock().await;
        let parent = attributes.parent;
        let (safe_head, finalized) = (state.heads.safe, state.heads.finalized);
        if parent.number < finalized.number {
            let err = EngineControllerError::UnsafeBehindFinalized {
                unsafe_head: parent.id(),
                finalized: finalized.id(),
            };
            self.emit(err.into_event()).await;
            return;
        }

        let forkchoice = ForkchoiceState {
            head_block_hash: parent.hash,
            safe_block_hash: safe_head.hash,
            finalized_block_hash: finalized.hash,
        };
        let build_started = Instant::now();
        let id = match self.start_payload(forkchoice, attributes.attributes.clone()).await {
            Ok(id) => id,
            Err(err) if err.is_invalid_attributes() => {
                self.emit(Event::BuildInvalid {
                    attributes: Arc::clone(attributes),
                    err: EventError::new(err),
                })
                .await;
                return;
            }
            Err(err) => {
                warn!(target: "engine", parent = %parent.id(), %err, "Failed to start block building");
                self.emit(err.severity().into_event(EventError::new(err))).await;
                return;
            }
        };

        let info = PayloadInfo::new(id, attributes.attributes.timestamp);
        state.building = Some(info);
        debug!(target: "engine", %info, parent = %parent.id(), "Started block building");
        self.emit(Event::ForkchoiceUpdate { unsafe_head: parent, safe_head, finalized }).await;
        self.emit(Event::BuildStarted {
            info,
            build_started,
            parent,
            is_last_in_span: attributes.is_last_in_span,
            derived_from: attributes.derived_from,
        })
        .await;
    }

    pub(super) async fn on_build_started(
        &self,
        info: PayloadInfo,
        build_started: Instant,
        is_last_in_span: bool,
        derived_from: Option<L1BlockRef>,
    ) {
        // Derived blocks are sealed right away. The sequencer seals its own.
        if derived_from.is_some() {
            self.emit(Event::BuildSeal { info, build_started, is_last_in_span, derived_from })
                .await;
        }
    }

    pub(super) async fn on_build_seal(
        &self,
        info: PayloadInfo,
        build_started: Instant,
        is_last_in_span: bool,
        derived_from: Option<L1BlockRef>,
    ) {
        {
            let mut state = self.state.lock().await;
            if state.building == Some(info) {
                state.building = None;
            }
        }

        let sealing_start = Instant::now();
        let sealed =
            timed_call(self.engine.get_payload(info), crate::Metrics::GET_PAYLOAD_METHOD).await;
        let envelope = match sealed {
            Ok(envelope) => envelope,
            Err(EngineApiError::UnknownPayload) => {
                warn!(target: "engine", %info, "Build job expired before it was sealed");
                self.emit(Event::PayloadSealExpiredError {
                    info,
                    err: EventError::new(EngineApiError::UnknownPayload),
                    is_last_in_span,
                    derived_from,
                })
                .await;
                return;
            }
            Err(err) => {
                warn!(target: "engine", %info, %err, "Failed to seal execution payload");
                self.emit(Event::PayloadSealTemporaryError {
                    info,
                    err: EventError::new(err),
                    is_last_in_span,
                    derived_from,
                })
                .await;
                return;
            }
        };

        let payload = &envelope.execution_payload;
        let block = match sanity_check_payload(payload)
            .map_err(EventError::new)
            .and_then(|()| {
                L2BlockRef::from_payload(payload, &self.config.genesis).map_err(EventError::new)
            }) {
            Ok(block) => block,
            Err(err) => {
                warn!(target: "engine", %info, block = %payload.id(), %err, "Sealed payload is invalid");
                self.emit(Event::PayloadSealInvalid { info, err, is_last_in_span, derived_from })
                    .await;
                return;
            }
        };

        let seal_time = sealing_start.elapsed();
        let build_time = build_started.elapsed();
        let txs = payload.transactions.len();
        tiller_macros::record!(
            histogram,
            crate::Metrics::SEALING_DURATION,
            seal_time.as_secs_f64()
        );
        tiller_macros::record!(
            histogram,
            crate::Metrics::BUILD_DIFF_DURATION,
            build_time.as_secs_f64() - self.config.block_time as f64
        );
        tiller_macros::record!(histogram, crate::Metrics::SEQUENCED_TXS, txs as f64);
        debug!(
            target: "engine",
            block = %block,
            l1_origin = %block.l1_origin,
            seq_num = block.sequence_number,
            txs,
            ?seal_time,
            ?build_time,
            "Processed new L2 block"
        );

        self.emit(Event::BuildSealed {
            info,
            envelope: Arc::new(envelope),
            block,
            build_started,
            is_last_in_span,
            derived_from,
        })
        .await;
    }

    pub(super) async fn on_build_sealed(
        &self,
        envelope: &Arc<ExecutionPayloadEnvelope>,
        block: L2BlockRef,
        is_last_in_span: bool,
        derived_from: Option<L1BlockRef>,
    ) {
        // Derived blocks are inserted right away. The sequencer submits its own.
        if derived_from.is_some() {
            self.emit(Event::PayloadProcess {
                envelope: Arc::clone(envelope),
                block,
                is_last_in_span,
                derived_from,
            })
            .await;
        }
    }

    pub(super) async fn on_build_invalid(
        &self,
        attributes: &Arc<AttributesWithParent>,
        err: &EventError,
    ) {
        warn!(target: "engine", %err, "Could not process payload attributes");
        if attributes.is_deposits_only() {
            error!(
                target: "engine",
                parent = %attributes.parent.id(),
                %err,
                "Deposit only block was invalid"
            );
            self.emit(EngineControllerError::DepositOnlyInvalid(err.to_string()).into_event())
                .await;
            return;
        }

        let mut state = self.state.lock().await;
        let safe = state.heads.safe;
        state.set_pending_safe(safe);
        let backup = state.heads.backup_unsafe;
        state.set_backup_unsafe(backup, true);

        self.emit(Event::InvalidPayloadAttributes {
            attributes: Arc::clone(attributes),
            err: err.clone(),
        })
        .await;
        if !backup.is_zero() {
            self.emit(Event::TryBackupUnsafeReorg).await;
        }
    }

    pub(super) async fn on_build_cancel(&self, info: PayloadInfo, force: bool) {
        {
            let mut state = self.state.lock().await;
            if state.building == Some(info) {
                state.building = None;
            }
        }

        // The engine stops a job once its payload is retrieved.
        warn!(target: "engine", %info, "Cancelling old block building job");
        match timed_call(self.engine.get_payload(info), crate::Metrics::GET_PAYLOAD_METHOD).await {
            Ok(_) | Err(EngineApiError::UnknownPayload) => {}
            Err(err) => {
                error!(target: "engine", %info, %err, "Failed to cancel block building job");
                if !force {
                    self.emit(Event::EngineTemporaryError { err: EventError::new(err) }).await;
                }
            }
        }
    }

    pub(super) async fn on_payload_process(
        &self,
        envelope: &Arc<ExecutionPayloadEnvelope>,
        block: L2BlockRef,
        is_last_in_span: bool,
        derived_from: Option<L1BlockRef>,
    ) {
        let payload = &envelope.execution_payload;
        let status = match timed_call(
            self.engine.new_payload(payload.clone(), envelope.parent_beacon_block_root),
            crate::Metrics::NEW_PAYLOAD_METHOD,
        )
        .await
        {
            Ok(status) => status.status,
            Err(err) => {
                let err = EngineControllerError::NewPayloadFailed(err);
                self.emit(Event::EngineTemporaryError { err: EventError::new(err) }).await;
                return;
            }
        };

        let status_err = |status: PayloadStatusEnum| {
            EventError::new(EngineControllerError::NewPayloadStatus {
                block: payload.id(),
                parent: payload.parent_id(),
                status,
            })
        };
        match status {
            PayloadStatusEnum::Valid => {
                self.emit(Event::PayloadSuccess {
                    envelope: Arc::clone(envelope),
                    block,
                    is_last_in_span,
                    derived_from,
                })
                .await;
            }
            status @ PayloadStatusEnum::Invalid { .. } => {
                self.emit(Event::PayloadInvalid {
                    envelope: Arc::clone(envelope),
                    err: status_err(status),
                })
                .await;
            }
            status => {
                self.emit(Event::EngineTemporaryError { err: status_err(status) }).await;
            }
        }
    }

    pub(super) async fn on_payload_success(
        &self,
        envelope: &Arc<ExecutionPayloadEnvelope>,
        block: L2BlockRef,
        is_last_in_span: bool,
        derived_from: Option<L1BlockRef>,
    ) {
        let mut state = self.state.lock().await;
        let unsafe_head = state.heads.unsafe_head;
        if unsafe_head.number >= block.number {
            state.set_backup_unsafe(unsafe_head, false);
        }
        state.set_unsafe(block);
        state.set_cross_unsafe(block);
        self.emit(Event::UnsafeUpdate { block }).await;
        self.emit(Event::CrossUnsafeUpdate { cross_unsafe: block, local_unsafe: block }).await;

        if let Some(derived_from) = derived_from {
            state.set_pending_safe(block);
            self.emit(Event::PendingSafeUpdate { pending_safe: block, unsafe_head: block }).await;
            if is_last_in_span {
                state.set_local_safe(block);
                state.set_safe(block);
                self.emit(Event::LocalSafeUpdate { local_safe: block, derived_from }).await;
                self.emit(Event::CrossSafeUpdate { cross_safe: block, local_safe: block }).await;
                self.emit(Event::SafeDerived { safe_head: block, derived_from }).await;
            }
        }

        let payload = &envelope.execution_payload;
        info!(
            target: "engine",
            block = %block,
            parent = %block.parent_hash,
            time = block.time,
            l1_origin = %block.l1_origin,
            txs = payload.transactions.len(),
            gas_used = payload.gas_used,
            derived = derived_from.is_some(),
            "Inserted new L2 block"
        );
        self.emit(Event::TryUpdateEngine).await;
    }
}
