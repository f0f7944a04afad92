//! Reactions of the sequencer to engine events.

use super::{
    ENGINE_ERROR_BACKOFF, ENGINE_SYNCING_BACKOFF, SEALING_DURATION, Sequencer,
    state::{BuildJob, BuildingState, SequencerState},
};
use crate::{
    ATTRIBUTES_TIMEOUT, AttributesBuilder, AttributesBuilderError, CONDUCTOR_COMMIT_TIMEOUT,
    ConductorError, SequencerError,
};
use std::{
    sync::Arc,
    time::{Instant, SystemTime},
};
use tiller_engine::EngineSyncingError;
use tiller_event::{Event, EventError};
use tiller_protocol::{
    AttributesWithParent, ExecutionPayloadEnvelope, Fork, L1BlockRef, L1Fetcher, L2BlockRef,
    PayloadInfo,
};

/// Forks whose first block carries no pool transactions.
const UPGRADE_FORKS: [Fork; 5] =
    [Fork::Ecotone, Fork::Fjord, Fork::Granite, Fork::Holocene, Fork::Isthmus];

impl<F: L1Fetcher, B: AttributesBuilder> Sequencer<F, B> {
    /// Abandons the current block and retries a block time later.
    pub(super) fn handle_invalid(&self, state: &mut SequencerState) {
        tiller_macros::inc!(counter, crate::Metrics::SEQUENCING_ERRORS);
        state.latest = BuildingState::default();
        self.gossiper.clear();
        state.next_action = self.now() + self.block_time();
        state.next_action_ok = self.active();
    }

    pub(super) async fn on_build_started(
        &self,
        state: &mut SequencerState,
        info: PayloadInfo,
        build_started: Instant,
        parent: L2BlockRef,
        derived_from: Option<L1BlockRef>,
    ) {
        if let Some(derived_from) = derived_from {
            warn!(
                target: "sequencer",
                %info,
                parent = %parent.id(),
                derived_from = %derived_from.id(),
                "Detected new block-building from L1 derivation, avoiding sequencing for now"
            );
            state.next_action_ok = false;
            return;
        }
        if state.latest.onto != parent {
            warn!(
                target: "sequencer",
                stale = %parent.id(),
                new = %state.latest.onto.id(),
                %info,
                "Canceling stale block-building job that was just started"
            );
            self.emit(Event::BuildCancel { info, force: true }).await;
            self.handle_invalid(state);
            return;
        }

        debug!(
            target: "sequencer",
            %info,
            parent = %parent.id(),
            parent_time = parent.time,
            "Sequencer started building new block"
        );
        state.latest.job = Some(BuildJob { info, started: build_started });
        state.next_action_ok = self.active();

        // Seal ahead of the payload time, or right away when there is no time left.
        let now = self.now();
        let seal_at = self
            .payload_time(&parent)
            .checked_sub(SEALING_DURATION)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        state.next_action = seal_at.max(now);
    }

    pub(super) async fn on_build_sealed(
        &self,
        state: &mut SequencerState,
        info: PayloadInfo,
        envelope: &Arc<ExecutionPayloadEnvelope>,
        block: L2BlockRef,
        is_last_in_span: bool,
        derived_from: Option<L1BlockRef>,
    ) {
        if state.latest.info() != Some(info) {
            return;
        }
        let payload = &envelope.execution_payload;
        info!(
            target: "sequencer",
            %info,
            block = %payload.id(),
            parent = %payload.parent_id(),
            txs = payload.transactions.len(),
            time = payload.timestamp,
            "Sequencer sealed block"
        );

        let committed = tokio::time::timeout(
            CONDUCTOR_COMMIT_TIMEOUT,
            self.conductor.commit_unsafe_payload(envelope),
        )
        .await
        .unwrap_or(Err(ConductorError::Timeout));
        if let Err(err) = committed {
            let err = EventError::new(SequencerError::CommitPayload(err));
            self.emit(Event::EngineTemporaryError { err }).await;
            return;
        }

        // Publish first, then insert locally. The gossiper keeps the payload until it is
        // inserted or found invalid.
        self.gossiper.gossip(Arc::clone(envelope));
        self.emit(Event::PayloadProcess {
            envelope: Arc::clone(envelope),
            block,
            is_last_in_span,
            derived_from,
        })
        .await;
        state.latest.block = block;
        state.latest_sealed = block;
    }

    pub(super) fn on_payload_success(
        &self,
        state: &mut SequencerState,
        envelope: &ExecutionPayloadEnvelope,
        block: L2BlockRef,
    ) {
        // The building state may already be gone if a forkchoice update dropped the job.
        if !state.latest.block.is_zero() && state.latest.block.hash != envelope.block_hash() {
            return;
        }
        state.latest = BuildingState::default();
        info!(
            target: "sequencer",
            block = %block.id(),
            parent = %envelope.execution_payload.parent_id(),
            "Sequencer inserted block"
        );
        self.gossiper.clear();
    }

    pub(super) async fn on_sequencer_action(&self, state: &mut SequencerState) {
        debug!(target: "sequencer", "Sequencer action");
        if let Some(envelope) = self.gossiper.get() {
            if state.latest.job.is_none() {
                warn!(
                    target: "sequencer",
                    block = %envelope.execution_payload.id(),
                    parent = %envelope.parent_hash(),
                    "Found reusable payload from async gossiper, and no block was being built"
                );
            }
            let block = match L2BlockRef::from_payload(
                &envelope.execution_payload,
                &self.config.genesis,
            ) {
                Ok(block) => block,
                Err(err) => {
                    error!(
                        target: "sequencer",
                        %err,
                        "Payload from async-gossip buffer could not be turned into block-ref"
                    );
                    self.gossiper.clear();
                    return;
                }
            };
            info!(
                target: "sequencer",
                block = %block.id(),
                "Resuming sequencing with previously async-gossip confirmed payload"
            );
            self.emit(Event::PayloadProcess {
                envelope,
                block,
                is_last_in_span: false,
                derived_from: None,
            })
            .await;
            state.latest.block = block;
        } else if let Some(job) = state.latest.job {
            // Seal once, then wait for the engine's answer.
            state.next_action_ok = false;
            self.emit(Event::BuildSeal {
                info: job.info,
                build_started: job.started,
                is_last_in_span: false,
                derived_from: None,
            })
            .await;
        } else if state.latest.is_empty() {
            self.start_building_block(state).await;
        }
    }

    pub(super) fn on_engine_temporary_error(&self, state: &mut SequencerState, err: &EventError) {
        if state.latest.is_empty() {
            debug!(
                target: "sequencer",
                %err,
                "Engine reported temporary error, but sequencer is not using engine"
            );
            return;
        }
        error!(target: "sequencer", %err, "Engine failed temporarily, backing off sequencer");
        let backoff = if err.find::<EngineSyncingError>().is_some() {
            ENGINE_SYNCING_BACKOFF
        } else {
            ENGINE_ERROR_BACKOFF
        };
        state.next_action = self.now() + backoff;
        state.next_action_ok = self.active();
        // Without a job to resume, start over. A started job may still be sealed.
        if state.latest.job.is_none() {
            state.latest = BuildingState::default();
        }
    }

    pub(super) async fn on_reset(&self, state: &mut SequencerState, err: &EventError) {
        error!(target: "sequencer", %err, "Sequencer encountered reset signal, aborting work");
        tiller_macros::inc!(counter, crate::Metrics::SEQUENCER_RESETS);
        if let Some(info) = state.latest.info() {
            self.emit(Event::BuildCancel { info, force: false }).await;
        }
        state.latest = BuildingState::default();
        // Nothing to do until the reset is confirmed.
        state.next_action_ok = false;
    }

    pub(super) fn on_forkchoice_update(
        &self,
        state: &mut SequencerState,
        unsafe_head: L2BlockRef,
        safe_head: L2BlockRef,
    ) {
        debug!(
            target: "sequencer",
            unsafe_head = %unsafe_head.id(),
            latest = %state.latest_head.id(),
            "Sequencer is processing forkchoice update"
        );
        if !self.active() {
            self.set_latest_head(state, unsafe_head);
            return;
        }

        // The cleared state makes late answers for the stale job no-ops.
        if !state.latest.is_empty() && state.latest.onto.number < unsafe_head.number {
            debug!(
                target: "sequencer",
                onto = %state.latest.onto.id(),
                unsafe_head = %unsafe_head.id(),
                "Dropping stale/completed block-building job"
            );
            state.latest = BuildingState::default();
        }

        if unsafe_head.number > state.latest_head.number {
            state.next_action_ok = true;
            let now = self.now();
            // Start building no earlier than one block time before the payload time.
            let start_at = self
                .payload_time(&unsafe_head)
                .checked_sub(self.block_time())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            state.next_action = start_at.max(now);
        }

        let max_safe_lag = self.max_safe_lag();
        if max_safe_lag > 0 && safe_head.number.saturating_add(max_safe_lag) <= unsafe_head.number
        {
            warn!(
                target: "sequencer",
                unsafe_head = %unsafe_head.id(),
                safe_head = %safe_head.id(),
                max_safe_lag,
                "Sequencer has fallen behind safe head by more than lag, stalling"
            );
            state.next_action_ok = false;
        }
        self.set_latest_head(state, unsafe_head);
    }

    async fn start_building_block(&self, state: &mut SequencerState) {
        let head = state.latest_head;
        if head.is_zero() {
            self.emit(Event::ForkchoiceRequest).await;
            return;
        }
        if state.latest.onto == head {
            return;
        }

        let origin = match self.origin_selector.find_l1_origin(head).await {
            Ok(origin) => origin,
            Err(err) => {
                error!(target: "sequencer", %err, "Error finding next L1 origin");
                self.emit(err.into_event()).await;
                return;
            }
        };

        if head.l1_origin.hash != origin.parent_hash && head.l1_origin.hash != origin.hash {
            tiller_macros::inc!(counter, crate::Metrics::INCONSISTENT_L1_ORIGIN);
            let err = SequencerError::InconsistentL1Origin {
                origin: origin.id(),
                origin_parent: origin.parent_hash,
                head: head.id(),
                head_origin: head.l1_origin,
            };
            self.emit(Event::Reset { err: EventError::new(err) }).await;
            return;
        }

        info!(
            target: "sequencer",
            parent = %head.id(),
            l1_origin = %origin.id(),
            "Started sequencing new block"
        );
        let started = Instant::now();
        let prepared = tokio::time::timeout(
            ATTRIBUTES_TIMEOUT,
            self.attributes_builder.prepare_payload_attributes(head, origin.id()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(AttributesBuilderError::Temporary("attributes preparation timed out".into()))
        });
        let mut attributes = match prepared {
            Ok(attributes) => attributes,
            Err(err) => {
                warn!(target: "sequencer", %err, "Failed to prepare payload attributes");
                self.emit(err.into_event()).await;
                return;
            }
        };
        let prepare_time = started.elapsed();
        tiller_macros::record!(
            histogram,
            crate::Metrics::ATTRIBUTES_BUILD_DURATION,
            prepare_time.as_secs_f64()
        );
        debug!(target: "sequencer", ?prepare_time, "Prepared payload attributes");

        // Past the drift, blocks only carry deposits.
        let timestamp = attributes.timestamp;
        let drift = self.spec.max_sequencer_drift(origin.time);
        attributes.no_tx_pool = timestamp > origin.time + drift;

        for fork in UPGRADE_FORKS {
            if self.config.is_activation_block(fork, timestamp) {
                info!(target: "sequencer", %fork, "Sequencing upgrade block");
                attributes.no_tx_pool = true;
            }
        }

        debug!(
            target: "sequencer",
            number = head.number + 1,
            time = timestamp,
            l1_origin = %origin.id(),
            origin_time = origin.time,
            no_tx_pool = attributes.no_tx_pool,
            "Prepared attributes for new block"
        );

        // No further action until the engine answers this build.
        state.next_action_ok = false;
        state.latest = BuildingState { onto: head, ..Default::default() };
        self.emit(Event::BuildStart {
            attributes: Arc::new(AttributesWithParent::new(attributes, head, None, false)),
        })
        .await;
    }
}
