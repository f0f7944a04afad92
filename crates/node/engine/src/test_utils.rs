//! An in-memory execution engine for tests.

use crate::{EngineApi, EngineApiError};
use alloy_primitives::{B256, keccak256};
use alloy_rpc_types_engine::{
    ForkchoiceState, ForkchoiceUpdated, PayloadId, PayloadStatus, PayloadStatusEnum,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tiller_protocol::{
    BlockLabel, ExecutionPayload, ExecutionPayloadEnvelope, L2BlockRef, PayloadAttributes,
    PayloadInfo,
};

/// An [`EngineApi`] that builds and accepts blocks in memory.
///
/// Built payloads extend the head of the forkchoice state they were started with and carry
/// the attribute transactions verbatim. Every call is recorded.
#[derive(Debug, Default)]
pub struct TestEngine {
    inner: Mutex<TestEngineState>,
}

#[derive(Debug, Default)]
struct TestEngineState {
    numbers: HashMap<B256, u64>,
    jobs: HashMap<PayloadId, (ForkchoiceState, PayloadAttributes)>,
    next_id: u64,
    forkchoice_calls: Vec<ForkchoiceState>,
    new_payload_calls: Vec<ExecutionPayload>,
    forkchoice_status: Option<PayloadStatusEnum>,
    new_payload_status: Option<PayloadStatusEnum>,
    failure: Option<EngineApiError>,
    finalized: Option<L2BlockRef>,
}

impl TestEngine {
    /// Creates an engine that knows no blocks.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TestEngineState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `block` known, so payloads built on top of it get the next number.
    pub fn insert_block(&self, block: &L2BlockRef) {
        self.lock().numbers.insert(block.hash, block.number);
    }

    /// Overrides the status of forkchoice updates. `None` restores `VALID`.
    pub fn set_forkchoice_status(&self, status: Option<PayloadStatusEnum>) {
        self.lock().forkchoice_status = status;
    }

    /// Overrides the status of new-payload calls. `None` restores `VALID`.
    pub fn set_new_payload_status(&self, status: Option<PayloadStatusEnum>) {
        self.lock().new_payload_status = status;
    }

    /// Makes every call fail with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<EngineApiError>) {
        self.lock().failure = err;
    }

    /// Sets the block returned for [`BlockLabel::Finalized`].
    pub fn set_finalized(&self, block: Option<L2BlockRef>) {
        self.lock().finalized = block;
    }

    /// Every forkchoice state received, in order.
    pub fn forkchoice_calls(&self) -> Vec<ForkchoiceState> {
        self.lock().forkchoice_calls.clone()
    }

    /// Every payload received through `new_payload`, in order.
    pub fn new_payload_calls(&self) -> Vec<ExecutionPayload> {
        self.lock().new_payload_calls.clone()
    }

    fn check_failure(&self) -> Result<MutexGuard<'_, TestEngineState>, EngineApiError> {
        let state = self.lock();
        match &state.failure {
            Some(err) => Err(err.clone()),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl EngineApi for TestEngine {
    async fn forkchoice_update(
        &self,
        forkchoice: ForkchoiceState,
        attributes: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineApiError> {
        let mut state = self.check_failure()?;
        state.forkchoice_calls.push(forkchoice);
        let status = state.forkchoice_status.clone().unwrap_or(PayloadStatusEnum::Valid);
        let mut updated = ForkchoiceUpdated::new(PayloadStatus::from_status(status.clone()));
        if let (Some(attributes), PayloadStatusEnum::Valid) = (attributes, status) {
            state.next_id += 1;
            let id = PayloadId::new(state.next_id.to_be_bytes());
            state.jobs.insert(id, (forkchoice, attributes));
            updated = updated.with_payload_id(id);
        }
        Ok(updated)
    }

    async fn get_payload(
        &self,
        info: PayloadInfo,
    ) -> Result<ExecutionPayloadEnvelope, EngineApiError> {
        let mut state = self.check_failure()?;
        let (forkchoice, attributes) =
            state.jobs.remove(&info.id).ok_or(EngineApiError::UnknownPayload)?;
        let parent = forkchoice.head_block_hash;
        let number = state.numbers.get(&parent).map_or(1, |n| n + 1);

        let mut preimage = parent.to_vec();
        preimage.extend_from_slice(&attributes.timestamp.to_be_bytes());
        let block_hash = keccak256(&preimage);
        state.numbers.insert(block_hash, number);

        let execution_payload = ExecutionPayload {
            parent_hash: parent,
            fee_recipient: attributes.suggested_fee_recipient,
            state_root: B256::repeat_byte(0x5e),
            receipts_root: B256::repeat_byte(0x7c),
            prev_randao: attributes.prev_randao,
            block_number: number,
            gas_limit: attributes.gas_limit.unwrap_or(30_000_000),
            timestamp: attributes.timestamp,
            block_hash,
            transactions: attributes.transactions.unwrap_or_default(),
            ..Default::default()
        };
        Ok(ExecutionPayloadEnvelope {
            execution_payload,
            parent_beacon_block_root: attributes.parent_beacon_block_root,
        })
    }

    async fn new_payload(
        &self,
        payload: ExecutionPayload,
        _parent_beacon_block_root: Option<B256>,
    ) -> Result<PayloadStatus, EngineApiError> {
        let mut state = self.check_failure()?;
        state.numbers.insert(payload.block_hash, payload.block_number);
        state.new_payload_calls.push(payload);
        let status = state.new_payload_status.clone().unwrap_or(PayloadStatusEnum::Valid);
        Ok(PayloadStatus::from_status(status))
    }

    async fn l2_block_ref_by_label(
        &self,
        label: BlockLabel,
    ) -> Result<L2BlockRef, EngineApiError> {
        let state = self.check_failure()?;
        match label {
            BlockLabel::Finalized => state.finalized.ok_or(EngineApiError::NotFound),
            _ => Err(EngineApiError::NotFound),
        }
    }
}
