//! Deterministic fixtures for tests.

use crate::{
    BlockId, BlockLabel, ExecutionPayload, L1BlockInfo, L1BlockRef, L1FetchError, L1Fetcher,
    L2BlockRef,
};
use alloy_primitives::{B256, Bytes};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

/// L1 block time used by the fixtures.
pub const L1_BLOCK_TIME: u64 = 12;

/// Deterministic hash of L1 block `number`.
pub fn l1_hash(number: u64) -> B256 {
    tagged_hash(0xa1, number)
}

/// Deterministic hash of L2 block `number`.
pub fn l2_hash(number: u64) -> B256 {
    tagged_hash(0xb2, number)
}

fn tagged_hash(tag: u8, number: u64) -> B256 {
    let mut bytes = [tag; 32];
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(bytes)
}

/// The canonical L1 block at `number`, [`L1_BLOCK_TIME`] seconds apart.
pub fn l1_ref(number: u64) -> L1BlockRef {
    L1BlockRef {
        hash: l1_hash(number),
        number,
        parent_hash: if number == 0 { B256::ZERO } else { l1_hash(number - 1) },
        time: number * L1_BLOCK_TIME,
    }
}

/// The canonical L2 block at `number` with the given timestamp and origin.
pub fn l2_ref(number: u64, time: u64, origin: &L1BlockRef, sequence_number: u64) -> L2BlockRef {
    L2BlockRef {
        hash: l2_hash(number),
        number,
        parent_hash: if number == 0 { B256::ZERO } else { l2_hash(number - 1) },
        time,
        l1_origin: origin.id(),
        sequence_number,
    }
}

/// A minimal payload for L2 block `number` whose L1-info deposit references `origin`.
pub fn payload_with_origin(
    number: u64,
    time: u64,
    origin: &L1BlockRef,
    sequence_number: u64,
) -> ExecutionPayload {
    let block = l2_ref(number, time, origin, sequence_number);
    payload_for(&block)
}

/// A minimal payload matching `block`.
pub fn payload_for(block: &L2BlockRef) -> ExecutionPayload {
    let info = L1BlockInfo {
        number: block.l1_origin.number,
        hash: block.l1_origin.hash,
        sequence_number: block.sequence_number,
        ..Default::default()
    };
    ExecutionPayload {
        parent_hash: block.parent_hash,
        state_root: B256::repeat_byte(0x5e),
        receipts_root: B256::repeat_byte(0x7c),
        block_number: block.number,
        timestamp: block.time,
        gas_limit: 30_000_000,
        block_hash: block.hash,
        transactions: vec![info.to_deposit_tx()],
        ..Default::default()
    }
}

/// A payload with a user transaction appended after the deposit.
pub fn payload_with_user_tx(block: &L2BlockRef) -> ExecutionPayload {
    let mut payload = payload_for(block);
    payload.transactions.push(Bytes::from_static(&[0x02, 0xc0]));
    payload
}

/// An in-memory [`L1Fetcher`] over the [`l1_ref`] chain.
#[derive(Debug, Default)]
pub struct TestL1Fetcher {
    inner: Mutex<TestL1State>,
}

#[derive(Debug, Default)]
struct TestL1State {
    blocks: HashMap<u64, L1BlockRef>,
    labels: HashMap<BlockLabel, L1BlockRef>,
    failure: Option<L1FetchError>,
}

impl TestL1Fetcher {
    /// Creates a fetcher knowing blocks `0..=head`, with `head` as the latest block.
    pub fn with_chain(head: u64) -> Self {
        let fetcher = Self::default();
        for n in 0..=head {
            fetcher.insert(l1_ref(n));
        }
        fetcher.set_label(BlockLabel::Latest, l1_ref(head));
        fetcher
    }

    /// Adds a block.
    pub fn insert(&self, block: L1BlockRef) {
        self.lock().blocks.insert(block.number, block);
    }

    /// Points `label` at `block`.
    pub fn set_label(&self, label: BlockLabel, block: L1BlockRef) {
        self.lock().labels.insert(label, block);
    }

    /// Makes every lookup fail with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<L1FetchError>) {
        self.lock().failure = err;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TestL1State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl L1Fetcher for TestL1Fetcher {
    async fn l1_block_ref_by_number(&self, number: u64) -> Result<L1BlockRef, L1FetchError> {
        let state = self.lock();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        state.blocks.get(&number).copied().ok_or(L1FetchError::NotFound)
    }

    async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<L1BlockRef, L1FetchError> {
        let state = self.lock();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        state.blocks.values().find(|b| b.hash == hash).copied().ok_or(L1FetchError::NotFound)
    }

    async fn l1_block_ref_by_label(&self, label: BlockLabel) -> Result<L1BlockRef, L1FetchError> {
        let state = self.lock();
        if let Some(err) = &state.failure {
            return Err(err.clone());
        }
        state.labels.get(&label).copied().ok_or(L1FetchError::NotFound)
    }
}

/// The [`BlockId`] of L2 block `number` on the fixture chain.
pub fn l2_id(number: u64) -> BlockId {
    BlockId::new(l2_hash(number), number)
}
