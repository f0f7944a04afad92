//! A cache of the recent L1 head chain.

use alloy_primitives::B256;
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tiller_event::{Deriver, Event};
use tiller_protocol::{BlockLabel, L1BlockRef, L1FetchError, L1Fetcher};

/// Number of L1 blocks the [`L1Tracker`] remembers.
pub const L1_TRACKER_CAPACITY: usize = 1000;

/// A bounded run of consecutive L1 blocks, oldest first.
///
/// Every block in the buffer is the child of the one before it.
#[derive(Debug, Clone)]
pub struct L1HeadBuffer {
    blocks: VecDeque<L1BlockRef>,
    capacity: usize,
}

impl L1HeadBuffer {
    /// Creates an empty buffer holding at most `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self { blocks: VecDeque::with_capacity(capacity), capacity }
    }

    /// Number of cached blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Records a new L1 head.
    ///
    /// A head extending a cached block replaces everything after that block. Any other head
    /// starts a new run.
    pub fn insert(&mut self, head: L1BlockRef) {
        let extends = head
            .number
            .checked_sub(1)
            .and_then(|parent| self.get(parent))
            .is_some_and(|parent| parent.hash == head.parent_hash);
        if extends {
            let keep = self.index_of(head.number).unwrap_or(self.blocks.len());
            self.blocks.truncate(keep);
        } else {
            if !self.blocks.is_empty() {
                debug!(
                    target: "l1_tracker",
                    head = %head.id(),
                    parent = %head.parent_hash,
                    "L1 head does not extend the cached chain, dropping cache"
                );
            }
            self.blocks.clear();
        }
        if self.blocks.len() >= self.capacity {
            self.blocks.pop_front();
        }
        self.blocks.push_back(head);
    }

    /// The cached block at `number`.
    pub fn get(&self, number: u64) -> Option<L1BlockRef> {
        self.index_of(number).and_then(|index| self.blocks.get(index)).copied()
    }

    fn index_of(&self, number: u64) -> Option<usize> {
        let first = self.blocks.front()?.number;
        let offset = usize::try_from(number.checked_sub(first)?).ok()?;
        (offset < self.blocks.len()).then_some(offset)
    }
}

/// An [`L1Fetcher`] answering lookups by number near the L1 head from a cache.
///
/// The cache follows [`Event::L1Unsafe`]. Everything else is served by the inner fetcher.
#[derive(Debug)]
pub struct L1Tracker<F> {
    inner: F,
    cache: Mutex<L1HeadBuffer>,
}

impl<F: L1Fetcher> L1Tracker<F> {
    /// Wraps `inner` with a cache of [`L1_TRACKER_CAPACITY`] blocks.
    pub fn new(inner: F) -> Self {
        Self { inner, cache: Mutex::new(L1HeadBuffer::new(L1_TRACKER_CAPACITY)) }
    }

    /// Records a new L1 head.
    pub fn insert(&self, head: L1BlockRef) {
        self.cache().insert(head);
    }

    /// The cached block at `number`, if any.
    pub fn cached(&self, number: u64) -> Option<L1BlockRef> {
        self.cache().get(number)
    }

    fn cache(&self) -> MutexGuard<'_, L1HeadBuffer> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<F: L1Fetcher> L1Fetcher for L1Tracker<F> {
    async fn l1_block_ref_by_number(&self, number: u64) -> Result<L1BlockRef, L1FetchError> {
        if let Some(block) = self.cached(number) {
            return Ok(block);
        }
        self.inner.l1_block_ref_by_number(number).await
    }

    async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<L1BlockRef, L1FetchError> {
        self.inner.l1_block_ref_by_hash(hash).await
    }

    async fn l1_block_ref_by_label(&self, label: BlockLabel) -> Result<L1BlockRef, L1FetchError> {
        self.inner.l1_block_ref_by_label(label).await
    }
}

#[async_trait]
impl<F: L1Fetcher> Deriver for L1Tracker<F> {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::L1Unsafe { l1_unsafe } => self.insert(*l1_unsafe),
            _ => return false,
        }
        true
    }
}
