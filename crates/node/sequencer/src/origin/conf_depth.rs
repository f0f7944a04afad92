//! An [`L1Fetcher`] that hides blocks close to the L1 head.

use alloy_primitives::B256;
use async_trait::async_trait;
use tiller_event::{Deriver, Event};
use tiller_protocol::{BlockLabel, L1BlockRef, L1FetchError, L1Fetcher};
use tokio::sync::watch;

/// Wraps an [`L1Fetcher`] so that blocks within `depth` of the L1 head look unknown.
///
/// The L1 head is learned from [`Event::L1Unsafe`]. Until one arrives, and for a depth of
/// zero, every lookup passes through. Lookups by hash or label are never filtered.
#[derive(Debug)]
pub struct ConfDepth<F> {
    inner: F,
    depth: u64,
    l1_head: watch::Sender<L1BlockRef>,
}

impl<F: L1Fetcher> ConfDepth<F> {
    /// Creates a wrapper requiring `depth` confirmations.
    pub fn new(inner: F, depth: u64) -> Self {
        let (l1_head, _) = watch::channel(L1BlockRef::default());
        Self { inner, depth, l1_head }
    }

    /// The L1 head the depth is measured from.
    pub fn l1_head(&self) -> L1BlockRef {
        *self.l1_head.borrow()
    }

    /// Subscribes to L1 head changes.
    pub fn subscribe_l1_head(&self) -> watch::Receiver<L1BlockRef> {
        self.l1_head.subscribe()
    }

    /// The wrapped fetcher.
    pub const fn inner(&self) -> &F {
        &self.inner
    }

    fn is_confirmed(&self, number: u64) -> bool {
        let head = self.l1_head();
        self.depth == 0 ||
            number == 0 ||
            head.is_zero() ||
            number.saturating_add(self.depth) <= head.number
    }
}

#[async_trait]
impl<F: L1Fetcher> L1Fetcher for ConfDepth<F> {
    async fn l1_block_ref_by_number(&self, number: u64) -> Result<L1BlockRef, L1FetchError> {
        if self.is_confirmed(number) {
            return self.inner.l1_block_ref_by_number(number).await;
        }
        Err(L1FetchError::NotFound)
    }

    async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<L1BlockRef, L1FetchError> {
        self.inner.l1_block_ref_by_hash(hash).await
    }

    async fn l1_block_ref_by_label(&self, label: BlockLabel) -> Result<L1BlockRef, L1FetchError> {
        self.inner.l1_block_ref_by_label(label).await
    }
}

#[async_trait]
impl<F: L1Fetcher> Deriver for ConfDepth<F> {
    async fn on_event(&self, event: &Event) -> bool {
        let Event::L1Unsafe { l1_unsafe } = event else {
            return false;
        };
        self.l1_head.send_replace(*l1_unsafe);
        true
    }
}
