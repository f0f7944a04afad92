//! Read access to L1 block headers.

use crate::{BlockLabel, L1BlockRef};
use alloy_primitives::B256;
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

/// Error returned by an [`L1Fetcher`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum L1FetchError {
    /// The block is unknown to the source.
    #[error("L1 block not found")]
    NotFound,
    /// The request failed in transit.
    #[error("L1 fetch failed: {0}")]
    Transport(String),
    /// The request did not complete in time.
    #[error("L1 fetch timed out")]
    Timeout,
}

/// Looks up L1 block references.
#[async_trait]
pub trait L1Fetcher: Send + Sync + Debug {
    /// Fetches the L1 block at `number` on the canonical chain.
    async fn l1_block_ref_by_number(&self, number: u64) -> Result<L1BlockRef, L1FetchError>;

    /// Fetches the L1 block with `hash`.
    async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<L1BlockRef, L1FetchError>;

    /// Fetches the L1 block currently tagged with `label`.
    async fn l1_block_ref_by_label(&self, label: BlockLabel) -> Result<L1BlockRef, L1FetchError>;
}

#[async_trait]
impl<T: L1Fetcher + ?Sized> L1Fetcher for Arc<T> {
    async fn l1_block_ref_by_number(&self, number: u64) -> Result<L1BlockRef, L1FetchError> {
        (**self).l1_block_ref_by_number(number).await
    }

    async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<L1BlockRef, L1FetchError> {
        (**self).l1_block_ref_by_hash(hash).await
    }

    async fn l1_block_ref_by_label(&self, label: BlockLabel) -> Result<L1BlockRef, L1FetchError> {
        (**self).l1_block_ref_by_label(label).await
    }
}
