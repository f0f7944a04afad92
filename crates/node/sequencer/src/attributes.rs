//! Preparation of payload attributes for sequenced blocks.

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tiller_event::{Event, EventError};
use tiller_protocol::{
    BlockId, Fork, L1BlockInfo, L1FetchError, L1Fetcher, L2BlockRef, PayloadAttributes,
    RollupConfig,
};

/// Deadline of [`AttributesBuilder::prepare_payload_attributes`].
pub const ATTRIBUTES_TIMEOUT: Duration = Duration::from_secs(20);

/// An error raised while preparing payload attributes.
///
/// The variant decides which error event reports the failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributesBuilderError {
    /// Retrying later may succeed.
    #[error("temporary error: {0}")]
    Temporary(String),
    /// The parent or epoch is inconsistent with L1 and the chain must be reset.
    #[error("reset required: {0}")]
    Reset(String),
    /// Preparation cannot succeed.
    #[error("critical error: {0}")]
    Critical(String),
}

impl AttributesBuilderError {
    /// The error event reporting this error.
    pub fn into_event(self) -> Event {
        match self {
            Self::Temporary(_) => Event::EngineTemporaryError { err: EventError::new(self) },
            Self::Reset(_) => Event::Reset { err: EventError::new(self) },
            Self::Critical(_) => Event::CriticalError { err: EventError::new(self) },
        }
    }
}

/// Builds the attributes of the block following `parent` in epoch `epoch`.
#[async_trait]
pub trait AttributesBuilder: Send + Sync + Debug {
    /// Prepares the attributes of the child of `parent`, using L1 block `epoch` as origin.
    async fn prepare_payload_attributes(
        &self,
        parent: L2BlockRef,
        epoch: BlockId,
    ) -> Result<PayloadAttributes, AttributesBuilderError>;
}

#[async_trait]
impl<T: AttributesBuilder + ?Sized> AttributesBuilder for Arc<T> {
    async fn prepare_payload_attributes(
        &self,
        parent: L2BlockRef,
        epoch: BlockId,
    ) -> Result<PayloadAttributes, AttributesBuilderError> {
        (**self).prepare_payload_attributes(parent, epoch).await
    }
}

/// An [`AttributesBuilder`] producing blocks that open with the L1-info deposit.
///
/// User deposits and upgrade transactions are not collected. The transaction pool fills the
/// rest of the block.
#[derive(Debug)]
pub struct L1InfoAttributesBuilder<F> {
    config: Arc<RollupConfig>,
    fetcher: F,
}

impl<F: L1Fetcher> L1InfoAttributesBuilder<F> {
    /// Creates a builder reading epochs from `fetcher`.
    pub const fn new(config: Arc<RollupConfig>, fetcher: F) -> Self {
        Self { config, fetcher }
    }
}

#[async_trait]
impl<F: L1Fetcher> AttributesBuilder for L1InfoAttributesBuilder<F> {
    async fn prepare_payload_attributes(
        &self,
        parent: L2BlockRef,
        epoch: BlockId,
    ) -> Result<PayloadAttributes, AttributesBuilderError> {
        let origin = self.fetcher.l1_block_ref_by_hash(epoch.hash).await.map_err(|err| match err {
            L1FetchError::NotFound => {
                AttributesBuilderError::Reset(format!("L1 origin {epoch} not found"))
            }
            err => AttributesBuilderError::Temporary(format!(
                "failed to fetch L1 origin {epoch}: {err}"
            )),
        })?;

        let sequence_number = if parent.l1_origin.hash == origin.hash {
            parent.sequence_number + 1
        } else if parent.l1_origin.hash == origin.parent_hash {
            0
        } else {
            return Err(AttributesBuilderError::Reset(format!(
                "cannot create new block with L1 origin {} (parent {}) on top of L1 origin {}",
                origin.id(),
                origin.parent_hash,
                parent.l1_origin
            )));
        };

        let timestamp = parent.time + self.config.block_time;
        if timestamp < origin.time {
            return Err(AttributesBuilderError::Reset(format!(
                "cannot build L2 block at time {timestamp} on L1 origin {} at time {}",
                origin.id(),
                origin.time
            )));
        }

        let deposit = L1BlockInfo::from_origin(&origin, sequence_number).to_deposit_tx();
        let parent_beacon_block_root = self
            .config
            .is_active(Fork::Ecotone, timestamp)
            .then_some(alloy_primitives::B256::ZERO);
        Ok(PayloadAttributes {
            timestamp,
            parent_beacon_block_root,
            transactions: Some(vec![deposit]),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_protocol::test_utils::{TestL1Fetcher, l1_ref, l2_ref};

    fn builder() -> L1InfoAttributesBuilder<TestL1Fetcher> {
        let config = RollupConfig { block_time: 2, ..Default::default() };
        L1InfoAttributesBuilder::new(Arc::new(config), TestL1Fetcher::with_chain(20))
    }

    #[tokio::test]
    async fn continues_epoch() {
        let parent = l2_ref(7, 124, &l1_ref(10), 2);
        let attrs = builder().prepare_payload_attributes(parent, l1_ref(10).id()).await.unwrap();
        assert_eq!(attrs.timestamp, 126);
        let txs = attrs.transactions.unwrap();
        assert_eq!(txs.len(), 1);
        let info = L1BlockInfo::decode_deposit_tx(&txs[0]).unwrap();
        assert_eq!(info.id(), l1_ref(10).id());
        assert_eq!(info.sequence_number, 3);
    }

    #[tokio::test]
    async fn starts_new_epoch() {
        let parent = l2_ref(7, 130, &l1_ref(10), 5);
        let attrs = builder().prepare_payload_attributes(parent, l1_ref(11).id()).await.unwrap();
        let info = L1BlockInfo::decode_deposit_tx(&attrs.transactions.unwrap()[0]).unwrap();
        assert_eq!(info.sequence_number, 0);
        assert_eq!(info.number, 11);
    }

    #[tokio::test]
    async fn rejects_unrelated_epoch() {
        let parent = l2_ref(7, 130, &l1_ref(10), 5);
        let err = builder().prepare_payload_attributes(parent, l1_ref(12).id()).await.unwrap_err();
        assert!(matches!(err, AttributesBuilderError::Reset(_)));
        assert!(matches!(err.into_event(), Event::Reset { .. }));
    }

    #[tokio::test]
    async fn rejects_block_before_origin() {
        let parent = l2_ref(7, 128, &l1_ref(10), 5);
        // L1 #11 is at t=132, the child would be at t=130.
        let err = builder().prepare_payload_attributes(parent, l1_ref(11).id()).await.unwrap_err();
        assert!(matches!(err, AttributesBuilderError::Reset(_)));
    }

    #[tokio::test]
    async fn fetch_failures_are_temporary() {
        let builder = builder();
        builder.fetcher.set_failure(Some(L1FetchError::Transport("connection reset".into())));
        let parent = l2_ref(7, 124, &l1_ref(10), 2);
        let err = builder.prepare_payload_attributes(parent, l1_ref(10).id()).await.unwrap_err();
        assert!(matches!(err.into_event(), Event::EngineTemporaryError { .. }));
    }
}
