//! Engine resets.

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};
use tiller_engine::{EngineApi, EngineApiError};
use tiller_event::{Deriver, Emitter, Event, EventError};
use tiller_protocol::{BlockId, BlockLabel, L1FetchError, L1Fetcher, L2BlockRef, RollupConfig};

/// The heads an engine reset starts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct L2Heads {
    /// The unsafe head.
    pub unsafe_head: L2BlockRef,
    /// The safe head.
    pub safe_head: L2BlockRef,
    /// The finalized head.
    pub finalized: L2BlockRef,
}

/// Error raised while looking for the heads to reset to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResetWalkError {
    /// The engine could not be queried.
    #[error("failed to fetch the {label} L2 head: {source}")]
    Engine {
        /// The head being fetched.
        label: BlockLabel,
        /// The underlying error.
        #[source]
        source: EngineApiError,
    },
    /// L1 could not be queried.
    #[error("failed to check L1 origin {origin}: {source}")]
    L1 {
        /// The origin being checked.
        origin: BlockId,
        /// The underlying error.
        #[source]
        source: L1FetchError,
    },
    /// The safe head was derived from an L1 block that is no longer canonical.
    #[error("L1 origin {origin} of safe head {safe} is no longer canonical")]
    SafeOriginReorged {
        /// The safe head.
        safe: BlockId,
        /// Its L1 origin.
        origin: BlockId,
    },
    /// The heads the engine reported are out of order.
    #[error("inconsistent heads: finalized {finalized}, safe {safe}, unsafe {unsafe_head}")]
    Inconsistent {
        /// The unsafe head.
        unsafe_head: BlockId,
        /// The safe head.
        safe: BlockId,
        /// The finalized head.
        finalized: BlockId,
    },
}

/// Finds the heads the engine should be reset to.
#[async_trait]
pub trait ResetWalker: Send + Sync + Debug {
    /// Walks the chain and returns consistent heads.
    async fn find_l2_heads(&self) -> Result<L2Heads, ResetWalkError>;
}

/// A [`ResetWalker`] that trusts the labels of the execution engine.
///
/// An unsafe head whose L1 origin was reorged out falls back to the safe head. A reorged
/// safe head cannot be recovered here and fails the walk.
#[derive(Debug)]
pub struct EngineResetWalker<E, F> {
    config: Arc<RollupConfig>,
    engine: E,
    l1: F,
}

impl<E: EngineApi, F: L1Fetcher> EngineResetWalker<E, F> {
    /// Creates a walker over `engine`, checking origins against `l1`.
    pub const fn new(config: Arc<RollupConfig>, engine: E, l1: F) -> Self {
        Self { config, engine, l1 }
    }

    async fn head(&self, label: BlockLabel) -> Result<L2BlockRef, ResetWalkError> {
        match self.engine.l2_block_ref_by_label(label).await {
            Ok(head) => Ok(head),
            // A fresh engine has no safe or finalized block yet.
            Err(EngineApiError::NotFound) if label != BlockLabel::Latest => {
                Ok(self.config.genesis_l2_ref())
            }
            Err(source) => Err(ResetWalkError::Engine { label, source }),
        }
    }

    async fn is_canonical(&self, origin: BlockId) -> Result<bool, ResetWalkError> {
        match self.l1.l1_block_ref_by_number(origin.number).await {
            Ok(block) => Ok(block.hash == origin.hash),
            Err(L1FetchError::NotFound) => Ok(false),
            Err(source) => Err(ResetWalkError::L1 { origin, source }),
        }
    }
}

#[async_trait]
impl<E: EngineApi, F: L1Fetcher> ResetWalker for EngineResetWalker<E, F> {
    async fn find_l2_heads(&self) -> Result<L2Heads, ResetWalkError> {
        let finalized = self.head(BlockLabel::Finalized).await?;
        let safe_head = self.head(BlockLabel::Safe).await?;
        let mut unsafe_head = self.head(BlockLabel::Latest).await?;

        if finalized.number > safe_head.number || safe_head.number > unsafe_head.number {
            return Err(ResetWalkError::Inconsistent {
                unsafe_head: unsafe_head.id(),
                safe: safe_head.id(),
                finalized: finalized.id(),
            });
        }
        let at_genesis = safe_head.id() == self.config.genesis.l2;
        if !at_genesis && !self.is_canonical(safe_head.l1_origin).await? {
            return Err(ResetWalkError::SafeOriginReorged {
                safe: safe_head.id(),
                origin: safe_head.l1_origin,
            });
        }
        if unsafe_head != safe_head && !self.is_canonical(unsafe_head.l1_origin).await? {
            warn!(
                target: "node",
                unsafe_head = %unsafe_head.id(),
                l1_origin = %unsafe_head.l1_origin,
                safe_head = %safe_head.id(),
                "L1 origin of unsafe head was reorged out, resetting to safe head"
            );
            unsafe_head = safe_head;
        }
        Ok(L2Heads { unsafe_head, safe_head, finalized })
    }
}

/// Answers reset requests with a [`Event::ForceEngineReset`].
///
/// A failed walk is reported as a temporary engine error rather than another reset, so a
/// broken engine cannot put the node into a reset loop.
#[derive(Debug)]
pub struct ResetDeriver {
    walker: Arc<dyn ResetWalker>,
    emitter: Arc<dyn Emitter>,
}

impl ResetDeriver {
    /// Creates a deriver walking with `walker`.
    pub fn new(walker: Arc<dyn ResetWalker>, emitter: Arc<dyn Emitter>) -> Self {
        Self { walker, emitter }
    }

    async fn reset(&self) {
        match self.walker.find_l2_heads().await {
            Ok(L2Heads { unsafe_head, safe_head, finalized }) => {
                info!(
                    target: "node",
                    unsafe_head = %unsafe_head.id(),
                    safe_head = %safe_head.id(),
                    finalized = %finalized.id(),
                    "Found heads to reset the engine to"
                );
                let reset = Event::ForceEngineReset { unsafe_head, safe_head, finalized };
                self.emitter.emit(reset).await;
            }
            Err(err) => {
                warn!(target: "node", %err, "Failed to find the heads to reset to");
                self.emitter.emit(Event::EngineTemporaryError { err: EventError::new(err) }).await;
            }
        }
    }
}

#[async_trait]
impl Deriver for ResetDeriver {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::Reset { err } => {
                warn!(target: "node", %err, "Resetting engine");
                self.reset().await;
            }
            Event::ResetEngineRequest => self.reset().await,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use alloy_rpc_types_engine::{ForkchoiceState, ForkchoiceUpdated, PayloadStatus};
    use mockall::{mock, predicate::eq};
    use rstest::rstest;
    use tiller_event::test_utils::TestEmitter;
    use tiller_protocol::{
        ExecutionPayload, ExecutionPayloadEnvelope, L1BlockRef, PayloadAttributes, PayloadInfo,
        test_utils::{TestL1Fetcher, l1_ref, l2_ref},
    };

    mock! {
        #[derive(Debug)]
        pub Engine {}

        #[async_trait::async_trait]
        impl EngineApi for Engine {
            async fn forkchoice_update(
                &self,
                state: ForkchoiceState,
                attributes: Option<PayloadAttributes>,
            ) -> Result<ForkchoiceUpdated, EngineApiError>;
            async fn get_payload(
                &self,
                info: PayloadInfo,
            ) -> Result<ExecutionPayloadEnvelope, EngineApiError>;
            async fn new_payload(
                &self,
                payload: ExecutionPayload,
                parent_beacon_block_root: Option<B256>,
            ) -> Result<PayloadStatus, EngineApiError>;
            async fn l2_block_ref_by_label(
                &self,
                label: BlockLabel,
            ) -> Result<L2BlockRef, EngineApiError>;
        }
    }

    fn engine(heads: [(BlockLabel, Result<L2BlockRef, EngineApiError>); 3]) -> MockEngine {
        let mut engine = MockEngine::new();
        for (label, head) in heads {
            engine.expect_l2_block_ref_by_label().with(eq(label)).return_const(head);
        }
        engine
    }

    fn walker(engine: MockEngine) -> EngineResetWalker<MockEngine, TestL1Fetcher> {
        let config = RollupConfig { block_time: 2, ..Default::default() };
        EngineResetWalker::new(Arc::new(config), engine, TestL1Fetcher::with_chain(20))
    }

    fn l2(number: u64, origin: u64) -> L2BlockRef {
        l2_ref(number, number * 2, &l1_ref(origin), 0)
    }

    fn reorged(number: u64) -> L1BlockRef {
        L1BlockRef { hash: B256::repeat_byte(0xdd), ..l1_ref(number) }
    }

    #[tokio::test]
    async fn walks_engine_labels() {
        let walker = walker(engine([
            (BlockLabel::Finalized, Ok(l2(4, 1))),
            (BlockLabel::Safe, Ok(l2(10, 3))),
            (BlockLabel::Latest, Ok(l2(30, 9))),
        ]));
        assert_eq!(
            walker.find_l2_heads().await,
            Ok(L2Heads { unsafe_head: l2(30, 9), safe_head: l2(10, 3), finalized: l2(4, 1) })
        );
    }

    #[tokio::test]
    async fn fresh_engine_starts_from_genesis() {
        let walker = walker(engine([
            (BlockLabel::Finalized, Err(EngineApiError::NotFound)),
            (BlockLabel::Safe, Err(EngineApiError::NotFound)),
            (BlockLabel::Latest, Ok(l2(3, 0))),
        ]));
        let heads = walker.find_l2_heads().await.unwrap();
        assert_eq!(heads.finalized, RollupConfig::default().genesis_l2_ref());
        assert_eq!(heads.safe_head, heads.finalized);
        assert_eq!(heads.unsafe_head, l2(3, 0));
    }

    #[tokio::test]
    async fn reorged_unsafe_origin_falls_back_to_safe() {
        let unsafe_head = l2_ref(30, 60, &reorged(9), 0);
        let walker = walker(engine([
            (BlockLabel::Finalized, Ok(l2(4, 1))),
            (BlockLabel::Safe, Ok(l2(10, 3))),
            (BlockLabel::Latest, Ok(unsafe_head)),
        ]));
        assert_eq!(walker.find_l2_heads().await.map(|h| h.unsafe_head), Ok(l2(10, 3)));
    }

    #[rstest]
    #[case::safe_origin_reorged(l2(4, 1), l2_ref(10, 20, &reorged(3), 0), l2(30, 9))]
    #[case::safe_ahead_of_unsafe(l2(4, 1), l2(30, 9), l2(10, 3))]
    #[case::finalized_ahead_of_safe(l2(12, 4), l2(10, 3), l2(30, 9))]
    #[tokio::test]
    async fn rejects_unusable_heads(
        #[case] finalized: L2BlockRef,
        #[case] safe: L2BlockRef,
        #[case] latest: L2BlockRef,
    ) {
        let walker = walker(engine([
            (BlockLabel::Finalized, Ok(finalized)),
            (BlockLabel::Safe, Ok(safe)),
            (BlockLabel::Latest, Ok(latest)),
        ]));
        assert!(walker.find_l2_heads().await.is_err());
    }

    #[derive(Debug)]
    struct FixedWalker(Result<L2Heads, ResetWalkError>);

    #[async_trait]
    impl ResetWalker for FixedWalker {
        async fn find_l2_heads(&self) -> Result<L2Heads, ResetWalkError> {
            self.0.clone()
        }
    }

    fn deriver(walk: Result<L2Heads, ResetWalkError>) -> (ResetDeriver, TestEmitter) {
        let emitter = TestEmitter::new();
        (ResetDeriver::new(Arc::new(FixedWalker(walk)), emitter.as_emitter()), emitter)
    }

    #[tokio::test]
    async fn answers_reset_with_forced_reset() {
        let heads =
            L2Heads { unsafe_head: l2(30, 9), safe_head: l2(10, 3), finalized: l2(4, 1) };
        let (deriver, emitter) = deriver(Ok(heads));

        assert!(deriver.on_event(&Event::Reset { err: EventError::msg("origin mismatch") }).await);
        assert!(deriver.on_event(&Event::ResetEngineRequest).await);
        let events = emitter.take();
        assert_eq!(events.len(), 2);
        for event in events {
            assert!(matches!(
                event,
                Event::ForceEngineReset { unsafe_head, safe_head, finalized }
                    if unsafe_head == heads.unsafe_head &&
                        safe_head == heads.safe_head &&
                        finalized == heads.finalized
            ));
        }
        assert!(!deriver.on_event(&Event::TryUpdateEngine).await);
    }

    #[tokio::test]
    async fn failed_walk_is_temporary() {
        let (deriver, emitter) = deriver(Err(ResetWalkError::Engine {
            label: BlockLabel::Latest,
            source: EngineApiError::NotFound,
        }));
        deriver.on_event(&Event::ResetEngineRequest).await;
        let events = emitter.take();
        assert!(matches!(
            events.as_slice(),
            [Event::EngineTemporaryError { err }] if err.is::<ResetWalkError>()
        ));
    }
}
