//! The L2 finalizer.

use crate::FinalizerError;
use async_trait::async_trait;
use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};
use tiller_event::{Deriver, Emitter, Event};
use tiller_protocol::{BlockId, L1BlockRef, L1FetchError, L1Fetcher, L2BlockRef, RollupConfig};
use tokio::sync::Mutex;

/// Finality buffer size without alt-DA: two epochs of 32 slots, plus one.
pub const DEFAULT_FINALITY_LOOKBACK: usize = 4 * 32 + 1;

/// L1 blocks to traverse after an attempt before the next idle-triggered attempt.
pub const FINALITY_DELAY: u64 = 64;

/// Deadline of each canonical-chain check.
pub const FINALITY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of L1 blocks the finalizer keeps derivation results for.
///
/// Alt-DA chains finalize only after the challenge and resolve windows, so the buffer has to
/// cover both.
pub fn finality_lookback(config: &RollupConfig) -> usize {
    config.alt_da.map_or(DEFAULT_FINALITY_LOOKBACK, |alt_da| {
        let windows = alt_da.da_challenge_window.saturating_add(alt_da.da_resolve_window);
        let windows = usize::try_from(windows).unwrap_or(usize::MAX);
        DEFAULT_FINALITY_LOOKBACK.max(windows.saturating_add(1))
    })
}

/// The last safe L2 block fully derived from an L1 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalityData {
    /// The safe L2 block.
    pub l2_block: L2BlockRef,
    /// The L1 block it was derived from.
    pub l1_block: BlockId,
}

#[derive(Debug, Default)]
struct FinalizerState {
    finalized_l1: L1BlockRef,
    last_finalized_l2: L2BlockRef,
    tried_finalize_at: u64,
    finality_data: VecDeque<FinalityData>,
}

/// Promotes safe L2 blocks to finalized once their L1 source is final.
pub struct Finalizer<F> {
    fetcher: F,
    emitter: Arc<dyn Emitter>,
    lookback: usize,
    state: Mutex<FinalizerState>,
}

impl<F: fmt::Debug> fmt::Debug for Finalizer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Finalizer")
            .field("fetcher", &self.fetcher)
            .field("lookback", &self.lookback)
            .finish_non_exhaustive()
    }
}

impl<F: L1Fetcher> Finalizer<F> {
    /// Creates a finalizer sized for `config`.
    pub fn new(config: &RollupConfig, fetcher: F, emitter: Arc<dyn Emitter>) -> Self {
        let lookback = finality_lookback(config);
        Self {
            fetcher,
            emitter,
            lookback,
            state: Mutex::new(FinalizerState {
                finality_data: VecDeque::with_capacity(lookback),
                ..Default::default()
            }),
        }
    }

    /// Capacity of the finality buffer.
    pub const fn lookback(&self) -> usize {
        self.lookback
    }

    /// The latest L1 finality signal.
    pub async fn finalized_l1(&self) -> L1BlockRef {
        self.state.lock().await.finalized_l1
    }

    /// The buffered derivation results, oldest first.
    pub async fn finality_data(&self) -> Vec<FinalityData> {
        self.state.lock().await.finality_data.iter().copied().collect()
    }

    async fn on_safe_derived(&self, safe_head: L2BlockRef, derived_from: L1BlockRef) {
        let mut state = self.state.lock().await;
        let data = &mut state.finality_data;
        match data.back_mut() {
            Some(last) if last.l1_block.number >= derived_from.number => {
                // Still on the same L1 block: the safe head only moved forward.
                last.l2_block = safe_head;
            }
            _ => {
                if data.len() >= self.lookback {
                    data.pop_front();
                }
                data.push_back(FinalityData { l2_block: safe_head, l1_block: derived_from.id() });
                debug!(
                    target: "finalizer",
                    safe = %safe_head.id(),
                    derived_from = %derived_from.id(),
                    "Buffered safe block for finalization"
                );
            }
        }
        tiller_macros::set!(gauge, crate::Metrics::FINALITY_DATA, data.len() as f64);
    }

    async fn on_finalize_l1(&self, finalized_l1: L1BlockRef) {
        {
            let mut state = self.state.lock().await;
            if finalized_l1.number < state.finalized_l1.number {
                error!(
                    target: "finalizer",
                    current = %state.finalized_l1.id(),
                    signal = %finalized_l1.id(),
                    "Ignoring old L1 finalized block signal, is the L1 provider corrupted?"
                );
                return;
            }
            if state.finalized_l1 != finalized_l1 {
                // A new signal deserves a fresh attempt.
                state.tried_finalize_at = 0;
                state.finalized_l1 = finalized_l1;
                tiller_macros::set!(
                    gauge,
                    crate::Metrics::FINALIZED_L1,
                    finalized_l1.number as f64
                );
            }
        }
        self.emitter.emit(Event::TryFinalize).await;
    }

    async fn on_deriver_idle(&self, origin: L1BlockRef) {
        {
            let mut state = self.state.lock().await;
            if state.finalized_l1.is_zero() {
                return;
            }
            // Traverse more of L1 before trying again.
            if origin.number <= state.tried_finalize_at.saturating_add(FINALITY_DELAY) {
                return;
            }
            debug!(
                target: "finalizer",
                l1_finalized = %state.finalized_l1.id(),
                derived_from = %origin.id(),
                previous = state.tried_finalize_at,
                "Processing L1 finality information"
            );
            state.tried_finalize_at = origin.number;
        }
        self.emitter.emit(Event::TryFinalize).await;
    }

    async fn try_finalize(&self) {
        let state = self.state.lock().await;
        let finalized_l1 = state.finalized_l1;
        let last_finalized = state.last_finalized_l2;
        let candidate = state
            .finality_data
            .iter()
            .filter(|data| {
                data.l1_block.number <= finalized_l1.number &&
                    data.l2_block.number > last_finalized.number
            })
            .max_by_key(|data| data.l2_block.number)
            .copied();
        let Some(candidate) = candidate else {
            return;
        };

        // Both the signal and the source of the candidate must still be canonical.
        let checked = match self.check_canonical(finalized_l1.id()).await {
            Ok(()) => self.check_canonical(candidate.l1_block).await,
            Err(err) => Err(err),
        };
        if let Err(err) = checked {
            warn!(
                target: "finalizer",
                %err,
                candidate = %candidate.l2_block.id(),
                "Cannot finalize candidate"
            );
            drop(state);
            self.emitter.emit(err.into_event()).await;
            return;
        }

        info!(
            target: "finalizer",
            l2 = %candidate.l2_block.id(),
            derived_from = %candidate.l1_block,
            l1_finalized = %finalized_l1.id(),
            "Promoting L2 block to finalized"
        );
        tiller_macros::inc!(counter, crate::Metrics::PROMOTIONS);
        drop(state);
        self.emitter.emit(Event::PromoteFinalized { block: candidate.l2_block }).await;
    }

    async fn check_canonical(&self, tracked: BlockId) -> Result<(), FinalizerError> {
        let fetch = self.fetcher.l1_block_ref_by_number(tracked.number);
        let canonical = tokio::time::timeout(FINALITY_FETCH_TIMEOUT, fetch)
            .await
            .map_err(|_| L1FetchError::Timeout)
            .and_then(|fetched| fetched)
            .map_err(|source| FinalizerError::Fetch { number: tracked.number, source })?;
        if canonical.hash != tracked.hash {
            return Err(FinalizerError::NotCanonical { tracked, canonical: canonical.id() });
        }
        Ok(())
    }
}

#[async_trait]
impl<F: L1Fetcher> Deriver for Finalizer<F> {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::SafeDerived { safe_head, derived_from } => {
                self.on_safe_derived(*safe_head, *derived_from).await
            }
            Event::FinalizeL1 { finalized_l1 } => self.on_finalize_l1(*finalized_l1).await,
            Event::DeriverIdle { origin } => self.on_deriver_idle(*origin).await,
            Event::TryFinalize => self.try_finalize().await,
            Event::ForkchoiceUpdate { finalized, .. } => {
                self.state.lock().await.last_finalized_l2 = *finalized;
            }
            Event::Reset { .. } => {
                let mut state = self.state.lock().await;
                state.finality_data.clear();
                state.tried_finalize_at = 0;
                tiller_macros::set!(gauge, crate::Metrics::FINALITY_DATA, 0.0);
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use mockall::{mock, predicate::eq};
    use rstest::rstest;
    use tiller_event::{EventError, test_utils::TestEmitter};
    use tiller_protocol::{
        AltDaConfig, BlockLabel,
        test_utils::{TestL1Fetcher, l1_ref, l2_ref},
    };

    mock! {
        #[derive(Debug)]
        pub Fetcher {}

        #[async_trait::async_trait]
        impl L1Fetcher for Fetcher {
            async fn l1_block_ref_by_number(
                &self,
                number: u64,
            ) -> Result<L1BlockRef, L1FetchError>;
            async fn l1_block_ref_by_hash(&self, hash: B256) -> Result<L1BlockRef, L1FetchError>;
            async fn l1_block_ref_by_label(
                &self,
                label: BlockLabel,
            ) -> Result<L1BlockRef, L1FetchError>;
        }
    }

    fn safe(number: u64, origin: u64) -> L2BlockRef {
        l2_ref(number, number * 2, &l1_ref(origin), 0)
    }

    fn finalizer<F: L1Fetcher>(fetcher: F) -> (Finalizer<F>, TestEmitter) {
        let emitter = TestEmitter::new();
        (Finalizer::new(&RollupConfig::default(), fetcher, emitter.as_emitter()), emitter)
    }

    async fn safe_derived(finalizer: &impl Deriver, safe_head: L2BlockRef, derived_from: u64) {
        let derived_from = l1_ref(derived_from);
        finalizer.on_event(&Event::SafeDerived { safe_head, derived_from }).await;
    }

    #[rstest]
    #[case::without_alt_da(None, 129)]
    #[case::short_windows(Some((50, 50)), 129)]
    #[case::long_windows(Some((200, 100)), 301)]
    fn lookback_covers_alt_da_windows(
        #[case] windows: Option<(u64, u64)>,
        #[case] expected: usize,
    ) {
        let config = RollupConfig {
            alt_da: windows.map(|(challenge, resolve)| AltDaConfig {
                da_challenge_window: challenge,
                da_resolve_window: resolve,
            }),
            ..Default::default()
        };
        assert_eq!(finality_lookback(&config), expected);
    }

    #[tokio::test]
    async fn promotes_block_derived_from_finalized_l1() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_l1_block_ref_by_number()
            .with(eq(1001))
            .times(2)
            .returning(|_| Ok(l1_ref(1001)));
        let (finalizer, emitter) = finalizer(fetcher);

        safe_derived(&finalizer, safe(10, 990), 1000).await;
        safe_derived(&finalizer, safe(20, 995), 1001).await;
        assert!(emitter.is_empty());

        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(1001) }).await;
        assert!(matches!(emitter.take().as_slice(), [Event::TryFinalize]));

        finalizer.on_event(&Event::TryFinalize).await;
        let events = emitter.take();
        assert!(matches!(
            events.as_slice(),
            [Event::PromoteFinalized { block }] if *block == safe(20, 995)
        ));
    }

    #[tokio::test]
    async fn only_promotes_blocks_from_finalized_l1() {
        let (finalizer, emitter) = finalizer(TestL1Fetcher::with_chain(1010));
        safe_derived(&finalizer, safe(5, 990), 1002).await;
        safe_derived(&finalizer, safe(7, 990), 1003).await;
        safe_derived(&finalizer, safe(8, 990), 1005).await;

        // L1 block 1004 carried no L2 data, 1003 is the newest source it covers.
        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(1004) }).await;
        finalizer.on_event(&Event::TryFinalize).await;
        let events = emitter.take();
        assert!(matches!(
            events.as_slice(),
            [Event::TryFinalize, Event::PromoteFinalized { block }] if *block == safe(7, 990)
        ));
    }

    #[tokio::test]
    async fn updates_entry_within_same_l1_block() {
        let (finalizer, _emitter) = finalizer(TestL1Fetcher::default());
        safe_derived(&finalizer, safe(10, 990), 1000).await;
        safe_derived(&finalizer, safe(11, 990), 1000).await;
        safe_derived(&finalizer, safe(12, 990), 1001).await;
        let data = finalizer.finality_data().await;
        assert_eq!(data.len(), 2);
        assert_eq!(data[0], FinalityData { l2_block: safe(11, 990), l1_block: l1_ref(1000).id() });
        assert_eq!(data[1].l2_block, safe(12, 990));
    }

    #[tokio::test]
    async fn prunes_oldest_entry_when_full() {
        let (finalizer, _emitter) = finalizer(TestL1Fetcher::default());
        for n in 0..=DEFAULT_FINALITY_LOOKBACK as u64 {
            safe_derived(&finalizer, safe(n + 1, 990), 1000 + n).await;
        }
        let data = finalizer.finality_data().await;
        assert_eq!(data.len(), DEFAULT_FINALITY_LOOKBACK);
        assert_eq!(data[0].l1_block.number, 1001);
    }

    #[tokio::test]
    async fn retries_after_fetch_failure() {
        let fetcher = Arc::new(TestL1Fetcher::with_chain(1100));
        let (finalizer, emitter) = finalizer(Arc::clone(&fetcher));
        safe_derived(&finalizer, safe(20, 995), 1001).await;
        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(1001) }).await;
        emitter.clear();

        fetcher.set_failure(Some(L1FetchError::Transport("connection reset".into())));
        finalizer.on_event(&Event::TryFinalize).await;
        let events = emitter.take();
        let [Event::L1TemporaryError { err }] = events.as_slice() else {
            panic!("expected a temporary L1 error, got {events:?}");
        };
        assert!(matches!(
            err.downcast_ref::<FinalizerError>(),
            Some(FinalizerError::Fetch { number: 1001, .. })
        ));

        // Idling far enough past the signal schedules another attempt.
        fetcher.set_failure(None);
        finalizer.on_event(&Event::DeriverIdle { origin: l1_ref(1003) }).await;
        assert!(matches!(emitter.take().as_slice(), [Event::TryFinalize]));
        finalizer.on_event(&Event::TryFinalize).await;
        assert!(matches!(emitter.take().as_slice(), [Event::PromoteFinalized { .. }]));
    }

    #[tokio::test]
    async fn idle_attempts_are_spaced_out() {
        let (finalizer, emitter) = finalizer(TestL1Fetcher::with_chain(1200));

        // Nothing happens before the first L1 finality signal.
        finalizer.on_event(&Event::DeriverIdle { origin: l1_ref(1000) }).await;
        assert!(emitter.is_empty());

        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(990) }).await;
        emitter.clear();
        finalizer.on_event(&Event::DeriverIdle { origin: l1_ref(1000) }).await;
        assert_eq!(emitter.take().len(), 1);

        finalizer.on_event(&Event::DeriverIdle { origin: l1_ref(1000 + FINALITY_DELAY) }).await;
        assert!(emitter.is_empty());
        finalizer
            .on_event(&Event::DeriverIdle { origin: l1_ref(1001 + FINALITY_DELAY) })
            .await;
        assert_eq!(emitter.take().len(), 1);
    }

    #[tokio::test]
    async fn ignores_older_finality_signal() {
        let (finalizer, emitter) = finalizer(TestL1Fetcher::default());
        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(1001) }).await;
        emitter.clear();
        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(1000) }).await;
        assert!(emitter.is_empty());
        assert_eq!(finalizer.finalized_l1().await, l1_ref(1001));
    }

    #[tokio::test]
    async fn forkchoice_update_prevents_repeated_promotion() {
        let (finalizer, emitter) = finalizer(TestL1Fetcher::with_chain(1010));
        safe_derived(&finalizer, safe(20, 995), 1001).await;
        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(1001) }).await;
        finalizer.on_event(&Event::TryFinalize).await;
        emitter.clear();

        finalizer
            .on_event(&Event::ForkchoiceUpdate {
                unsafe_head: safe(30, 995),
                safe_head: safe(20, 995),
                finalized: safe(20, 995),
            })
            .await;
        finalizer.on_event(&Event::TryFinalize).await;
        assert!(emitter.is_empty());
    }

    #[tokio::test]
    async fn resets_when_source_left_canonical_chain() {
        let fetcher = TestL1Fetcher::with_chain(1010);
        let (finalizer, emitter) = finalizer(fetcher);

        // Safe blocks derived from a sibling of the canonical L1 block 1002.
        let mut sibling = l1_ref(1002);
        sibling.hash = B256::repeat_byte(0xdd);
        finalizer
            .on_event(&Event::SafeDerived { safe_head: safe(30, 995), derived_from: sibling })
            .await;

        finalizer.on_event(&Event::FinalizeL1 { finalized_l1: l1_ref(1005) }).await;
        finalizer.on_event(&Event::TryFinalize).await;
        let events = emitter.take();
        let [Event::TryFinalize, Event::Reset { err }] = events.as_slice() else {
            panic!("expected a reset, got {events:?}");
        };
        assert!(matches!(
            err.downcast_ref::<FinalizerError>(),
            Some(FinalizerError::NotCanonical { .. })
        ));

        // The reset drops derivation results but keeps the signal.
        finalizer.on_event(&Event::Reset { err: EventError::msg("l1 reorg") }).await;
        assert!(finalizer.finality_data().await.is_empty());
        assert_eq!(finalizer.finalized_l1().await, l1_ref(1005));
    }

    #[tokio::test]
    async fn ignores_unrelated_events() {
        let (finalizer, emitter) = finalizer(TestL1Fetcher::default());
        assert!(!finalizer.on_event(&Event::SequencerAction).await);
        assert!(emitter.is_empty());
    }
}
