//! Selection of the L1 origin of the next sequenced block.

use async_trait::async_trait;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tiller_event::{Deriver, Event, EventError};
use tiller_protocol::{
    BlockId, ChainSpec, L1BlockRef, L1FetchError, L1Fetcher, L2BlockRef, RollupConfig,
};

mod conf_depth;
pub use conf_depth::ConfDepth;

/// Budget of the best-effort prefetch that runs on every forkchoice update.
pub const PREFETCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Minimum time granted to fetch the next origin.
const MIN_NEXT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Additional time granted to fetch the next origin as the drift approaches its maximum.
const DRIFT_NEXT_ORIGIN_TIMEOUT: Duration = Duration::from_secs(9);

/// An error raised while choosing an L1 origin.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OriginSelectorError {
    /// The origin of the L2 head could not be fetched.
    #[error("failed to fetch current L1 origin {origin}: {source}")]
    CurrentOrigin {
        /// The L1 origin of the L2 head.
        origin: BlockId,
        /// Fetch failure.
        #[source]
        source: L1FetchError,
    },
    /// The sequencer drift is exhausted and the next origin is not available.
    #[error(
        "cannot build next L2 block past current L1 origin {current} by more than sequencer time drift, and failed to find next L1 origin: {source}"
    )]
    PastDrift {
        /// The current L1 origin.
        current: BlockId,
        /// Fetch failure.
        #[source]
        source: L1FetchError,
    },
}

impl OriginSelectorError {
    /// The error event reporting this error. Every selector failure is an L1 fetch failure.
    pub fn into_event(self) -> Event {
        Event::L1TemporaryError { err: EventError::new(self) }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Origins {
    current: L1BlockRef,
    next: L1BlockRef,
}

/// Chooses the L1 origin of the next L2 block.
///
/// The selector keeps the current origin and, once known, its successor. It is registered as
/// an actor so it can prefetch the successor on every forkchoice update and drop its cache on
/// a reset. Concurrent lookups are safe: the cache lock is never held across a fetch.
#[derive(Debug)]
pub struct L1OriginSelector<F> {
    config: Arc<RollupConfig>,
    spec: ChainSpec,
    fetcher: F,
    origins: Mutex<Origins>,
}

impl<F: L1Fetcher> L1OriginSelector<F> {
    /// Creates a selector with an empty cache.
    pub fn new(config: Arc<RollupConfig>, fetcher: F) -> Self {
        let spec = ChainSpec::new((*config).clone());
        Self { config, spec, fetcher, origins: Mutex::new(Origins::default()) }
    }

    /// The underlying fetcher.
    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn origins(&self) -> MutexGuard<'_, Origins> {
        self.origins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the L1 origin the block following `l2_head` must use.
    ///
    /// Moves to the next L1 block as soon as its timestamp allows it. Stays on the current
    /// origin while the next one is unknown, unless the sequencer drift is exhausted.
    pub async fn find_l1_origin(
        &self,
        l2_head: L2BlockRef,
    ) -> Result<L1BlockRef, OriginSelectorError> {
        let (current, mut next) = self.current_and_next(l2_head).await?;
        let next_time = l2_head.time + self.config.block_time;

        let max_drift = self.spec.max_sequencer_drift(current.time);
        let mut drift = next_time.saturating_sub(current.time);
        let past_drift = drift > max_drift;
        if past_drift {
            warn!(
                target: "origin_selector",
                current = %current.id(),
                current_time = current.time,
                l2_head = %l2_head.id(),
                l2_head_time = l2_head.time,
                max_drift,
                "Next L2 block time is past the sequencer drift and current origin time"
            );
            drift = max_drift;
        }

        if next.is_zero() {
            let timeout = next_origin_timeout(drift, max_drift);
            match self.fetch_next(current, timeout).await {
                Ok(fetched) => next = fetched,
                Err(source) if past_drift => {
                    return Err(OriginSelectorError::PastDrift { current: current.id(), source });
                }
                Err(err) => {
                    // An empty block on the current origin keeps the chain moving.
                    debug!(
                        target: "origin_selector",
                        current = %current.id(),
                        %err,
                        "Next L1 origin not available"
                    );
                    return Ok(current);
                }
            }
        }

        if next_time >= next.time {
            return Ok(next);
        }
        Ok(current)
    }

    /// Fetches the successor of the current origin if it is not cached yet.
    ///
    /// Failures are logged and otherwise ignored.
    pub async fn prefetch_next_origin(&self, l2_head: L2BlockRef) {
        let current = match self.current_and_next(l2_head).await {
            Ok((_, next)) if !next.is_zero() => return,
            Ok((current, _)) => current,
            Err(err) => {
                debug!(target: "origin_selector", %err, "Failed to prefetch current L1 origin");
                return;
            }
        };
        if let Err(err) = self.fetch_next(current, PREFETCH_TIMEOUT).await {
            debug!(
                target: "origin_selector",
                current = %current.id(),
                %err,
                "Failed to prefetch next L1 origin"
            );
        }
    }

    /// Clears the cached origins.
    pub fn reset(&self) {
        *self.origins() = Origins::default();
    }

    /// The cached origins as `(current, next)`. Zero when unknown.
    pub fn cached(&self) -> (L1BlockRef, L1BlockRef) {
        let origins = *self.origins();
        (origins.current, origins.next)
    }

    async fn current_and_next(
        &self,
        l2_head: L2BlockRef,
    ) -> Result<(L1BlockRef, L1BlockRef), OriginSelectorError> {
        {
            let mut origins = self.origins();
            if origins.current.hash == l2_head.l1_origin.hash {
                return Ok((origins.current, origins.next));
            }
            if !origins.next.is_zero() && origins.next.hash == l2_head.l1_origin.hash {
                origins.current = origins.next;
                origins.next = L1BlockRef::default();
                return Ok((origins.current, origins.next));
            }
        }

        let current = self
            .fetcher
            .l1_block_ref_by_hash(l2_head.l1_origin.hash)
            .await
            .map_err(|source| OriginSelectorError::CurrentOrigin {
                origin: l2_head.l1_origin,
                source,
            })?;

        let mut origins = self.origins();
        origins.current = current;
        if origins.next.parent_hash != current.hash {
            origins.next = L1BlockRef::default();
        }
        Ok((origins.current, origins.next))
    }

    async fn fetch_next(
        &self,
        current: L1BlockRef,
        timeout: Duration,
    ) -> Result<L1BlockRef, L1FetchError> {
        let fetch = self.fetcher.l1_block_ref_by_number(current.number + 1);
        let next = tokio::time::timeout(timeout, fetch).await.map_err(|_| L1FetchError::Timeout)??;
        self.maybe_set_next(next);
        Ok(next)
    }

    /// Caches `next` if it still extends the current origin.
    fn maybe_set_next(&self, next: L1BlockRef) {
        let mut origins = self.origins();
        if next.parent_hash == origins.current.hash {
            origins.next = next;
        }
    }
}

/// Time granted to fetch the next origin, growing linearly from 1s at zero drift to 10s at
/// the maximum drift.
fn next_origin_timeout(drift: u64, max_drift: u64) -> Duration {
    if max_drift == 0 {
        return MIN_NEXT_ORIGIN_TIMEOUT + DRIFT_NEXT_ORIGIN_TIMEOUT;
    }
    let scaled = DRIFT_NEXT_ORIGIN_TIMEOUT.as_millis() as u64 * drift.min(max_drift) / max_drift;
    MIN_NEXT_ORIGIN_TIMEOUT + Duration::from_millis(scaled)
}

#[async_trait]
impl<F: L1Fetcher> Deriver for L1OriginSelector<F> {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::ForkchoiceUpdate { unsafe_head, .. } => {
                self.prefetch_next_origin(*unsafe_head).await;
            }
            Event::Reset { .. } => self.reset(),
            _ => return false,
        }
        true
    }
}
