//! Finalization on alt-DA chains.

use crate::Finalizer;
use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tiller_event::{Deriver, Event};
use tiller_protocol::{L1BlockRef, L1Fetcher};

/// Hands L1 finality back to the finalizer once the data availability backend allows it.
#[derive(Clone)]
pub struct FinalizedHeadSignal {
    target: Arc<dyn Deriver>,
}

impl fmt::Debug for FinalizedHeadSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FinalizedHeadSignal").finish_non_exhaustive()
    }
}

impl FinalizedHeadSignal {
    /// Creates a signal delivering to `target`.
    pub const fn new(target: Arc<dyn Deriver>) -> Self {
        Self { target }
    }

    /// Reports `finalized_l1` as final for L2 purposes.
    pub async fn signal(&self, finalized_l1: L1BlockRef) {
        self.target.on_event(&Event::FinalizeL1 { finalized_l1 }).await;
    }
}

/// The data availability backend of an alt-DA chain.
#[async_trait]
pub trait AltDaBackend: Send + Sync + fmt::Debug {
    /// Receives an L1 finality signal. The backend replays it through the registered
    /// [`FinalizedHeadSignal`] once the challenge window of that block has expired.
    async fn finalize(&self, finalized_l1: L1BlockRef);

    /// Registers where delayed finality signals go.
    fn on_finalized_head_signal(&self, signal: FinalizedHeadSignal);
}

/// A [`Finalizer`] whose L1 finality input is routed through an [`AltDaBackend`].
///
/// Every other event reaches the inner finalizer unchanged.
pub struct AltDaFinalizer<F> {
    inner: Arc<Finalizer<F>>,
    backend: Arc<dyn AltDaBackend>,
}

impl<F: fmt::Debug> fmt::Debug for AltDaFinalizer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AltDaFinalizer")
            .field("inner", &self.inner)
            .field("backend", &self.backend)
            .finish()
    }
}

impl<F: L1Fetcher + 'static> AltDaFinalizer<F> {
    /// Wraps `inner` and registers it with `backend` for delayed finality signals.
    pub fn new(inner: Arc<Finalizer<F>>, backend: Arc<dyn AltDaBackend>) -> Self {
        backend.on_finalized_head_signal(FinalizedHeadSignal::new(
            Arc::clone(&inner) as Arc<dyn Deriver>
        ));
        Self { inner, backend }
    }

    /// The wrapped finalizer.
    pub const fn inner(&self) -> &Arc<Finalizer<F>> {
        &self.inner
    }
}

#[async_trait]
impl<F: L1Fetcher + 'static> Deriver for AltDaFinalizer<F> {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::FinalizeL1 { finalized_l1 } => {
                debug!(
                    target: "finalizer",
                    l1 = %finalized_l1.id(),
                    "Forwarding L1 finality signal to alt-DA backend"
                );
                self.backend.finalize(*finalized_l1).await;
                true
            }
            _ => self.inner.on_event(event).await,
        }
    }
}
