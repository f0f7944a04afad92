//! Errors of the finalizer.

use tiller_event::{Event, EventError};
use tiller_protocol::{BlockId, L1FetchError};

/// An error raised while verifying that a finalization candidate is canonical.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalizerError {
    /// The canonical L1 block could not be fetched.
    #[error("failed to check if on finalizing L1 chain, could not fetch block {number}: {source}")]
    Fetch {
        /// Number of the L1 block.
        number: u64,
        /// Fetch failure.
        #[source]
        source: L1FetchError,
    },
    /// The finalizer followed an L1 block that is no longer canonical.
    #[error("need to reset, we are on {tracked}, not on the finalizing L1 chain {canonical}")]
    NotCanonical {
        /// The block the finalizer knows.
        tracked: BlockId,
        /// The canonical block at the same height.
        canonical: BlockId,
    },
}

impl FinalizerError {
    /// The error event reporting this error.
    pub fn into_event(self) -> Event {
        match self {
            Self::Fetch { .. } => Event::L1TemporaryError { err: EventError::new(self) },
            Self::NotCanonical { .. } => Event::Reset { err: EventError::new(self) },
        }
    }
}
