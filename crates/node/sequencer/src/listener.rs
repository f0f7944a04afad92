//! Persistence hook for the sequencer's active flag.

use std::fmt::Debug;

/// A failure reported by a [`SequencerStateListener`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sequencer state listener failed: {0}")]
pub struct ListenerError(pub String);

/// Notified whenever the sequencer starts or stops, so the state survives a restart.
///
/// Called with the sequencer lock held. A failing start or stop is aborted.
pub trait SequencerStateListener: Send + Sync + Debug {
    /// The sequencer is about to start.
    fn sequencer_started(&self) -> Result<(), ListenerError>;

    /// The sequencer is about to stop.
    fn sequencer_stopped(&self) -> Result<(), ListenerError>;
}

/// A [`SequencerStateListener`] that remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStateListener;

impl SequencerStateListener for NoopStateListener {
    fn sequencer_started(&self) -> Result<(), ListenerError> {
        Ok(())
    }

    fn sequencer_stopped(&self) -> Result<(), ListenerError> {
        Ok(())
    }
}
