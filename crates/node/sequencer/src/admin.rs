//! The operator surface of the sequencer.

use crate::{AttributesBuilder, Sequencer, SequencerError};
use alloy_primitives::B256;
use async_trait::async_trait;
use std::{fmt::Debug, time::SystemTime};
use tiller_protocol::L1Fetcher;

/// Operator control over sequencing.
#[async_trait]
pub trait SequencerAdmin: Send + Sync + Debug {
    /// Starts sequencing on top of the unsafe head `head`.
    async fn start(&self, head: B256) -> Result<(), SequencerError>;

    /// Stops sequencing and returns the hash of the unsafe head.
    async fn stop(&self) -> Result<B256, SequencerError>;

    /// Sets the safe-lag limit. Zero disables the check.
    async fn set_max_safe_lag(&self, max_safe_lag: u64) -> Result<(), SequencerError>;

    /// Makes this node the leader regardless of the conductor.
    async fn override_leader(&self) -> Result<(), SequencerError>;

    /// Returns `true` while sequencing.
    fn active(&self) -> bool;

    /// When the next sequencer action is due, if one is planned.
    async fn next_action(&self) -> Option<SystemTime>;

    /// Returns `true` if an external conductor gates sequencing.
    fn conductor_enabled(&self) -> bool;

    /// Releases the resources held by the sequencer.
    async fn close(&self);
}

#[async_trait]
impl<F: L1Fetcher, B: AttributesBuilder> SequencerAdmin for Sequencer<F, B> {
    async fn start(&self, head: B256) -> Result<(), SequencerError> {
        Self::start(self, head).await
    }

    async fn stop(&self) -> Result<B256, SequencerError> {
        Self::stop(self).await
    }

    async fn set_max_safe_lag(&self, max_safe_lag: u64) -> Result<(), SequencerError> {
        Self::set_max_safe_lag(self, max_safe_lag);
        Ok(())
    }

    async fn override_leader(&self) -> Result<(), SequencerError> {
        Self::override_leader(self).await
    }

    fn active(&self) -> bool {
        Self::active(self)
    }

    async fn next_action(&self) -> Option<SystemTime> {
        Self::next_action(self).await
    }

    fn conductor_enabled(&self) -> bool {
        Self::conductor_enabled(self)
    }

    async fn close(&self) {
        Self::close(self).await
    }
}

/// A [`SequencerAdmin`] for nodes that do not sequence.
///
/// Every mutating call fails with [`SequencerError::NotEnabled`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSequencer;

#[async_trait]
impl SequencerAdmin for DisabledSequencer {
    async fn start(&self, _head: B256) -> Result<(), SequencerError> {
        Err(SequencerError::NotEnabled)
    }

    async fn stop(&self) -> Result<B256, SequencerError> {
        Err(SequencerError::NotEnabled)
    }

    async fn set_max_safe_lag(&self, _max_safe_lag: u64) -> Result<(), SequencerError> {
        Err(SequencerError::NotEnabled)
    }

    async fn override_leader(&self) -> Result<(), SequencerError> {
        Err(SequencerError::NotEnabled)
    }

    fn active(&self) -> bool {
        false
    }

    async fn next_action(&self) -> Option<SystemTime> {
        None
    }

    fn conductor_enabled(&self) -> bool {
        false
    }

    async fn close(&self) {}
}
