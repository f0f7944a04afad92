//! Leader election through an external conductor.

use alloy_rpc_client::ReqwestClient;
use alloy_transport::{RpcError, TransportErrorKind};
use async_trait::async_trait;
use std::{
    fmt::Debug,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tiller_protocol::ExecutionPayloadEnvelope;
use url::Url;

/// Deadline of [`SequencerConductor::commit_unsafe_payload`] when called by the sequencer.
pub const CONDUCTOR_COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for conductor operations.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// An error occurred while making an RPC call to the conductor.
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError<TransportErrorKind>),
    /// The call did not complete in time.
    #[error("conductor call timed out")]
    Timeout,
    /// The client was closed.
    #[error("conductor client is closed")]
    Closed,
}

/// The conductor a sequencer must consult before producing blocks.
#[async_trait]
pub trait SequencerConductor: Send + Sync + Debug {
    /// Returns `true` if an external conductor is in use.
    fn enabled(&self) -> bool;

    /// Returns `true` if this node is the leader.
    async fn leader(&self) -> Result<bool, ConductorError>;

    /// Replicates a sealed payload before it is published.
    async fn commit_unsafe_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<(), ConductorError>;

    /// Forces this node to act as the leader, bypassing the conductor.
    async fn override_leader(&self) -> Result<(), ConductorError>;

    /// Releases the conductor connection.
    async fn close(&self);
}

/// A [`SequencerConductor`] for nodes without a conductor. This node is always the leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConductor;

#[async_trait]
impl SequencerConductor for NoopConductor {
    fn enabled(&self) -> bool {
        false
    }

    async fn leader(&self) -> Result<bool, ConductorError> {
        Ok(true)
    }

    async fn commit_unsafe_payload(
        &self,
        _envelope: &ExecutionPayloadEnvelope,
    ) -> Result<(), ConductorError> {
        Ok(())
    }

    async fn override_leader(&self) -> Result<(), ConductorError> {
        Ok(())
    }

    async fn close(&self) {}
}

/// A client for communicating with the conductor service via RPC.
///
/// Once the leader is overridden, leadership checks succeed and payloads are no longer
/// committed to the conductor.
#[derive(Debug)]
pub struct ConductorClient {
    /// The inner RPC provider.
    rpc: ReqwestClient,
    overridden: AtomicBool,
    closed: AtomicBool,
}

impl ConductorClient {
    /// Creates a new conductor client using HTTP transport.
    pub fn new_http(url: Url) -> Self {
        let rpc = ReqwestClient::new_http(url);
        Self { rpc, overridden: AtomicBool::new(false), closed: AtomicBool::new(false) }
    }

    /// Check if the conductor is active.
    pub async fn conductor_active(&self) -> Result<bool, ConductorError> {
        self.ensure_open()?;
        let result: bool = self.rpc.request("conductor_active", ()).await?;
        Ok(result)
    }

    /// Returns `true` once [`SequencerConductor::override_leader`] was called.
    pub fn is_overridden(&self) -> bool {
        self.overridden.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), ConductorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConductorError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SequencerConductor for ConductorClient {
    fn enabled(&self) -> bool {
        true
    }

    async fn leader(&self) -> Result<bool, ConductorError> {
        if self.is_overridden() {
            return Ok(true);
        }
        self.ensure_open()?;
        let result: bool = self.rpc.request("conductor_leader", ()).await?;
        Ok(result)
    }

    async fn commit_unsafe_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<(), ConductorError> {
        if self.is_overridden() {
            return Ok(());
        }
        self.ensure_open()?;
        let params = [envelope.clone()];
        let _result: () = self.rpc.request("conductor_commitUnsafePayload", params).await?;
        Ok(())
    }

    async fn override_leader(&self) -> Result<(), ConductorError> {
        self.overridden.store(true, Ordering::SeqCst);
        info!(target: "sequencer", "Overrode leader, conductor checks are bypassed");
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
