//! Sequencer errors.

use crate::{ConductorError, ListenerError};
use alloy_primitives::B256;
use tiller_protocol::BlockId;

/// An error raised by the sequencer.
///
/// Operator calls return these directly. [`SequencerError::CommitPayload`] and
/// [`SequencerError::InconsistentL1Origin`] travel inside error events instead.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    /// The node does not sequence.
    #[error("sequencer is not enabled")]
    NotEnabled,
    /// Start was requested on a running sequencer.
    #[error("sequencer already running")]
    AlreadyStarted,
    /// Stop was requested on a stopped sequencer.
    #[error("sequencer not running")]
    AlreadyStopped,
    /// The conductor elected another node.
    #[error("sequencer is not the leader, aborting")]
    NotLeader,
    /// A conductor call failed.
    #[error("conductor call failed: {0}")]
    Conductor(#[source] ConductorError),
    /// A sealed payload could not be committed to the conductor.
    #[error("failed to commit unsafe payload to conductor: {0}")]
    CommitPayload(#[source] ConductorError),
    /// No unsafe head is known yet.
    #[error("no prestate, cannot determine if sequencer start at {0} is safe")]
    NoPrestate(B256),
    /// The requested head is not the unsafe head.
    #[error("block hash does not match: head {head}, received {received}")]
    HeadMismatch {
        /// The unsafe head.
        head: BlockId,
        /// The requested head hash.
        received: B256,
    },
    /// The selected origin neither is nor follows the origin of the unsafe head.
    #[error(
        "cannot build new L2 block with L1 origin {origin} (parent L1 {origin_parent}) on current L2 head {head} with L1 origin {head_origin}"
    )]
    InconsistentL1Origin {
        /// The selected origin.
        origin: BlockId,
        /// Parent hash of the selected origin.
        origin_parent: B256,
        /// The unsafe head.
        head: BlockId,
        /// Origin of the unsafe head.
        head_origin: BlockId,
    },
    /// The state listener refused the transition.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// The sequencer was closed while waiting.
    #[error("sequencer is shutting down")]
    Cancelled,
}
