//! Errors of the engine controller and their severities.

use crate::{EngineApiError, EngineSyncingError};
use alloy_rpc_types_engine::PayloadStatusEnum;
use derive_more::Display;
use thiserror::Error;
use tiller_event::{Event, EventError};
use tiller_protocol::{BlockId, FromPayloadError};

/// The severity of an engine controller error.
///
/// Decides which error event reports the failure.
#[derive(Debug, PartialEq, Eq, Display, Clone, Copy)]
pub enum Severity {
    /// The operation may succeed when retried later.
    #[display("temporary")]
    Temporary,
    /// The engine state disagrees with ours and must be rebuilt.
    #[display("reset")]
    Reset,
    /// An invariant is broken. The node must stop.
    #[display("critical")]
    Critical,
}

impl Severity {
    /// Wraps `err` into the error event matching this severity.
    pub fn into_event(self, err: EventError) -> Event {
        match self {
            Self::Temporary => Event::EngineTemporaryError { err },
            Self::Reset => Event::Reset { err },
            Self::Critical => Event::CriticalError { err },
        }
    }
}

/// An error raised while driving the execution engine.
#[derive(Debug, Error)]
pub enum EngineControllerError {
    /// The forkchoice state did not change since the last update.
    #[error("no forkchoice update needed")]
    NoForkchoiceUpdateNeeded,
    /// The unsafe head is behind the finalized head.
    #[error("invalid forkchoice state, unsafe head {unsafe_head} is behind finalized head {finalized}")]
    UnsafeBehindFinalized {
        /// The unsafe head.
        unsafe_head: BlockId,
        /// The finalized head.
        finalized: BlockId,
    },
    /// The engine rejected the forkchoice state.
    #[error("forkchoice update was inconsistent with engine, need reset to resolve: {0}")]
    InconsistentForkchoice(#[source] EngineApiError),
    /// The engine answered the forkchoice update with an unexpected error.
    #[error("unexpected error code in forkchoice-updated response: {0}")]
    ForkchoiceRejected(#[source] EngineApiError),
    /// The forkchoice update did not reach the engine.
    #[error("failed to sync forkchoice with engine: {0}")]
    ForkchoiceFailed(#[source] EngineApiError),
    /// The forkchoice update returned a status we cannot continue with.
    #[error("forkchoice update returned status {0}")]
    ForkchoiceStatus(PayloadStatusEnum),
    /// The payload could not be sent to the engine.
    #[error("failed to insert payload: {0}")]
    NewPayloadFailed(#[source] EngineApiError),
    /// The engine did not accept the payload.
    #[error("cannot process payload {block}, parent {parent}: status {status}")]
    NewPayloadStatus {
        /// The payload.
        block: BlockId,
        /// Its parent.
        parent: BlockId,
        /// The returned status.
        status: PayloadStatusEnum,
    },
    /// The finalized head could not be looked up when deciding on execution-layer sync.
    #[error("failed to fetch finalized head: {0}")]
    FinalizedLookup(#[source] EngineApiError),
    /// The payload does not describe a valid L2 block.
    #[error("failed to decode L2 block ref from payload: {0}")]
    FromPayload(#[from] FromPayloadError),
    /// A deposit-only block was rejected.
    #[error("failed to process block with only deposit transactions: {0}")]
    DepositOnlyInvalid(String),
}

impl EngineControllerError {
    /// The severity of the error.
    pub const fn severity(&self) -> Severity {
        match self {
            Self::UnsafeBehindFinalized { .. } | Self::DepositOnlyInvalid(_) => Severity::Critical,
            Self::InconsistentForkchoice(_) => Severity::Reset,
            Self::FromPayload(_) => Severity::Critical,
            Self::NoForkchoiceUpdateNeeded |
            Self::ForkchoiceRejected(_) |
            Self::ForkchoiceFailed(_) |
            Self::ForkchoiceStatus(_) |
            Self::NewPayloadFailed(_) |
            Self::NewPayloadStatus { .. } |
            Self::FinalizedLookup(_) => Severity::Temporary,
        }
    }

    /// Classifies an error returned by a forkchoice update that carried no attributes.
    pub(crate) fn from_forkchoice(err: EngineApiError) -> Self {
        match err {
            EngineApiError::InvalidForkchoiceState(_) => Self::InconsistentForkchoice(err),
            err if err.is_input_error() => Self::ForkchoiceRejected(err),
            err => Self::ForkchoiceFailed(err),
        }
    }

    /// The error event reporting this error.
    pub fn into_event(self) -> Event {
        self.severity().into_event(EventError::new(self))
    }
}

/// An error raised when the engine refuses to start a build job.
#[derive(Debug, Error)]
pub enum BuildStartError {
    /// The engine rejected the parent forkchoice state.
    #[error("pre-block-creation forkchoice update was inconsistent with engine, need reset to resolve: {0}")]
    InconsistentPrestate(#[source] EngineApiError),
    /// The engine rejected the payload attributes.
    #[error("payload attributes are not valid, cannot build block: {0}")]
    InvalidAttributes(#[source] EngineApiError),
    /// The engine answered with an unexpected Engine API error code.
    #[error("unexpected engine error code in forkchoice-updated response: {0}")]
    EngineError(#[source] EngineApiError),
    /// The request failed without an Engine API error code.
    #[error("failed to create new block via forkchoice: {0}")]
    Failed(#[source] EngineApiError),
    /// The engine considers the attributes invalid.
    #[error("forkchoice update marked the build invalid: {0}")]
    InvalidStatus(String),
    /// The engine accepted the build but returned no payload id.
    #[error("nil id in forkchoice result when expecting a valid ID")]
    MissingPayloadId,
    /// The engine is syncing and cannot build.
    #[error("temporarily cannot start block building: {0}")]
    Syncing(#[source] EngineSyncingError),
    /// The engine returned a status that does not start a build.
    #[error("unexpected forkchoice status {0}")]
    UnexpectedStatus(PayloadStatusEnum),
}

impl BuildStartError {
    /// Classifies an error returned by a forkchoice update that carried attributes.
    pub(crate) fn from_engine(err: EngineApiError) -> Self {
        match err {
            EngineApiError::InvalidForkchoiceState(_) => Self::InconsistentPrestate(err),
            EngineApiError::InvalidPayloadAttributes(_) => Self::InvalidAttributes(err),
            err if err.is_engine_error_code() => Self::EngineError(err),
            err => Self::Failed(err),
        }
    }

    /// Returns `true` if the attributes themselves were refused.
    pub const fn is_invalid_attributes(&self) -> bool {
        matches!(self, Self::InvalidAttributes(_) | Self::InvalidStatus(_))
    }

    /// The severity of errors that do not invalidate the attributes.
    pub const fn severity(&self) -> Severity {
        match self {
            Self::InconsistentPrestate(_) | Self::EngineError(_) => Severity::Reset,
            _ => Severity::Temporary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EngineApiError::InvalidForkchoiceState("bad".into()), Severity::Reset)]
    #[case(EngineApiError::Rpc { code: -32000, message: "x".into() }, Severity::Temporary)]
    #[case(EngineApiError::Transport("down".into()), Severity::Temporary)]
    fn forkchoice_error_taxonomy(#[case] err: EngineApiError, #[case] severity: Severity) {
        assert_eq!(EngineControllerError::from_forkchoice(err).severity(), severity);
    }

    #[rstest]
    #[case(EngineApiError::InvalidForkchoiceState("x".into()), false, Severity::Reset)]
    #[case(EngineApiError::InvalidPayloadAttributes("x".into()), true, Severity::Temporary)]
    #[case(EngineApiError::Rpc { code: -38005, message: "fork".into() }, false, Severity::Reset)]
    #[case(EngineApiError::Rpc { code: -32603, message: "internal".into() }, false, Severity::Temporary)]
    #[case(EngineApiError::Timeout, false, Severity::Temporary)]
    fn build_start_taxonomy(
        #[case] err: EngineApiError,
        #[case] invalid: bool,
        #[case] severity: Severity,
    ) {
        let err = BuildStartError::from_engine(err);
        assert_eq!(err.is_invalid_attributes(), invalid);
        assert_eq!(err.severity(), severity);
    }

    #[test]
    fn events_follow_severity() {
        let ev = EngineControllerError::UnsafeBehindFinalized {
            unsafe_head: BlockId::default(),
            finalized: BlockId::default(),
        }
        .into_event();
        assert!(ev.is_critical());

        let ev =
            EngineControllerError::InconsistentForkchoice(EngineApiError::Timeout).into_event();
        assert!(matches!(ev, Event::Reset { .. }));

        let ev = EngineControllerError::NewPayloadFailed(EngineApiError::Timeout).into_event();
        let Event::EngineTemporaryError { err } = ev else { panic!("expected temporary error") };
        assert!(err.is::<EngineControllerError>());
    }
}
