//! The Engine API contract consumed by the engine controller.

use alloy_primitives::B256;
use alloy_rpc_types_engine::{ForkchoiceState, ForkchoiceUpdated, PayloadStatus};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tiller_protocol::{
    BlockLabel, ExecutionPayload, ExecutionPayloadEnvelope, L2BlockRef, PayloadAttributes,
    PayloadInfo,
};
use tokio::time::Instant;

/// Deadline of every call made to the execution engine.
pub const ENGINE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Range of error codes reserved by the Engine API.
const ENGINE_ERROR_CODES: std::ops::RangeInclusive<i64> = -38005..=-38001;

/// An error returned by the execution engine.
///
/// All variants but [`EngineApiError::Transport`] and [`EngineApiError::Timeout`] are input
/// errors: the engine received the request and refused it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineApiError {
    /// The forkchoice state does not match the engine's chain.
    #[error("invalid forkchoice state: {0}")]
    InvalidForkchoiceState(String),
    /// The payload attributes were rejected.
    #[error("invalid payload attributes: {0}")]
    InvalidPayloadAttributes(String),
    /// The engine does not know the requested payload id.
    #[error("unknown payload")]
    UnknownPayload,
    /// The requested block does not exist.
    #[error("block not found")]
    NotFound,
    /// Any other error response, with its JSON-RPC code.
    #[error("engine returned error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },
    /// The request never reached the engine or the response was lost.
    #[error("transport error: {0}")]
    Transport(String),
    /// The call exceeded its deadline.
    #[error("engine call timed out")]
    Timeout,
}

impl EngineApiError {
    /// Returns `true` if the engine answered the request with an error.
    pub const fn is_input_error(&self) -> bool {
        !matches!(self, Self::Transport(_) | Self::Timeout)
    }

    /// Returns `true` for error codes reserved by the Engine API.
    pub fn is_engine_error_code(&self) -> bool {
        match self {
            Self::InvalidForkchoiceState(_) |
            Self::InvalidPayloadAttributes(_) |
            Self::UnknownPayload => true,
            Self::Rpc { code, .. } => ENGINE_ERROR_CODES.contains(code),
            _ => false,
        }
    }
}

/// Carried by [`Event::EngineTemporaryError`] when a build could not start because the engine
/// is still syncing.
///
/// [`Event::EngineTemporaryError`]: tiller_event::Event::EngineTemporaryError
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, thiserror::Error)]
#[error("engine is syncing")]
pub struct EngineSyncingError;

/// The calls the control plane makes to the execution engine.
#[async_trait]
pub trait EngineApi: Send + Sync + Debug {
    /// Updates the engine's forkchoice, optionally starting a build job on top of the new head.
    async fn forkchoice_update(
        &self,
        state: ForkchoiceState,
        attributes: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineApiError>;

    /// Returns the payload of a build job and stops the job.
    async fn get_payload(&self, info: PayloadInfo)
    -> Result<ExecutionPayloadEnvelope, EngineApiError>;

    /// Executes a payload.
    async fn new_payload(
        &self,
        payload: ExecutionPayload,
        parent_beacon_block_root: Option<B256>,
    ) -> Result<PayloadStatus, EngineApiError>;

    /// Looks up an L2 block by label.
    async fn l2_block_ref_by_label(&self, label: BlockLabel)
    -> Result<L2BlockRef, EngineApiError>;
}

#[async_trait]
impl<T: EngineApi + ?Sized> EngineApi for Arc<T> {
    async fn forkchoice_update(
        &self,
        state: ForkchoiceState,
        attributes: Option<PayloadAttributes>,
    ) -> Result<ForkchoiceUpdated, EngineApiError> {
        (**self).forkchoice_update(state, attributes).await
    }

    async fn get_payload(
        &self,
        info: PayloadInfo,
    ) -> Result<ExecutionPayloadEnvelope, EngineApiError> {
        (**self).get_payload(info).await
    }

    async fn new_payload(
        &self,
        payload: ExecutionPayload,
        parent_beacon_block_root: Option<B256>,
    ) -> Result<PayloadStatus, EngineApiError> {
        (**self).new_payload(payload, parent_beacon_block_root).await
    }

    async fn l2_block_ref_by_label(
        &self,
        label: BlockLabel,
    ) -> Result<L2BlockRef, EngineApiError> {
        (**self).l2_block_ref_by_label(label).await
    }
}

/// Runs an engine call under [`ENGINE_CALL_TIMEOUT`] and records its duration.
pub(crate) async fn timed_call<T>(
    call: impl Future<Output = Result<T, EngineApiError>>,
    method: &'static str,
) -> Result<T, EngineApiError> {
    let start = Instant::now();
    let result =
        tokio::time::timeout(ENGINE_CALL_TIMEOUT, call).await.map_err(|_| EngineApiError::Timeout)?;

    let _elapsed = start.elapsed();
    tiller_macros::record!(
        histogram,
        crate::Metrics::ENGINE_METHOD_REQUEST_DURATION,
        "method",
        method,
        _elapsed.as_secs_f64()
    );
    #[cfg(not(feature = "metrics"))]
    let _ = method;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EngineApiError::InvalidForkchoiceState("x".into()), true, true)]
    #[case(EngineApiError::UnknownPayload, true, true)]
    #[case(EngineApiError::Rpc { code: -38004, message: "too large".into() }, true, true)]
    #[case(EngineApiError::Rpc { code: -32000, message: "server".into() }, true, false)]
    #[case(EngineApiError::NotFound, true, false)]
    #[case(EngineApiError::Transport("refused".into()), false, false)]
    #[case(EngineApiError::Timeout, false, false)]
    fn classifies_errors(
        #[case] err: EngineApiError,
        #[case] input: bool,
        #[case] engine_code: bool,
    ) {
        assert_eq!(err.is_input_error(), input);
        assert_eq!(err.is_engine_error_code(), engine_code);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_call_times_out() {
        let never = std::future::pending::<Result<(), EngineApiError>>();
        assert_eq!(timed_call(never, "test").await, Err(EngineApiError::Timeout));
    }
}
