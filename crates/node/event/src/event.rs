//! The event taxonomy.

use std::{error::Error, fmt, sync::Arc, time::Instant};
use tiller_protocol::{
    AttributesWithParent, ExecutionPayloadEnvelope, L1BlockRef, L2BlockRef, PayloadInfo,
};

/// A cloneable, type-erased error carried inside events.
///
/// Receivers that care about the concrete error use [`EventError::downcast_ref`].
#[derive(Clone)]
pub struct EventError(Arc<dyn Error + Send + Sync + 'static>);

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MessageError(String);

impl EventError {
    /// Wraps `err`.
    pub fn new<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Creates an error from a plain message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::new(MessageError(msg.into()))
    }

    /// Returns the wrapped error as `T`, if it is one.
    pub fn downcast_ref<T: Error + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Returns `true` if the wrapped error is a `T`.
    pub fn is<T: Error + 'static>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Searches the wrapped error and its source chain for a `T`.
    pub fn find<T: Error + 'static>(&self) -> Option<&T> {
        let mut current: Option<&(dyn Error + 'static)> = Some(self.0.as_ref());
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<T>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }
}

impl fmt::Debug for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Error for EventError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

/// Every message exchanged between actors.
///
/// The kebab-case variant name (see [`Event::name`]) is stable and used for logs, metrics
/// and tracer output. Heavy payloads are shared behind [`Arc`] so fan-out stays cheap.
#[derive(Debug, Clone, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Event {
    // engine
    /// Asks the engine controller to publish its current heads.
    ForkchoiceRequest,
    /// The engine accepted a forkchoice state.
    ForkchoiceUpdate {
        /// Unsafe head.
        unsafe_head: L2BlockRef,
        /// Safe head.
        safe_head: L2BlockRef,
        /// Finalized head.
        finalized: L2BlockRef,
    },
    /// Asks the engine controller to publish its pending-safe head.
    PendingSafeRequest,
    /// The pending-safe head moved.
    PendingSafeUpdate {
        /// Pending-safe head.
        pending_safe: L2BlockRef,
        /// Unsafe head.
        unsafe_head: L2BlockRef,
    },
    /// The unsafe head moved.
    UnsafeUpdate {
        /// New unsafe head.
        block: L2BlockRef,
    },
    /// The cross-unsafe head moved.
    CrossUnsafeUpdate {
        /// Cross-unsafe head.
        cross_unsafe: L2BlockRef,
        /// Local unsafe head.
        local_unsafe: L2BlockRef,
    },
    /// A derivation span completed.
    LocalSafeUpdate {
        /// Local-safe head.
        local_safe: L2BlockRef,
        /// L1 block the span was derived from.
        derived_from: L1BlockRef,
    },
    /// The cross-safe head moved.
    CrossSafeUpdate {
        /// Cross-safe head.
        cross_safe: L2BlockRef,
        /// Local-safe head.
        local_safe: L2BlockRef,
    },
    /// The finalized head moved.
    FinalizedUpdate {
        /// New finalized head.
        block: L2BlockRef,
    },
    /// Asks the engine controller to send a forkchoice update if one is due.
    TryUpdateEngine,
    /// Asks the engine controller to reorg back to the backup-unsafe head if one is due.
    TryBackupUnsafeReorg,

    // build
    /// Start building a block.
    BuildStart {
        /// Attributes and parent of the block.
        attributes: Arc<AttributesWithParent>,
    },
    /// The engine started a build job.
    BuildStarted {
        /// Build handle.
        info: PayloadInfo,
        /// When the job started.
        build_started: Instant,
        /// Parent of the block being built.
        parent: L2BlockRef,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },
    /// Seal the block of a build job.
    BuildSeal {
        /// Build handle.
        info: PayloadInfo,
        /// When the job started.
        build_started: Instant,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },
    /// A build job produced a payload.
    BuildSealed {
        /// Build handle.
        info: PayloadInfo,
        /// The sealed payload.
        envelope: Arc<ExecutionPayloadEnvelope>,
        /// Reference of the sealed block.
        block: L2BlockRef,
        /// When the job started.
        build_started: Instant,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },
    /// Abandon a build job.
    BuildCancel {
        /// Build handle.
        info: PayloadInfo,
        /// Suppress error reporting when the engine fails to cancel.
        force: bool,
    },
    /// The engine deterministically rejected build attributes.
    BuildInvalid {
        /// The rejected attributes.
        attributes: Arc<AttributesWithParent>,
        /// Rejection reason.
        err: EventError,
    },
    /// Build attributes were dropped after being rejected.
    InvalidPayloadAttributes {
        /// The rejected attributes.
        attributes: Arc<AttributesWithParent>,
        /// Rejection reason.
        err: EventError,
    },
    /// A sealed payload failed its sanity checks.
    PayloadSealInvalid {
        /// Build handle.
        info: PayloadInfo,
        /// Failure reason.
        err: EventError,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },
    /// The engine no longer knows the build job.
    PayloadSealExpiredError {
        /// Build handle.
        info: PayloadInfo,
        /// Failure reason.
        err: EventError,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },
    /// Fetching a sealed payload failed.
    PayloadSealTemporaryError {
        /// Build handle.
        info: PayloadInfo,
        /// Failure reason.
        err: EventError,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },

    // payload
    /// Insert a payload into the engine.
    PayloadProcess {
        /// The payload.
        envelope: Arc<ExecutionPayloadEnvelope>,
        /// Reference of the payload block.
        block: L2BlockRef,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },
    /// The engine accepted a payload.
    PayloadSuccess {
        /// The payload.
        envelope: Arc<ExecutionPayloadEnvelope>,
        /// Reference of the payload block.
        block: L2BlockRef,
        /// Whether the block closes a derivation span.
        is_last_in_span: bool,
        /// L1 source for derived blocks, `None` for sequenced ones.
        derived_from: Option<L1BlockRef>,
    },
    /// The engine rejected a payload.
    PayloadInvalid {
        /// The payload.
        envelope: Arc<ExecutionPayloadEnvelope>,
        /// Rejection reason.
        err: EventError,
    },

    // cl-sync
    /// A payload arrived over gossip.
    ReceivedUnsafePayload {
        /// The payload.
        envelope: Arc<ExecutionPayloadEnvelope>,
    },
    /// Apply a buffered gossip payload on top of the unsafe head.
    ProcessUnsafePayload {
        /// The payload.
        envelope: Arc<ExecutionPayloadEnvelope>,
    },

    // reset
    /// Asks for the engine heads to be walked back and re-established.
    ResetEngineRequest,
    /// Replace every engine head.
    ForceEngineReset {
        /// Unsafe head.
        unsafe_head: L2BlockRef,
        /// Safe head.
        safe_head: L2BlockRef,
        /// Finalized head.
        finalized: L2BlockRef,
    },
    /// The engine heads were replaced.
    EngineResetConfirmed {
        /// Unsafe head.
        unsafe_head: L2BlockRef,
        /// Safe head.
        safe_head: L2BlockRef,
        /// Finalized head.
        finalized: L2BlockRef,
    },
    /// State is inconsistent with L1 or the engine and must be rebuilt.
    Reset {
        /// Cause.
        err: EventError,
    },

    // status
    /// New L1 head.
    L1Unsafe {
        /// L1 head.
        l1_unsafe: L1BlockRef,
    },
    /// New L1 safe block.
    L1Safe {
        /// L1 safe block.
        l1_safe: L1BlockRef,
    },

    // finality
    /// New finalized L1 block.
    FinalizeL1 {
        /// Finalized L1 block.
        finalized_l1: L1BlockRef,
    },
    /// Asks the finalizer to look for a block to finalize.
    TryFinalize,
    /// Promote an L2 block to finalized.
    PromoteFinalized {
        /// Block to finalize.
        block: L2BlockRef,
    },
    /// A safe block was derived from an L1 block.
    SafeDerived {
        /// Safe block.
        safe_head: L2BlockRef,
        /// L1 source.
        derived_from: L1BlockRef,
    },

    // derivation
    /// The derivation pipeline is idle at `origin`.
    DeriverIdle {
        /// Current L1 origin of the pipeline.
        origin: L1BlockRef,
    },
    /// The derivation pipeline moved to a new L1 origin.
    DeriverL1Status {
        /// Current L1 origin of the pipeline.
        origin: L1BlockRef,
    },

    // sequencer
    /// The sequencer's scheduled action is due.
    SequencerAction,

    // errors
    /// Unrecoverable failure. Puts the system into abort mode.
    CriticalError {
        /// Cause.
        err: EventError,
    },
    /// Transient engine failure.
    EngineTemporaryError {
        /// Cause.
        err: EventError,
    },
    /// Transient L1 failure.
    L1TemporaryError {
        /// Cause.
        err: EventError,
    },
}

impl Event {
    /// The stable name of the event.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Returns `true` for [`Event::CriticalError`].
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::CriticalError { .. })
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An [`Event`] tagged with the system-wide emission sequence number.
#[derive(Debug, Clone)]
pub struct AnnotatedEvent {
    /// The event.
    pub event: Event,
    /// Monotonically increasing emission counter.
    pub emit_context: u64,
}
