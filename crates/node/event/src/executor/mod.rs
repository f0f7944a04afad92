//! Event delivery back-ends.

use crate::{AnnotatedEvent, Executable};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

mod sync;
pub use sync::{SANITY_EVENT_LIMIT, SyncExecutor};

mod parallel;
pub use parallel::ParallelExecutor;

/// Default capacity of each actor's channel in the [`ParallelExecutor`].
pub const DEFAULT_ACTOR_CAPACITY: usize = 200;

/// Per-actor executor options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOpts {
    /// Channel capacity for executors that buffer per actor.
    pub capacity: usize,
}

impl Default for ExecutorOpts {
    fn default() -> Self {
        Self { capacity: DEFAULT_ACTOR_CAPACITY }
    }
}

/// Error returned by an [`Executor`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The queue reached its sanity limit.
    #[error("event queue is full: {0} events pending")]
    QueueFull(usize),
    /// The queue ran dry before the drain condition was met.
    #[error("drained {0} events without meeting the condition")]
    ConditionNotMet(usize),
}

/// Handle returned by [`Executor::add`] that detaches the executable again.
#[async_trait]
pub trait ExecutorHandle: Send + Sync + Debug {
    /// Detaches the executable. Events enqueued afterwards are not delivered to it.
    async fn leave(&self);
}

/// Delivers annotated events to every attached [`Executable`].
#[async_trait]
pub trait Executor: Send + Sync + Debug {
    /// Attaches an executable.
    fn add(&self, executable: Arc<dyn Executable>, opts: &ExecutorOpts) -> Box<dyn ExecutorHandle>;

    /// Queues an event for delivery.
    async fn enqueue(&self, event: AnnotatedEvent) -> Result<(), ExecutorError>;
}
