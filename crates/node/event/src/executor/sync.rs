//! Single-queue executor drained by one driver.

use super::{Executor, ExecutorError, ExecutorHandle, ExecutorOpts};
use crate::{AnnotatedEvent, Event, Executable};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use tokio::sync::Notify;

/// Maximum number of queued events. Enqueueing beyond it fails.
pub const SANITY_EVENT_LIMIT: usize = 1000;

/// An executor with one FIFO queue shared by all actors.
///
/// Nothing is processed until a driver calls [`SyncExecutor::drain`] or
/// [`SyncExecutor::drain_until`]. Every event is delivered to every executable, in the
/// order the executables were added, before the next event is popped.
pub struct SyncExecutor {
    inner: Arc<Mutex<SyncState>>,
    notify: Notify,
}

#[derive(Default)]
struct SyncState {
    executables: Vec<(u64, Arc<dyn Executable>)>,
    queue: VecDeque<AnnotatedEvent>,
    next_id: u64,
}

impl fmt::Debug for SyncExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner);
        f.debug_struct("SyncExecutor")
            .field("executables", &state.executables.len())
            .field("queued", &state.queue.len())
            .finish()
    }
}

impl Default for SyncExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<SyncState>) -> MutexGuard<'_, SyncState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncExecutor {
    /// Creates an empty executor.
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(SyncState::default())), notify: Notify::new() }
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Waits until an event is enqueued.
    ///
    /// A notification sent while nobody waits is kept for the next caller.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Processes events until the queue is empty.
    pub async fn drain(&self) {
        while let Some(event) = self.pop() {
            self.process(event).await;
        }
    }

    /// Processes events until one matches `cond`.
    ///
    /// With `exclusive`, the matching event is left at the head of the queue unprocessed.
    /// Fails if the queue runs empty first.
    pub async fn drain_until<F>(&self, cond: F, exclusive: bool) -> Result<(), ExecutorError>
    where
        F: Fn(&Event) -> bool,
    {
        let mut processed = 0;
        loop {
            let event = {
                let mut state = lock(&self.inner);
                let Some(head) = state.queue.front() else {
                    return Err(ExecutorError::ConditionNotMet(processed));
                };
                let matched = cond(&head.event);
                if matched && exclusive {
                    return Ok(());
                }
                let Some(event) = state.queue.pop_front() else {
                    return Err(ExecutorError::ConditionNotMet(processed));
                };
                (event, matched)
            };
            self.process(event.0).await;
            processed += 1;
            if event.1 {
                return Ok(());
            }
        }
    }

    fn pop(&self) -> Option<AnnotatedEvent> {
        lock(&self.inner).queue.pop_front()
    }

    async fn process(&self, event: AnnotatedEvent) {
        let executables: Vec<_> =
            lock(&self.inner).executables.iter().map(|(_, e)| Arc::clone(e)).collect();
        for executable in executables {
            executable.run_event(event.clone()).await;
        }
    }
}

#[async_trait]
impl Executor for SyncExecutor {
    fn add(
        &self,
        executable: Arc<dyn Executable>,
        _opts: &ExecutorOpts,
    ) -> Box<dyn ExecutorHandle> {
        let mut state = lock(&self.inner);
        let id = state.next_id;
        state.next_id += 1;
        state.executables.push((id, executable));
        Box::new(SyncHandle { id, state: Arc::downgrade(&self.inner) })
    }

    async fn enqueue(&self, event: AnnotatedEvent) -> Result<(), ExecutorError> {
        {
            let mut state = lock(&self.inner);
            if state.queue.len() >= SANITY_EVENT_LIMIT {
                return Err(ExecutorError::QueueFull(state.queue.len()));
            }
            state.queue.push_back(event);
        }
        self.notify.notify_one();
        Ok(())
    }
}

struct SyncHandle {
    id: u64,
    state: Weak<Mutex<SyncState>>,
}

impl fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandle").field("id", &self.id).finish()
    }
}

#[async_trait]
impl ExecutorHandle for SyncHandle {
    async fn leave(&self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).executables.retain(|(id, _)| *id != self.id);
        }
    }
}
