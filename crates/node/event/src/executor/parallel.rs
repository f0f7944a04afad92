//! Executor with one worker task per actor.

use super::{Executor, ExecutorError, ExecutorHandle, ExecutorOpts};
use crate::{AnnotatedEvent, Executable};
use async_trait::async_trait;
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// An executor that gives every actor a bounded channel and a dedicated worker.
///
/// [`Executor::enqueue`] copies the event into each actor's channel in turn and waits while a
/// channel is full. Per actor, events are processed in emission order. Must be used from
/// within a tokio runtime.
#[derive(Default)]
pub struct ParallelExecutor {
    workers: Arc<Mutex<Vec<Arc<Worker>>>>,
}

struct Worker {
    sender: mpsc::Sender<AnnotatedEvent>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("ParallelExecutor").field("workers", &workers).finish()
    }
}

impl ParallelExecutor {
    /// Creates an executor with no actors.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Executor for ParallelExecutor {
    fn add(&self, executable: Arc<dyn Executable>, opts: &ExecutorOpts) -> Box<dyn ExecutorHandle> {
        let (sender, mut receiver) = mpsc::channel(opts.capacity.max(1));
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = receiver.recv() => match event {
                        Some(event) => executable.run_event(event).await,
                        None => break,
                    },
                }
            }
        });

        let worker = Arc::new(Worker { sender, cancel, task: Mutex::new(Some(task)) });
        self.workers.lock().unwrap_or_else(PoisonError::into_inner).push(Arc::clone(&worker));
        Box::new(ParallelHandle { worker, workers: Arc::clone(&self.workers) })
    }

    async fn enqueue(&self, event: AnnotatedEvent) -> Result<(), ExecutorError> {
        let workers: Vec<_> =
            self.workers.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect();
        for worker in workers {
            tokio::select! {
                _ = worker.cancel.cancelled() => {}
                _ = worker.sender.send(event.clone()) => {}
            }
        }
        Ok(())
    }
}

struct ParallelHandle {
    worker: Arc<Worker>,
    workers: Arc<Mutex<Vec<Arc<Worker>>>>,
}

impl fmt::Debug for ParallelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelHandle")
            .field("cancelled", &self.worker.cancel.is_cancelled())
            .finish()
    }
}

#[async_trait]
impl ExecutorHandle for ParallelHandle {
    async fn leave(&self) {
        self.worker.cancel.cancel();
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|w| !Arc::ptr_eq(w, &self.worker));
        let task = self.worker.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(target: "event", ?err, "Actor worker did not shut down cleanly");
            }
        }
    }
}
