//! Publication of sealed payloads, decoupled from the sequencer.

use async_trait::async_trait;
use std::{
    fmt::Debug,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tiller_protocol::ExecutionPayloadEnvelope;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Hands sealed payloads to the network while the sequencer inserts them locally.
///
/// The last gossiped payload stays retrievable until cleared, so a sequencer that failed to
/// insert it can retry without building the block again.
pub trait AsyncGossiper: Send + Sync + Debug {
    /// Publishes `envelope` in the background and keeps it until [`AsyncGossiper::clear`].
    fn gossip(&self, envelope: Arc<ExecutionPayloadEnvelope>);

    /// The payload gossiped last, unless cleared.
    fn get(&self) -> Option<Arc<ExecutionPayloadEnvelope>>;

    /// Forgets the stored payload.
    fn clear(&self);

    /// Starts the background publisher.
    fn start(&self);

    /// Stops the background publisher.
    fn stop(&self);
}

/// A payload could not be published.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to publish payload: {0}")]
pub struct PublishError(pub String);

/// The network side of the [`SimpleAsyncGossiper`].
#[async_trait]
pub trait PayloadPublisher: Send + Sync + Debug {
    /// Signs and broadcasts `envelope`.
    async fn publish_payload(
        &self,
        envelope: Arc<ExecutionPayloadEnvelope>,
    ) -> Result<(), PublishError>;
}

/// An [`AsyncGossiper`] publishing from a tokio task.
///
/// Payloads gossiped before [`AsyncGossiper::start`] are published once the task runs.
#[derive(Debug)]
pub struct SimpleAsyncGossiper<P> {
    publisher: Arc<P>,
    current: Mutex<Option<Arc<ExecutionPayloadEnvelope>>>,
    tx: mpsc::UnboundedSender<Arc<ExecutionPayloadEnvelope>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<ExecutionPayloadEnvelope>>>>,
    cancel: CancellationToken,
}

impl<P: PayloadPublisher + 'static> SimpleAsyncGossiper<P> {
    /// Creates a gossiper publishing through `publisher`.
    pub fn new(publisher: Arc<P>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            publisher,
            current: Mutex::new(None),
            tx,
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<Arc<ExecutionPayloadEnvelope>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(
        publisher: Arc<P>,
        mut rx: mpsc::UnboundedReceiver<Arc<ExecutionPayloadEnvelope>>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(target: "sequencer", "Async gossiper stopped");
                    return;
                }
                Some(envelope) = rx.recv() => {
                    let block = envelope.execution_payload.id();
                    match publisher.publish_payload(envelope).await {
                        Ok(()) => debug!(target: "sequencer", %block, "Published payload"),
                        Err(err) => warn!(target: "sequencer", %block, %err, "Failed to publish payload"),
                    }
                }
                else => return,
            }
        }
    }
}

impl<P: PayloadPublisher + 'static> AsyncGossiper for SimpleAsyncGossiper<P> {
    fn gossip(&self, envelope: Arc<ExecutionPayloadEnvelope>) {
        *self.current() = Some(Arc::clone(&envelope));
        if self.tx.send(envelope).is_err() {
            warn!(target: "sequencer", "Async gossiper is gone, payload not published");
        }
    }

    fn get(&self) -> Option<Arc<ExecutionPayloadEnvelope>> {
        self.current().clone()
    }

    fn clear(&self) {
        self.current().take();
    }

    fn start(&self) {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(rx) = rx else {
            warn!(target: "sequencer", "Async gossiper already started");
            return;
        };
        tokio::spawn(Self::run(Arc::clone(&self.publisher), rx, self.cancel.clone()));
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tiller_protocol::test_utils::{l1_ref, l2_ref, payload_for};

    #[derive(Debug, Default)]
    struct Recorder {
        published: Mutex<Vec<u64>>,
        notify: tokio::sync::Notify,
    }

    #[async_trait]
    impl PayloadPublisher for Recorder {
        async fn publish_payload(
            &self,
            envelope: Arc<ExecutionPayloadEnvelope>,
        ) -> Result<(), PublishError> {
            self.published.lock().unwrap().push(envelope.block_number());
            self.notify.notify_one();
            Ok(())
        }
    }

    fn envelope(number: u64) -> Arc<ExecutionPayloadEnvelope> {
        Arc::new(ExecutionPayloadEnvelope {
            execution_payload: payload_for(&l2_ref(number, number * 2, &l1_ref(0), number)),
            parent_beacon_block_root: None,
        })
    }

    #[tokio::test]
    async fn keeps_payload_until_cleared() {
        let publisher = Arc::new(Recorder::default());
        let gossiper = SimpleAsyncGossiper::new(Arc::clone(&publisher));
        assert!(gossiper.get().is_none());

        gossiper.gossip(envelope(3));
        assert_eq!(gossiper.get().map(|e| e.block_number()), Some(3));
        gossiper.clear();
        assert!(gossiper.get().is_none());
    }

    #[tokio::test]
    async fn publishes_after_start() {
        let publisher = Arc::new(Recorder::default());
        let gossiper = SimpleAsyncGossiper::new(Arc::clone(&publisher));
        gossiper.gossip(envelope(1));
        gossiper.start();
        gossiper.gossip(envelope(2));

        tokio::time::timeout(Duration::from_secs(5), async {
            while publisher.published.lock().unwrap().len() < 2 {
                publisher.notify.notified().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*publisher.published.lock().unwrap(), vec![1, 2]);
        gossiper.stop();
    }
}
