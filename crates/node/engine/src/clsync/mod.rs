//! Consensus-layer sync: buffers gossiped payloads until they fit on the unsafe head.

use async_trait::async_trait;
use std::sync::Arc;
use tiller_event::{Deriver, Emitter, Event};
use tiller_protocol::{ExecutionPayloadEnvelope, L2BlockRef, RollupConfig};
use tokio::sync::Mutex;

mod queue;
pub use queue::{DEFAULT_MAX_MEMORY, PayloadsQueue, QueueError, payload_mem_size};

/// What to do with the lowest buffered payload after a forkchoice update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    /// Drop it and look at the next one.
    Pop,
    /// Stop. Either nothing is buffered or the payload does not fit yet.
    Wait,
    /// Hand it to the engine controller.
    Process,
}

/// Buffers unsafe payloads received ahead of the tip and surfaces them at forkchoice
/// boundaries.
#[derive(Debug)]
pub struct CLSync {
    config: Arc<RollupConfig>,
    emitter: Arc<dyn Emitter>,
    queue: Mutex<PayloadsQueue>,
}

impl CLSync {
    /// Creates a buffer with the default memory budget.
    pub fn new(config: Arc<RollupConfig>, emitter: Arc<dyn Emitter>) -> Self {
        Self::with_max_memory(config, emitter, DEFAULT_MAX_MEMORY)
    }

    /// Creates a buffer holding at most `max_memory` bytes of payloads.
    pub fn with_max_memory(
        config: Arc<RollupConfig>,
        emitter: Arc<dyn Emitter>,
        max_memory: u64,
    ) -> Self {
        Self { config, emitter, queue: Mutex::new(PayloadsQueue::new(max_memory)) }
    }

    /// The lowest buffered block, or the zero reference when nothing is buffered.
    pub async fn lowest_queued_unsafe_block(&self) -> L2BlockRef {
        let queue = self.queue.lock().await;
        let Some(envelope) = queue.peek() else {
            return L2BlockRef::default();
        };
        L2BlockRef::from_payload(&envelope.execution_payload, &self.config.genesis)
            .unwrap_or_else(|err| {
                error!(
                    target: "clsync",
                    block = %envelope.execution_payload.id(),
                    %err,
                    "Failed to convert queued payload to a block reference"
                );
                L2BlockRef::default()
            })
    }

    /// Number of buffered payloads.
    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Returns `true` if nothing is buffered.
    pub async fn is_empty(&self) -> bool {
        self.queue.lock().await.is_empty()
    }

    async fn on_unsafe_payload(&self, envelope: &Arc<ExecutionPayloadEnvelope>) {
        let id = envelope.execution_payload.id();
        debug!(target: "clsync", block = %id, "Received unsafe payload");
        let mut queue = self.queue.lock().await;
        match queue.push(Arc::clone(envelope)) {
            Ok(evicted) => {
                for dropped in evicted {
                    info!(
                        target: "clsync",
                        block = %dropped,
                        "Dropping payload from payload queue because the payload queue is too large"
                    );
                    tiller_macros::inc!(
                        counter,
                        crate::Metrics::UNSAFE_PAYLOADS_DROPPED,
                        "reason" => "memory"
                    );
                }
            }
            Err(err) => {
                warn!(
                    target: "clsync",
                    block = %id,
                    timestamp = envelope.execution_payload.timestamp,
                    %err,
                    "Could not add unsafe payload"
                );
                return;
            }
        }

        tiller_macros::inc!(counter, crate::Metrics::UNSAFE_PAYLOADS_RECEIVED);
        tiller_macros::set!(gauge, crate::Metrics::CLSYNC_QUEUE_LENGTH, queue.len() as f64);
        tiller_macros::set!(gauge, crate::Metrics::CLSYNC_QUEUE_MEMORY, queue.mem_size() as f64);
        if let Some(next) = queue.peek() {
            trace!(
                target: "clsync",
                next = %next.execution_payload.id(),
                timestamp = next.execution_payload.timestamp,
                "Next unsafe payload to process"
            );
        }

        // Ask for the heads so the payload can be matched against them.
        self.emitter.emit(Event::ForkchoiceRequest).await;
    }

    async fn on_forkchoice_update(&self, unsafe_head: &L2BlockRef, safe_head: &L2BlockRef) {
        debug!(
            target: "clsync",
            unsafe_head = %unsafe_head.id(),
            safe_head = %safe_head.id(),
            "Received forkchoice update"
        );
        let mut queue = self.queue.lock().await;
        loop {
            let Some(first) = queue.peek() else { return };
            match next_action(first, unsafe_head, safe_head) {
                Next::Pop => {
                    queue.pop();
                }
                Next::Wait => return,
                Next::Process => break,
            }
        }
        tiller_macros::set!(gauge, crate::Metrics::CLSYNC_QUEUE_LENGTH, queue.len() as f64);
        tiller_macros::set!(gauge, crate::Metrics::CLSYNC_QUEUE_MEMORY, queue.mem_size() as f64);

        // The payload stays queued until a forkchoice update confirms it or it is reported
        // invalid, so a temporary failure is retried on the next update.
        if let Some(envelope) = queue.peek() {
            self.emitter.emit(Event::ProcessUnsafePayload { envelope: Arc::clone(envelope) }).await;
        }
    }

    async fn on_invalid_payload(&self, envelope: &Arc<ExecutionPayloadEnvelope>) {
        let block = &envelope.execution_payload;
        debug!(target: "clsync", block = %block.id(), "Received invalid payload report");
        let mut queue = self.queue.lock().await;
        if queue.peek().is_some_and(|first| first.block_hash() == block.block_hash) {
            warn!(target: "clsync", block = %block.id(), "Dropping invalid unsafe payload");
            queue.pop();
            tiller_macros::inc!(
                counter,
                crate::Metrics::UNSAFE_PAYLOADS_DROPPED,
                "reason" => "invalid"
            );
        }
    }
}

fn next_action(
    first: &ExecutionPayloadEnvelope,
    unsafe_head: &L2BlockRef,
    safe_head: &L2BlockRef,
) -> Next {
    let first = &first.execution_payload;
    if first.block_hash == unsafe_head.hash {
        debug!(target: "clsync", block = %first.id(), "Payload was processed, removing it from the queue");
        return Next::Pop;
    }
    if first.block_number <= safe_head.number {
        info!(
            target: "clsync",
            block = %first.id(),
            safe = %safe_head.id(),
            "Skipping unsafe payload, since it is older than safe head"
        );
        return Next::Pop;
    }
    if first.block_number <= unsafe_head.number {
        info!(
            target: "clsync",
            block = %first.id(),
            unsafe_head = %unsafe_head.id(),
            "Skipping unsafe payload, since it is older than unsafe head"
        );
        return Next::Pop;
    }
    if first.parent_hash != unsafe_head.hash {
        if first.block_number == unsafe_head.number + 1 {
            info!(
                target: "clsync",
                block = %first.id(),
                unsafe_head = %unsafe_head.id(),
                "Skipping unsafe payload, since it does not build onto the existing unsafe chain"
            );
            return Next::Pop;
        }
        return Next::Wait;
    }
    Next::Process
}

#[async_trait]
impl Deriver for CLSync {
    async fn on_event(&self, event: &Event) -> bool {
        match event {
            Event::ReceivedUnsafePayload { envelope } => self.on_unsafe_payload(envelope).await,
            Event::ForkchoiceUpdate { unsafe_head, safe_head, .. } => {
                self.on_forkchoice_update(unsafe_head, safe_head).await
            }
            Event::PayloadInvalid { envelope, .. } => self.on_invalid_payload(envelope).await,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;
    use tiller_event::test_utils::TestEmitter;
    use tiller_protocol::{
        ExecutionPayload,
        test_utils::{l1_ref, l2_ref, payload_for},
    };

    fn block(number: u64, hash: u8, parent: u8) -> L2BlockRef {
        L2BlockRef {
            hash: B256::repeat_byte(hash),
            number,
            parent_hash: B256::repeat_byte(parent),
            time: number * 2,
            ..l2_ref(number, number * 2, &l1_ref(0), number)
        }
    }

    fn envelope(block: &L2BlockRef) -> Arc<ExecutionPayloadEnvelope> {
        Arc::new(ExecutionPayloadEnvelope {
            execution_payload: payload_for(block),
            parent_beacon_block_root: None,
        })
    }

    fn forkchoice(unsafe_head: L2BlockRef, safe_head: L2BlockRef) -> Event {
        Event::ForkchoiceUpdate { unsafe_head, safe_head, finalized: safe_head }
    }

    fn setup() -> (CLSync, TestEmitter) {
        let emitter = TestEmitter::new();
        let clsync = CLSync::new(Arc::new(RollupConfig::default()), emitter.as_emitter());
        (clsync, emitter)
    }

    fn zero_block() -> L2BlockRef {
        block(0, 0xa0, 0x00)
    }

    #[tokio::test]
    async fn drops_payload_older_than_unsafe_head() {
        let (clsync, emitter) = setup();
        let a1 = block(1, 0xa1, 0xa0);

        assert!(clsync.on_event(&Event::ReceivedUnsafePayload { envelope: envelope(&a1) }).await);
        assert_eq!(emitter.names(), vec!["forkchoice-request"]);
        emitter.clear();

        let unsafe_head = block(2, 0xa2, 0xa1);
        assert!(clsync.on_event(&forkchoice(unsafe_head, zero_block())).await);
        assert!(emitter.is_empty());
        assert!(clsync.is_empty().await);
        assert!(clsync.lowest_queued_unsafe_block().await.is_zero());
    }

    #[tokio::test]
    async fn drops_payload_equal_to_tip() {
        let (clsync, emitter) = setup();
        let a1 = block(1, 0xa1, 0xa0);
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope: envelope(&a1) }).await;
        emitter.clear();

        clsync.on_event(&forkchoice(a1, zero_block())).await;
        assert!(emitter.is_empty());
        assert!(clsync.is_empty().await);
    }

    #[tokio::test]
    async fn submits_payload_that_fits() {
        let (clsync, emitter) = setup();
        let a1 = block(1, 0xa1, 0xa0);
        let env = envelope(&a1);
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope: Arc::clone(&env) }).await;
        emitter.clear();

        clsync.on_event(&forkchoice(zero_block(), zero_block())).await;
        let events = emitter.take();
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ProcessUnsafePayload { envelope } => assert!(Arc::ptr_eq(envelope, &env)),
            other => panic!("unexpected event {other}"),
        }
        // Still queued until confirmed.
        assert_eq!(clsync.lowest_queued_unsafe_block().await, a1);

        // A repeated update makes the same decision.
        clsync.on_event(&forkchoice(zero_block(), zero_block())).await;
        assert_eq!(emitter.names(), vec!["process-unsafe-payload"]);
        emitter.clear();

        clsync.on_event(&forkchoice(a1, zero_block())).await;
        assert!(emitter.is_empty());
        assert!(clsync.is_empty().await);
    }

    #[tokio::test]
    async fn drops_invalid_payload() {
        let (clsync, emitter) = setup();
        let a1 = block(1, 0xa1, 0xa0);
        let env = envelope(&a1);
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope: Arc::clone(&env) }).await;
        clsync.on_event(&forkchoice(zero_block(), zero_block())).await;
        emitter.clear();

        let err = tiller_event::EventError::msg("invalid");
        assert!(clsync.on_event(&Event::PayloadInvalid { envelope: env, err }).await);
        assert!(clsync.is_empty().await);
        assert!(emitter.is_empty());
    }

    #[tokio::test]
    async fn ignores_invalid_report_for_other_payload() {
        let (clsync, _emitter) = setup();
        clsync
            .on_event(&Event::ReceivedUnsafePayload { envelope: envelope(&block(1, 0xa1, 0xa0)) })
            .await;
        let other = envelope(&block(1, 0xb1, 0xa0));
        let err = tiller_event::EventError::msg("invalid");
        clsync.on_event(&Event::PayloadInvalid { envelope: other, err }).await;
        assert_eq!(clsync.len().await, 1);
    }

    #[tokio::test]
    async fn drops_sibling_and_waits_on_gap() {
        let (clsync, emitter) = setup();
        let sibling = block(1, 0xb1, 0xbb);
        let gap = block(3, 0xa3, 0xa2);
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope: envelope(&sibling) }).await;
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope: envelope(&gap) }).await;
        emitter.clear();

        clsync.on_event(&forkchoice(zero_block(), zero_block())).await;
        assert!(emitter.is_empty());
        assert_eq!(clsync.lowest_queued_unsafe_block().await, gap);
    }

    #[tokio::test]
    async fn rejects_duplicate_without_request() {
        let (clsync, emitter) = setup();
        let a1 = block(1, 0xa1, 0xa0);
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope: envelope(&a1) }).await;
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope: envelope(&a1) }).await;
        assert_eq!(emitter.names(), vec!["forkchoice-request"]);
        assert_eq!(clsync.len().await, 1);
    }

    #[tokio::test]
    async fn unconvertible_payload_maps_to_zero() {
        let (clsync, _emitter) = setup();
        let envelope = Arc::new(ExecutionPayloadEnvelope {
            execution_payload: ExecutionPayload {
                block_number: 7,
                block_hash: B256::repeat_byte(7),
                ..Default::default()
            },
            parent_beacon_block_root: None,
        });
        clsync.on_event(&Event::ReceivedUnsafePayload { envelope }).await;
        assert!(clsync.lowest_queued_unsafe_block().await.is_zero());
    }

    #[tokio::test]
    async fn ignores_unrelated_events() {
        let (clsync, _emitter) = setup();
        assert!(!clsync.on_event(&Event::TryUpdateEngine).await);
    }
}
