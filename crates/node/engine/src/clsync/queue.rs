//! A memory-bounded min-heap of unsafe payloads.

use alloy_primitives::B256;
use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashSet},
    sync::Arc,
};
use tiller_protocol::{BlockId, ExecutionPayloadEnvelope};

/// Default memory budget of the queue: 500 MiB.
pub const DEFAULT_MAX_MEMORY: u64 = 500 * 1024 * 1024;

/// Fixed cost of a buffered payload.
const PAYLOAD_FIXED_COST: u64 = 800;

/// Per-transaction overhead of a buffered payload.
const TX_OVERHEAD: u64 = 24;

/// Approximate memory cost of a payload.
pub fn payload_mem_size(envelope: &ExecutionPayloadEnvelope) -> u64 {
    envelope.execution_payload.transactions.iter().fold(PAYLOAD_FIXED_COST, |acc, tx| {
        acc + TX_OVERHEAD + tx.len() as u64
    })
}

/// A payload could not be queued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// A payload with the same block hash is already queued.
    #[error("cannot add duplicate payload {0}")]
    Duplicate(BlockId),
    /// The payload alone exceeds the memory budget.
    #[error("payload {id} of {size} bytes is larger than the queue budget of {max} bytes")]
    TooLarge {
        /// The payload.
        id: BlockId,
        /// Its memory cost.
        size: u64,
        /// The queue budget.
        max: u64,
    },
}

#[derive(Debug)]
struct Queued {
    number: u64,
    hash: B256,
    size: u64,
    envelope: Arc<ExecutionPayloadEnvelope>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number).then_with(|| self.hash.cmp(&other.hash))
    }
}

/// Unsafe payloads ordered by ascending block number.
///
/// Block hashes are unique within the queue and the total memory cost never exceeds
/// [`PayloadsQueue::max_size`]. On overflow the lowest payloads are evicted first.
#[derive(Debug)]
pub struct PayloadsQueue {
    heap: BinaryHeap<Reverse<Queued>>,
    hashes: HashSet<B256>,
    mem_size: u64,
    max_size: u64,
}

impl Default for PayloadsQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY)
    }
}

impl PayloadsQueue {
    /// Creates an empty queue with a memory budget of `max_size` bytes.
    pub fn new(max_size: u64) -> Self {
        Self { heap: BinaryHeap::new(), hashes: HashSet::new(), mem_size: 0, max_size }
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Memory cost of the queued payloads.
    pub const fn mem_size(&self) -> u64 {
        self.mem_size
    }

    /// The memory budget.
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Queues `envelope`, evicting the lowest payloads while over budget.
    ///
    /// Returns the ids of evicted payloads.
    pub fn push(
        &mut self,
        envelope: Arc<ExecutionPayloadEnvelope>,
    ) -> Result<Vec<BlockId>, QueueError> {
        let id = envelope.execution_payload.id();
        if self.hashes.contains(&id.hash) {
            return Err(QueueError::Duplicate(id));
        }
        let size = payload_mem_size(&envelope);
        if size > self.max_size {
            return Err(QueueError::TooLarge { id, size, max: self.max_size });
        }

        self.heap.push(Reverse(Queued { number: id.number, hash: id.hash, size, envelope }));
        self.hashes.insert(id.hash);
        self.mem_size += size;

        let mut evicted = Vec::new();
        while self.mem_size > self.max_size {
            match self.pop() {
                Some(dropped) => evicted.push(dropped.execution_payload.id()),
                None => break,
            }
        }
        Ok(evicted)
    }

    /// The payload with the lowest block number.
    pub fn peek(&self) -> Option<&Arc<ExecutionPayloadEnvelope>> {
        self.heap.peek().map(|Reverse(queued)| &queued.envelope)
    }

    /// Removes and returns the payload with the lowest block number.
    pub fn pop(&mut self) -> Option<Arc<ExecutionPayloadEnvelope>> {
        let Reverse(queued) = self.heap.pop()?;
        self.hashes.remove(&queued.hash);
        self.mem_size -= queued.size;
        Some(queued.envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use tiller_protocol::{
        ExecutionPayload,
        test_utils::{l1_ref, l2_ref, payload_for},
    };

    fn envelope(number: u64) -> Arc<ExecutionPayloadEnvelope> {
        let block = l2_ref(number, number * 2, &l1_ref(0), number);
        Arc::new(ExecutionPayloadEnvelope {
            execution_payload: payload_for(&block),
            parent_beacon_block_root: None,
        })
    }

    #[test]
    fn mem_size_counts_transactions() {
        let envelope = ExecutionPayloadEnvelope {
            execution_payload: ExecutionPayload {
                transactions: vec![Bytes::from_static(&[1, 2, 3]), Bytes::from_static(&[4])],
                ..Default::default()
            },
            parent_beacon_block_root: None,
        };
        assert_eq!(payload_mem_size(&envelope), 800 + 2 * 24 + 4);
        assert_eq!(payload_mem_size(&ExecutionPayloadEnvelope::default()), 800);
    }

    #[test]
    fn pops_in_block_order() {
        let mut queue = PayloadsQueue::default();
        for n in [5, 2, 9, 3] {
            queue.push(envelope(n)).unwrap();
        }
        assert_eq!(queue.len(), 4);
        let order: Vec<_> =
            std::iter::from_fn(|| queue.pop()).map(|e| e.block_number()).collect();
        assert_eq!(order, vec![2, 3, 5, 9]);
        assert_eq!(queue.mem_size(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn rejects_duplicates() {
        let mut queue = PayloadsQueue::default();
        queue.push(envelope(1)).unwrap();
        let err = queue.push(envelope(1)).unwrap_err();
        assert!(matches!(err, QueueError::Duplicate(id) if id.number == 1));
        assert_eq!(queue.len(), 1);

        // Accepted again once popped.
        queue.pop();
        assert!(queue.push(envelope(1)).is_ok());
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut queue = PayloadsQueue::new(100);
        assert!(matches!(queue.push(envelope(1)), Err(QueueError::TooLarge { max: 100, .. })));
        assert!(queue.is_empty());
    }

    #[test]
    fn evicts_lowest_when_over_budget() {
        let size = payload_mem_size(&envelope(1));
        let mut queue = PayloadsQueue::new(size * 2);
        queue.push(envelope(4)).unwrap();
        queue.push(envelope(2)).unwrap();

        let evicted = queue.push(envelope(3)).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].number, 2);
        assert_eq!(queue.len(), 2);
        assert!(queue.mem_size() <= queue.max_size());
        assert_eq!(queue.peek().map(|e| e.block_number()), Some(3));

        // The evicted hash can be queued again.
        assert!(queue.push(envelope(2)).is_ok());
    }
}
