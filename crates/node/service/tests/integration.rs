//! End-to-end scenarios over the single-threaded executor.

use alloy_primitives::B256;
use async_trait::async_trait;
use rstest::*;
use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tiller_engine::{CLSync, test_utils::TestEngine};
use tiller_event::{Deriver, Emitter, Event, EventError, RegisterOpts, SyncExecutor, System};
use tiller_node_service::{
    ControlPlane, ControlPlaneBuilder, ExecutorKind, L2Heads, NodeConfig, ResetWalkError,
    ResetWalker,
};
use tiller_protocol::{
    ExecutionPayloadEnvelope, L1BlockRef, L1Fetcher, L2BlockRef, RollupConfig,
    test_utils::{TestL1Fetcher, l1_ref, l2_ref, payload_for},
};
use tiller_sequencer::{
    SEALING_DURATION,
    test_utils::{ManualClock, TestGossiper},
};

/// Records every event it sees.
#[derive(Debug, Default)]
struct Recorder {
    seen: Mutex<Vec<Event>>,
}

impl Recorder {
    fn names(&self) -> Vec<&'static str> {
        self.seen.lock().unwrap().iter().map(Event::name).collect()
    }

    fn events(&self) -> Vec<Event> {
        self.seen.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

#[async_trait]
impl Deriver for Recorder {
    async fn on_event(&self, event: &Event) -> bool {
        self.seen.lock().unwrap().push(event.clone());
        true
    }
}

#[derive(Debug)]
struct FixedWalker(L2Heads);

#[async_trait]
impl ResetWalker for FixedWalker {
    async fn find_l2_heads(&self) -> Result<L2Heads, ResetWalkError> {
        Ok(self.0)
    }
}

struct ClSyncHarness {
    executor: Arc<SyncExecutor>,
    producer: Arc<dyn Emitter>,
    clsync: Arc<CLSync>,
    recorder: Arc<Recorder>,
    _system: System,
}

impl ClSyncHarness {
    async fn emit(&self, event: Event) {
        self.producer.emit(event).await;
        self.executor.drain().await;
    }
}

#[fixture]
fn clsync() -> ClSyncHarness {
    let executor = Arc::new(SyncExecutor::new());
    let system = System::new(Arc::clone(&executor) as _);
    let clsync = system
        .register_with("clsync", RegisterOpts::default(), |emitter| {
            CLSync::new(Arc::new(RollupConfig::default()), emitter)
        })
        .unwrap();
    let recorder = Arc::new(Recorder::default());
    system
        .register("recorder", Some(Arc::clone(&recorder) as Arc<dyn Deriver>), Default::default())
        .unwrap();
    let producer = system.register("test", None, RegisterOpts::default()).unwrap();
    ClSyncHarness { executor, producer, clsync, recorder, _system: system }
}

fn block(number: u64, hash: u8, parent: u8) -> L2BlockRef {
    L2BlockRef {
        hash: B256::repeat_byte(hash),
        parent_hash: B256::repeat_byte(parent),
        ..l2_ref(number, number * 2, &l1_ref(0), number)
    }
}

fn envelope(block: &L2BlockRef) -> Arc<ExecutionPayloadEnvelope> {
    Arc::new(ExecutionPayloadEnvelope {
        execution_payload: payload_for(block),
        parent_beacon_block_root: None,
    })
}

fn forkchoice(unsafe_head: L2BlockRef) -> Event {
    let zero = block(0, 0xa0, 0x00);
    Event::ForkchoiceUpdate { unsafe_head, safe_head: zero, finalized: zero }
}

#[rstest]
#[tokio::test]
async fn clsync_drops_payload_older_than_unsafe_head(clsync: ClSyncHarness) {
    let a1 = block(1, 0xa1, 0xa0);
    clsync.emit(Event::ReceivedUnsafePayload { envelope: envelope(&a1) }).await;
    assert_eq!(clsync.recorder.names(), vec!["received-unsafe-payload", "forkchoice-request"]);
    clsync.recorder.clear();

    clsync.emit(forkchoice(block(2, 0xa2, 0xa1))).await;
    assert_eq!(clsync.recorder.names(), vec!["forkchoice-update"]);
    assert!(clsync.clsync.is_empty().await);
}

#[rstest]
#[tokio::test]
async fn clsync_drops_payload_equal_to_tip(clsync: ClSyncHarness) {
    let a1 = block(1, 0xa1, 0xa0);
    clsync.emit(Event::ReceivedUnsafePayload { envelope: envelope(&a1) }).await;
    clsync.recorder.clear();

    clsync.emit(forkchoice(a1)).await;
    assert!(!clsync.recorder.names().contains(&"process-unsafe-payload"));
    assert!(clsync.clsync.is_empty().await);
}

#[rstest]
#[tokio::test]
async fn clsync_applies_payload_that_fits(clsync: ClSyncHarness) {
    let a1 = block(1, 0xa1, 0xa0);
    let env = envelope(&a1);
    clsync.emit(Event::ReceivedUnsafePayload { envelope: Arc::clone(&env) }).await;
    clsync.recorder.clear();

    clsync.emit(forkchoice(block(0, 0xa0, 0x00))).await;
    let events = clsync.recorder.events();
    assert_eq!(events.len(), 2);
    match &events[1] {
        Event::ProcessUnsafePayload { envelope } => assert!(Arc::ptr_eq(envelope, &env)),
        other => panic!("unexpected event {other}"),
    }

    clsync.emit(forkchoice(a1)).await;
    assert!(clsync.clsync.is_empty().await);
}

#[rstest]
#[tokio::test]
async fn clsync_drops_invalid_payload(clsync: ClSyncHarness) {
    let a1 = block(1, 0xa1, 0xa0);
    let env = envelope(&a1);
    clsync.emit(Event::ReceivedUnsafePayload { envelope: Arc::clone(&env) }).await;
    clsync.emit(forkchoice(block(0, 0xa0, 0x00))).await;
    assert!(!clsync.clsync.is_empty().await);

    clsync.emit(Event::PayloadInvalid { envelope: env, err: EventError::msg("bad block") }).await;
    assert!(clsync.clsync.is_empty().await);
}

/// L2 time of the head the control plane scenarios start from.
const HEAD_TIME: u64 = 12_004;

struct PlaneHarness {
    plane: ControlPlane<Arc<TestEngine>, TestL1Fetcher>,
    engine: Arc<TestEngine>,
    gossiper: Arc<TestGossiper>,
    clock: ManualClock,
    recorder: Arc<Recorder>,
}

impl PlaneHarness {
    fn new(heads: L2Heads, sequencer: bool) -> Self {
        let mut config = NodeConfig { executor: ExecutorKind::Sync, ..Default::default() };
        config.rollup.block_time = 2;
        config.rollup.max_sequencer_drift = 600;
        config.sequencer.enabled = sequencer;

        let engine = Arc::new(TestEngine::new());
        for head in [heads.unsafe_head, heads.safe_head, heads.finalized] {
            engine.insert_block(&head);
        }
        let gossiper = Arc::new(TestGossiper::default());
        let clock = ManualClock::at(HEAD_TIME + 1);

        let plane = ControlPlaneBuilder::new(
            config,
            Arc::clone(&engine),
            TestL1Fetcher::with_chain(1010),
        )
        .with_reset_walker(Arc::new(FixedWalker(heads)))
        .with_gossiper(Arc::clone(&gossiper) as _)
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();

        let recorder = Arc::new(Recorder::default());
        plane
            .system()
            .register(
                "recorder",
                Some(Arc::clone(&recorder) as Arc<dyn Deriver>),
                RegisterOpts::default(),
            )
            .unwrap();
        Self { plane, engine, gossiper, clock, recorder }
    }

    async fn drain(&self) {
        self.plane.sync_executor().unwrap().drain().await;
    }

    async fn emit(&self, event: Event) {
        self.plane.emit(event).await;
        self.drain().await;
    }
}

fn head() -> L2BlockRef {
    l2_ref(100, HEAD_TIME, &l1_ref(1000), 0)
}

fn at_head(head: L2BlockRef) -> L2Heads {
    L2Heads { unsafe_head: head, safe_head: head, finalized: head }
}

fn at(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[tokio::test]
async fn sequencer_builds_and_publishes_block() {
    tiller_cli::init_test_tracing();
    let head = head();
    let h = PlaneHarness::new(at_head(head), true);
    h.plane.init().await.unwrap();
    h.drain().await;
    assert_eq!(h.plane.sync_status().unsafe_l2, head);
    assert!(h.plane.admin().active());

    h.emit(Event::SequencerAction).await;
    let names = h.recorder.names();
    assert!(names.contains(&"build-start"));
    assert!(names.contains(&"build-started"));
    let seal_at = h.plane.admin().next_action().await.unwrap();
    assert_eq!(seal_at, at(HEAD_TIME + 2) - SEALING_DURATION);

    h.clock.set(seal_at);
    h.recorder.clear();
    h.emit(Event::SequencerAction).await;
    let names = h.recorder.names();
    for expected in ["build-seal", "build-sealed", "payload-process", "payload-success"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }

    let unsafe_head = h.plane.sync_status().unsafe_l2;
    assert_eq!(unsafe_head.number, 101);
    assert_eq!(unsafe_head.parent_hash, head.hash);
    assert_eq!(unsafe_head.l1_origin, l1_ref(1000).id());
    assert_eq!(unsafe_head.sequence_number, 1);
    assert_eq!(h.gossiper.gossiped().len(), 1);
    assert_eq!(h.engine.new_payload_calls().len(), 1);

    // The next block starts one block time before its payload time.
    assert_eq!(h.plane.admin().next_action().await, Some(at(HEAD_TIME + 2)));
}

#[tokio::test]
async fn finalizer_promotes_safe_block() {
    let heads = L2Heads {
        unsafe_head: l2_ref(25, 1_050, &l1_ref(1001), 0),
        safe_head: l2_ref(20, 1_040, &l1_ref(1001), 0),
        finalized: l2_ref(5, 1_010, &l1_ref(999), 0),
    };
    let h = PlaneHarness::new(heads, false);
    h.plane.init().await.unwrap();
    h.drain().await;
    assert_eq!(h.plane.sync_status().finalized_l2.number, 5);

    h.emit(Event::SafeDerived {
        safe_head: l2_ref(10, 1_020, &l1_ref(1000), 0),
        derived_from: l1_ref(1000),
    })
    .await;
    h.emit(Event::SafeDerived { safe_head: heads.safe_head, derived_from: l1_ref(1001) }).await;
    h.recorder.clear();

    h.plane.on_l1_finalized(l1_ref(1001)).await;
    h.drain().await;
    let promoted: Vec<_> = h
        .recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            Event::PromoteFinalized { block } => Some(block),
            _ => None,
        })
        .collect();
    assert_eq!(promoted, vec![heads.safe_head]);
    assert_eq!(h.plane.sync_status().finalized_l2, heads.safe_head);
    assert_eq!(h.plane.sync_status().finalized_l1, l1_ref(1001));
}

#[tokio::test]
async fn l1_tracker_follows_reorg() {
    let head = head();
    let h = PlaneHarness::new(at_head(head), false);
    for number in 100..=102 {
        h.plane.on_l1_unsafe(l1_ref(number)).await;
    }
    h.drain().await;

    let fork = L1BlockRef { hash: B256::repeat_byte(0xf1), ..l1_ref(101) };
    h.plane.on_l1_unsafe(fork).await;
    h.drain().await;

    let l1 = h.plane.l1_fetcher();
    assert_eq!(l1.l1_block_ref_by_number(101).await, Ok(fork));
    assert_eq!(l1.cached(102), None);
    assert_eq!(l1.l1_block_ref_by_number(102).await, Ok(l1_ref(102)));
    assert_eq!(l1.cached(100), Some(l1_ref(100)));
    assert_eq!(h.plane.status().last_l1_reorg_depth(), Some(1));
    assert_eq!(h.plane.sync_status().head_l1, fork);
}

#[tokio::test]
async fn gossiped_payload_extends_unsafe_chain() {
    let head = head();
    let h = PlaneHarness::new(at_head(head), false);
    h.plane.init().await.unwrap();
    h.drain().await;

    let next = l2_ref(101, HEAD_TIME + 2, &l1_ref(1000), 1);
    h.plane
        .on_unsafe_payload(ExecutionPayloadEnvelope {
            execution_payload: payload_for(&next),
            parent_beacon_block_root: None,
        })
        .await;
    h.drain().await;

    assert_eq!(h.plane.sync_status().unsafe_l2, next);
    assert_eq!(h.plane.sync_status().safe_l2, head);
    assert!(h.plane.clsync().is_empty().await);
    assert_eq!(h.engine.new_payload_calls().len(), 1);
}

#[tokio::test]
async fn shutdown_unregisters_actors() {
    let head = head();
    let h = PlaneHarness::new(at_head(head), true);
    h.plane.start().await.unwrap();
    h.plane.shutdown().await;

    assert!(h.plane.system().actors().is_empty());
    assert!(h.gossiper.stopped());
    assert!(h.plane.wait_for_shutdown().await.is_none());
}
