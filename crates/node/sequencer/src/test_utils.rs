//! Test doubles for the sequencer's collaborators.

use crate::{
    AsyncGossiper, Clock, ConductorError, ListenerError, SequencerConductor,
    SequencerStateListener,
};
use async_trait::async_trait;
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tiller_protocol::ExecutionPayloadEnvelope;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`Clock`] that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
}

impl ManualClock {
    /// Creates a clock showing `unix_secs` seconds after the epoch.
    pub fn at(unix_secs: u64) -> Self {
        Self { now: Arc::new(Mutex::new(UNIX_EPOCH + Duration::from_secs(unix_secs))) }
    }

    /// Sets the time.
    pub fn set(&self, now: SystemTime) {
        *lock(&self.now) = now;
    }

    /// Moves the time forward.
    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *lock(&self.now)
    }
}

/// An [`AsyncGossiper`] that records instead of publishing.
#[derive(Debug, Default)]
pub struct TestGossiper {
    current: Mutex<Option<Arc<ExecutionPayloadEnvelope>>>,
    gossiped: Mutex<Vec<Arc<ExecutionPayloadEnvelope>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl TestGossiper {
    /// Every payload gossiped so far.
    pub fn gossiped(&self) -> Vec<Arc<ExecutionPayloadEnvelope>> {
        lock(&self.gossiped).clone()
    }

    /// Returns `true` once started.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Returns `true` once stopped.
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl AsyncGossiper for TestGossiper {
    fn gossip(&self, envelope: Arc<ExecutionPayloadEnvelope>) {
        lock(&self.gossiped).push(Arc::clone(&envelope));
        *lock(&self.current) = Some(envelope);
    }

    fn get(&self) -> Option<Arc<ExecutionPayloadEnvelope>> {
        lock(&self.current).clone()
    }

    fn clear(&self) {
        lock(&self.current).take();
    }

    fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// A [`SequencerConductor`] with switchable leadership that records commits.
#[derive(Debug)]
pub struct TestConductor {
    leader: AtomicBool,
    fail_commits: AtomicBool,
    committed: Mutex<Vec<ExecutionPayloadEnvelope>>,
    overridden: AtomicBool,
    closed: AtomicBool,
}

impl Default for TestConductor {
    fn default() -> Self {
        Self {
            leader: AtomicBool::new(true),
            fail_commits: AtomicBool::new(false),
            committed: Mutex::default(),
            overridden: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
}

impl TestConductor {
    /// Sets whether this node leads.
    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }

    /// Makes commits fail.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Every payload committed so far.
    pub fn committed(&self) -> Vec<ExecutionPayloadEnvelope> {
        lock(&self.committed).clone()
    }

    /// Returns `true` once the leader was overridden.
    pub fn overridden(&self) -> bool {
        self.overridden.load(Ordering::SeqCst)
    }

    /// Returns `true` once closed.
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SequencerConductor for TestConductor {
    fn enabled(&self) -> bool {
        true
    }

    async fn leader(&self) -> Result<bool, ConductorError> {
        Ok(self.leader.load(Ordering::SeqCst))
    }

    async fn commit_unsafe_payload(
        &self,
        envelope: &ExecutionPayloadEnvelope,
    ) -> Result<(), ConductorError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(ConductorError::Closed);
        }
        lock(&self.committed).push(envelope.clone());
        Ok(())
    }

    async fn override_leader(&self) -> Result<(), ConductorError> {
        self.overridden.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A [`SequencerStateListener`] that remembers the last notification.
#[derive(Debug, Default)]
pub struct RecordingListener {
    active: Mutex<Option<bool>>,
}

impl RecordingListener {
    /// `Some(true)` after a start, `Some(false)` after a stop, `None` before either.
    pub fn active(&self) -> Option<bool> {
        *lock(&self.active)
    }
}

impl SequencerStateListener for RecordingListener {
    fn sequencer_started(&self) -> Result<(), ListenerError> {
        *lock(&self.active) = Some(true);
        Ok(())
    }

    fn sequencer_stopped(&self) -> Result<(), ListenerError> {
        *lock(&self.active) = Some(false);
        Ok(())
    }
}
