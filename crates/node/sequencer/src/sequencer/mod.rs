//! The sequencer actor.

use crate::{
    AsyncGossiper, AttributesBuilder, Clock, L1OriginSelector, ListenerError, NoopConductor,
    NoopStateListener, SequencerConductor, SequencerError, SequencerStateListener, SystemClock,
};
use alloy_primitives::B256;
use async_trait::async_trait;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tiller_event::{Deriver, Emitter, Event};
use tiller_protocol::{ChainSpec, L1Fetcher, L2BlockRef, RollupConfig};
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio_util::sync::CancellationToken;

mod handlers;

mod state;
use state::SequencerState;


/// Time reserved before the payload timestamp to seal a block.
pub const SEALING_DURATION: Duration = Duration::from_millis(50);

/// Back-off after a temporary engine failure.
pub const ENGINE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Back-off while the execution engine syncs.
pub const ENGINE_SYNCING_BACKOFF: Duration = Duration::from_secs(30);

/// Decides when to build and seal blocks on top of the unsafe head.
///
/// The sequencer never calls the engine. It emits [`Event::BuildStart`] and
/// [`Event::BuildSeal`] and follows the engine controller's answers. Whoever drives it reads
/// [`Sequencer::next_action`] (or watches [`Sequencer::subscribe_schedule`]) and emits
/// [`Event::SequencerAction`] once the planned time is reached.
pub struct Sequencer<F, B> {
    config: Arc<RollupConfig>,
    spec: ChainSpec,
    origin_selector: Arc<L1OriginSelector<F>>,
    attributes_builder: B,
    conductor: Arc<dyn SequencerConductor>,
    gossiper: Arc<dyn AsyncGossiper>,
    listener: Arc<dyn SequencerStateListener>,
    clock: Arc<dyn Clock>,
    emitter: Arc<dyn Emitter>,
    active: AtomicBool,
    max_safe_lag: AtomicU64,
    state: Mutex<SequencerState>,
    schedule: watch::Sender<Option<SystemTime>>,
    latest_head: watch::Sender<L2BlockRef>,
    cancel: CancellationToken,
}

impl<F, B: fmt::Debug> fmt::Debug for Sequencer<F, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("attributes_builder", &self.attributes_builder)
            .field("conductor", &self.conductor)
            .field("active", &self.active)
            .field("max_safe_lag", &self.max_safe_lag)
            .finish_non_exhaustive()
    }
}

impl<F: L1Fetcher, B: AttributesBuilder> Sequencer<F, B> {
    /// Creates an inactive sequencer without a conductor.
    pub fn new(
        config: Arc<RollupConfig>,
        origin_selector: Arc<L1OriginSelector<F>>,
        attributes_builder: B,
        gossiper: Arc<dyn AsyncGossiper>,
        emitter: Arc<dyn Emitter>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let state = SequencerState::new(clock.now());
        let (schedule, _) = watch::channel(None);
        let (latest_head, _) = watch::channel(L2BlockRef::default());
        Self {
            spec: ChainSpec::new((*config).clone()),
            config,
            origin_selector,
            attributes_builder,
            conductor: Arc::new(NoopConductor),
            gossiper,
            listener: Arc::new(NoopStateListener),
            clock,
            emitter,
            active: AtomicBool::new(false),
            max_safe_lag: AtomicU64::new(0),
            state: Mutex::new(state),
            schedule,
            latest_head,
            cancel: CancellationToken::new(),
        }
    }

    /// Gates sequencing on `conductor`.
    pub fn with_conductor(mut self, conductor: Arc<dyn SequencerConductor>) -> Self {
        self.conductor = conductor;
        self
    }

    /// Reports start and stop to `listener`.
    pub fn with_listener(mut self, listener: Arc<dyn SequencerStateListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Reads time from `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Pauses sequencing while the unsafe head leads the safe head by `max_safe_lag` blocks.
    /// Zero disables the check.
    pub fn with_max_safe_lag(self, max_safe_lag: u64) -> Self {
        self.max_safe_lag.store(max_safe_lag, Ordering::SeqCst);
        self
    }

    /// Returns `true` while the sequencer produces blocks.
    pub fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// When the next [`Event::SequencerAction`] is due, or `None` if no action is planned.
    pub async fn next_action(&self) -> Option<SystemTime> {
        self.state.lock().await.schedule()
    }

    /// Subscribes to changes of [`Sequencer::next_action`].
    pub fn subscribe_schedule(&self) -> watch::Receiver<Option<SystemTime>> {
        self.schedule.subscribe()
    }

    /// Returns `true` if an external conductor gates sequencing.
    pub fn conductor_enabled(&self) -> bool {
        self.conductor.enabled()
    }

    /// The configured safe-lag limit.
    pub fn max_safe_lag(&self) -> u64 {
        self.max_safe_lag.load(Ordering::SeqCst)
    }

    /// Sets the safe-lag limit. Zero disables the check.
    pub fn set_max_safe_lag(&self, max_safe_lag: u64) {
        self.max_safe_lag.store(max_safe_lag, Ordering::SeqCst);
        info!(target: "sequencer", max_safe_lag, "Updated max safe lag");
    }

    /// Makes this node the leader regardless of the conductor.
    pub async fn override_leader(&self) -> Result<(), SequencerError> {
        self.conductor.override_leader().await.map_err(SequencerError::Conductor)
    }

    /// Prepares the sequencer after startup.
    ///
    /// Starts the gossiper and asks for the current heads. An `active` sequencer starts right
    /// away, skipping the leadership and pre-state checks of [`Sequencer::start`].
    pub async fn init(&self, active: bool) -> Result<(), SequencerError> {
        let mut state = self.state.lock().await;
        self.gossiper.start();
        self.emitter.emit(Event::ForkchoiceRequest).await;

        let result = if active {
            self.force_start(&mut state)
        } else {
            self.listener.sequencer_stopped().map_err(|ListenerError(msg)| {
                SequencerError::Listener(ListenerError(format!("initial stopped state: {msg}")))
            })
        };
        self.publish_schedule(&state);
        result
    }

    /// Starts sequencing on top of `head`, which must be the current unsafe head.
    pub async fn start(&self, head: B256) -> Result<(), SequencerError> {
        // Ask the conductor before locking so a slow conductor does not stall event handling.
        if !self.conductor.leader().await.map_err(SequencerError::Conductor)? {
            return Err(SequencerError::NotLeader);
        }

        let mut state = self.state.lock().await;
        if self.active() {
            return Err(SequencerError::AlreadyStarted);
        }
        if state.latest_head.is_zero() {
            return Err(SequencerError::NoPrestate(head));
        }
        if state.latest_head.hash != head {
            return Err(SequencerError::HeadMismatch {
                head: state.latest_head.id(),
                received: head,
            });
        }
        let result = self.force_start(&mut state);
        self.publish_schedule(&state);
        result
    }

    fn force_start(&self, state: &mut SequencerState) -> Result<(), SequencerError> {
        if state.latest_head.is_zero() {
            info!(target: "sequencer", "Starting sequencing, without known pre-state");
            self.gossiper.clear();
        } else {
            info!(
                target: "sequencer",
                head = %state.latest_head.id(),
                "Starting sequencing on top of known pre-state"
            );
            if let Some(buffered) = self.gossiper.get() &&
                buffered.block_hash() != state.latest_head.hash
            {
                warn!(
                    target: "sequencer",
                    buffered = %buffered.execution_payload.id(),
                    prestate = %state.latest_head.id(),
                    "Cleared old block from async-gossip buffer, sequencing pre-state is different"
                );
                self.gossiper.clear();
            }
        }

        self.listener.sequencer_started()?;
        state.latest = Default::default();
        state.next_action_ok = true;
        state.next_action = self.clock.now();
        self.active.store(true, Ordering::SeqCst);
        tiller_macros::set!(gauge, crate::Metrics::SEQUENCER_ACTIVE, 1.0);
        info!(target: "sequencer", "Sequencer has been started");
        Ok(())
    }

    /// Stops sequencing and returns the hash of the unsafe head.
    ///
    /// Waits until the block sealed last became the unsafe head, so no sealed block is left
    /// behind. Dropping the returned future abandons the wait.
    pub async fn stop(&self) -> Result<B256, SequencerError> {
        let mut state = self.state.lock().await;
        if !self.active() {
            return Err(SequencerError::AlreadyStopped);
        }

        while state.latest_head.hash != state.latest_sealed.hash {
            let mut head = self.latest_head.subscribe();
            drop(state);
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(SequencerError::Cancelled),
                changed = head.changed() => {
                    if changed.is_err() {
                        return Err(SequencerError::Cancelled);
                    }
                }
            }
            state = self.state.lock().await;
        }

        // Stop may race with another stop.
        if !self.active() {
            return Err(SequencerError::AlreadyStopped);
        }
        self.listener.sequencer_stopped()?;
        state.latest = Default::default();
        state.next_action_ok = false;
        self.active.store(false, Ordering::SeqCst);
        tiller_macros::set!(gauge, crate::Metrics::SEQUENCER_ACTIVE, 0.0);
        self.publish_schedule(&state);
        info!(target: "sequencer", "Sequencer has been stopped");
        Ok(state.latest_head.hash)
    }

    /// Releases the conductor and stops the gossiper. Pending [`Sequencer::stop`] calls fail.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.conductor.close().await;
        self.gossiper.stop();
    }

    async fn lock(&self) -> MutexGuard<'_, SequencerState> {
        self.state.lock().await
    }

    async fn emit(&self, event: Event) {
        self.emitter.emit(event).await;
    }

    fn now(&self) -> SystemTime {
        self.clock.now()
    }

    fn block_time(&self) -> Duration {
        Duration::from_secs(self.config.block_time)
    }

    /// Start time of the child of `parent`.
    fn payload_time(&self, parent: &L2BlockRef) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(parent.time.saturating_add(self.config.block_time))
    }

    fn set_latest_head(&self, state: &mut SequencerState, head: L2BlockRef) {
        state.latest_head = head;
        self.latest_head.send_replace(head);
    }

    fn publish_schedule(&self, state: &SequencerState) {
        let schedule = state.schedule();
        self.schedule.send_if_modified(|current| {
            if *current == schedule {
                return false;
            }
            *current = schedule;
            true
        });
    }
}

#[async_trait]
impl<F: L1Fetcher, B: AttributesBuilder> Deriver for Sequencer<F, B> {
    async fn on_event(&self, event: &Event) -> bool {
        let mut state = self.lock().await;
        let before = (state.next_action, state.next_action_ok);

        match event {
            Event::BuildStarted { info, build_started, parent, derived_from, .. } => {
                self.on_build_started(&mut state, *info, *build_started, *parent, *derived_from)
                    .await
            }
            Event::InvalidPayloadAttributes { attributes, err } => {
                if attributes.is_derived() {
                    return true;
                }
                error!(
                    target: "sequencer",
                    parent = %attributes.parent.id(),
                    timestamp = attributes.attributes.timestamp,
                    %err,
                    "Cannot sequence invalid payload attributes"
                );
                self.handle_invalid(&mut state);
            }
            Event::BuildSealed {
                info,
                envelope,
                block,
                is_last_in_span,
                derived_from,
                ..
            } => {
                self.on_build_sealed(
                    &mut state,
                    *info,
                    envelope,
                    *block,
                    *is_last_in_span,
                    *derived_from,
                )
                .await
            }
            Event::PayloadSealInvalid { info, err, .. } => {
                if state.latest.info() == Some(*info) {
                    error!(target: "sequencer", %info, %err, "Sequencer could not seal block");
                    self.handle_invalid(&mut state);
                }
            }
            Event::PayloadSealExpiredError { info, err, .. } => {
                if state.latest.info() == Some(*info) {
                    // Restart with fresh attributes, the next block is likely smaller.
                    error!(
                        target: "sequencer",
                        %info,
                        %err,
                        "Sequencer temporarily could not seal block"
                    );
                    self.handle_invalid(&mut state);
                }
            }
            Event::PayloadSealTemporaryError { info, err, .. } => {
                if state.latest.info() == Some(*info) {
                    warn!(target: "sequencer", %info, %err, "Failed to fetch sealed block");
                    state.next_action = self.now() + ENGINE_ERROR_BACKOFF;
                    state.next_action_ok = self.active();
                }
            }
            Event::PayloadInvalid { envelope, err } => {
                if state.latest.block.hash == envelope.block_hash() {
                    error!(
                        target: "sequencer",
                        block = %envelope.execution_payload.id(),
                        %err,
                        "Sequencer could not insert payload"
                    );
                    self.handle_invalid(&mut state);
                }
            }
            Event::PayloadSuccess { envelope, block, .. } => {
                self.on_payload_success(&mut state, envelope, *block)
            }
            Event::SequencerAction => self.on_sequencer_action(&mut state).await,
            Event::EngineTemporaryError { err } => self.on_engine_temporary_error(&mut state, err),
            Event::Reset { err } => self.on_reset(&mut state, err).await,
            Event::EngineResetConfirmed { .. } => {
                state.next_action_ok = self.active();
                // Give the engine a block worth of time after churning through the reset.
                state.next_action = self.now() + self.block_time();
                info!(
                    target: "sequencer",
                    next = state.next_action_ok,
                    "Engine reset confirmed, sequencer may continue"
                );
            }
            Event::ForkchoiceUpdate { unsafe_head, safe_head, .. } => {
                self.on_forkchoice_update(&mut state, *unsafe_head, *safe_head)
            }
            _ => return false,
        }

        if before != (state.next_action, state.next_action_ok) {
            debug!(
                target: "sequencer",
                time = ?state.next_action,
                ok = state.next_action_ok,
                event = %event,
                "Sequencer action schedule changed"
            );
        }
        self.publish_schedule(&state);
        true
    }
}
