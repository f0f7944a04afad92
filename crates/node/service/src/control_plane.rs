//! Assembly and lifecycle of the control plane.

use crate::{
    EngineResetWalker, ExecutorKind, NodeConfig, NodeConfigError, ResetDeriver, ResetWalker,
    SequencerScheduler,
};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tiller_engine::{CLSync, EngineApi, EngineController};
use tiller_event::{
    Deriver, Emitter, Event, EventError, Executor, LogTracer, ParallelExecutor, SyncExecutor,
    System, SystemError,
};
use tiller_finality::{AltDaBackend, AltDaFinalizer, Finalizer};
use tiller_protocol::{ExecutionPayloadEnvelope, L1BlockRef, L1Fetcher, RollupConfig};
use tiller_sequencer::{
    AsyncGossiper, AttributesBuilder, Clock, ConductorClient, ConfDepth, DisabledSequencer,
    L1InfoAttributesBuilder, L1OriginSelector, Sequencer, SequencerAdmin, SequencerConductor,
    SequencerConfig, SequencerError, SequencerStateListener, SystemClock,
};
use tiller_status::{L1Tracker, StatusTracker, SyncStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// The L1 view every component reads through: the head cache of the [`L1Tracker`].
pub type TrackedL1<F> = Arc<L1Tracker<F>>;

/// The L1 view of the sequencer: the tracked chain minus the confirmation depth.
pub type ConfirmedL1<F> = Arc<ConfDepth<TrackedL1<F>>>;

/// The sequencer as assembled by the [`ControlPlaneBuilder`].
pub type NodeSequencer<F> = Sequencer<ConfirmedL1<F>, Arc<dyn AttributesBuilder>>;

/// Error raised while assembling or starting a [`ControlPlane`].
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// The node configuration is invalid.
    #[error(transparent)]
    Config(#[from] NodeConfigError),
    /// An actor could not be registered.
    #[error(transparent)]
    Register(#[from] SystemError),
    /// The sequencer refused to initialise.
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    /// Sequencing is enabled but nothing publishes the sequenced blocks.
    #[error("sequencer is enabled but no gossiper was provided")]
    MissingGossiper,
    /// The chain uses alt-DA but no data availability backend was provided.
    #[error("alt-DA is configured but no backend was provided")]
    MissingAltDaBackend,
}

/// Builds a [`ControlPlane`] from a [`NodeConfig`] and its external collaborators.
pub struct ControlPlaneBuilder<E, F> {
    config: NodeConfig,
    engine: E,
    l1: F,
    reset_walker: Option<Arc<dyn ResetWalker>>,
    gossiper: Option<Arc<dyn AsyncGossiper>>,
    conductor: Option<Arc<dyn SequencerConductor>>,
    listener: Option<Arc<dyn SequencerStateListener>>,
    attributes_builder: Option<Arc<dyn AttributesBuilder>>,
    alt_da: Option<Arc<dyn AltDaBackend>>,
    clock: Arc<dyn Clock>,
}

impl<E: fmt::Debug, F: fmt::Debug> fmt::Debug for ControlPlaneBuilder<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneBuilder")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("l1", &self.l1)
            .finish_non_exhaustive()
    }
}

impl<E, F> ControlPlaneBuilder<E, F>
where
    E: EngineApi + 'static,
    F: L1Fetcher + 'static,
{
    /// Starts a builder over the execution engine and the L1 source.
    pub fn new(config: NodeConfig, engine: E, l1: F) -> Self {
        Self {
            config,
            engine,
            l1,
            reset_walker: None,
            gossiper: None,
            conductor: None,
            listener: None,
            attributes_builder: None,
            alt_da: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the default reset walk, which reads the engine's labelled heads.
    pub fn with_reset_walker(self, walker: Arc<dyn ResetWalker>) -> Self {
        Self { reset_walker: Some(walker), ..self }
    }

    /// Sets where sequenced blocks are published.
    pub fn with_gossiper(self, gossiper: Arc<dyn AsyncGossiper>) -> Self {
        Self { gossiper: Some(gossiper), ..self }
    }

    /// Gates sequencing on `conductor` instead of the configured conductor endpoint.
    pub fn with_conductor(self, conductor: Arc<dyn SequencerConductor>) -> Self {
        Self { conductor: Some(conductor), ..self }
    }

    /// Reports sequencer start and stop to `listener`.
    pub fn with_listener(self, listener: Arc<dyn SequencerStateListener>) -> Self {
        Self { listener: Some(listener), ..self }
    }

    /// Replaces the default L1-info attributes builder.
    pub fn with_attributes_builder(self, builder: Arc<dyn AttributesBuilder>) -> Self {
        Self { attributes_builder: Some(builder), ..self }
    }

    /// Routes L1 finality through an alt-DA backend.
    pub fn with_alt_da(self, backend: Arc<dyn AltDaBackend>) -> Self {
        Self { alt_da: Some(backend), ..self }
    }

    /// Reads time from `clock`.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self { clock, ..self }
    }

    /// Creates the event system and registers every actor. Nothing runs until
    /// [`ControlPlane::start`].
    pub fn build(self) -> Result<ControlPlane<E, F>, ControlPlaneError> {
        self.config.validate()?;
        let Self {
            config,
            engine,
            l1,
            reset_walker,
            gossiper,
            conductor,
            listener,
            attributes_builder,
            alt_da,
            clock,
        } = self;

        let rollup = Arc::new(config.rollup.clone());
        let opts = config.register_opts();

        let (executor, sync_executor): (Arc<dyn Executor>, _) = match config.executor {
            ExecutorKind::Sync => {
                let executor = Arc::new(SyncExecutor::new());
                (Arc::clone(&executor) as Arc<dyn Executor>, Some(executor))
            }
            ExecutorKind::Parallel => {
                (Arc::new(ParallelExecutor::new()) as Arc<dyn Executor>, None)
            }
        };
        let system = System::new(executor);
        system.add_tracer(Arc::new(LogTracer));

        let engine = Arc::new(engine);
        let controller = system.register_with("engine", opts.clone(), |emitter| {
            EngineController::new(
                Arc::clone(&engine),
                Arc::clone(&rollup),
                config.sync,
                emitter,
            )
        })?;
        let clsync = system.register_with("clsync", opts.clone(), |emitter| {
            CLSync::with_max_memory(Arc::clone(&rollup), emitter, config.clsync_max_memory)
        })?;

        let l1_tracker = Arc::new(L1Tracker::new(l1));
        system.register("l1-tracker", Some(deriver(&l1_tracker)), opts.clone())?;
        let confirmed =
            Arc::new(ConfDepth::new(Arc::clone(&l1_tracker), config.sequencer.l1_confirmations));
        system.register("conf-depth", Some(deriver(&confirmed)), opts.clone())?;
        let origin_selector =
            Arc::new(L1OriginSelector::new(Arc::clone(&rollup), Arc::clone(&confirmed)));
        system.register("origin-selector", Some(deriver(&origin_selector)), opts.clone())?;

        let sequencer = if config.sequencer.enabled {
            let gossiper = gossiper.ok_or(ControlPlaneError::MissingGossiper)?;
            let attributes_builder = attributes_builder.unwrap_or_else(|| {
                Arc::new(L1InfoAttributesBuilder::new(Arc::clone(&rollup), Arc::clone(&l1_tracker)))
            });
            let conductor = conductor.or_else(|| {
                config.sequencer.conductor_rpc_url.clone().map(|url| {
                    Arc::new(ConductorClient::new_http(url)) as Arc<dyn SequencerConductor>
                })
            });
            let sequencer = system.register_with("sequencer", opts.clone(), |emitter| {
                let mut sequencer = Sequencer::new(
                    Arc::clone(&rollup),
                    Arc::clone(&origin_selector),
                    attributes_builder,
                    gossiper,
                    emitter,
                )
                .with_clock(Arc::clone(&clock))
                .with_max_safe_lag(config.sequencer.max_safe_lag);
                if let Some(conductor) = conductor {
                    sequencer = sequencer.with_conductor(conductor);
                }
                if let Some(listener) = listener {
                    sequencer = sequencer.with_listener(listener);
                }
                sequencer
            })?;
            Some(sequencer)
        } else {
            None
        };

        let finalizer = match (rollup.alt_da_enabled(), alt_da) {
            (true, Some(backend)) => {
                let alt_da = system.register_with("finalizer", opts.clone(), |emitter| {
                    let inner = Arc::new(Finalizer::new(&rollup, Arc::clone(&l1_tracker), emitter));
                    AltDaFinalizer::new(inner, backend)
                })?;
                Arc::clone(alt_da.inner())
            }
            (true, None) => return Err(ControlPlaneError::MissingAltDaBackend),
            (false, _) => system.register_with("finalizer", opts.clone(), |emitter| {
                Finalizer::new(&rollup, Arc::clone(&l1_tracker), emitter)
            })?,
        };

        let status = Arc::new(StatusTracker::new());
        system.register("status", Some(deriver(&status)), opts.clone())?;

        let reset_walker = reset_walker.unwrap_or_else(|| {
            Arc::new(EngineResetWalker::new(
                Arc::clone(&rollup),
                Arc::clone(&engine),
                Arc::clone(&l1_tracker),
            ))
        });
        system.register_with("reset", opts.clone(), |emitter| {
            ResetDeriver::new(reset_walker, emitter)
        })?;

        let emitter = system.register("node", None, opts)?;

        info!(
            target: "node",
            executor = ?config.executor,
            sequencer = config.sequencer.enabled,
            actors = system.actors().len(),
            "Assembled control plane"
        );

        Ok(ControlPlane {
            rollup,
            sequencer_config: config.sequencer,
            system,
            sync_executor,
            emitter,
            engine: controller,
            clsync,
            l1_tracker,
            confirmed,
            sequencer,
            finalizer,
            status,
            clock,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
        })
    }
}

fn deriver<D: Deriver + 'static>(actor: &Arc<D>) -> Arc<dyn Deriver> {
    Arc::clone(actor) as Arc<dyn Deriver>
}

/// The running control plane: the event system, its actors and the tasks driving them.
pub struct ControlPlane<E, F> {
    rollup: Arc<RollupConfig>,
    sequencer_config: SequencerConfig,
    system: System,
    sync_executor: Option<Arc<SyncExecutor>>,
    emitter: Arc<dyn Emitter>,
    engine: Arc<EngineController<Arc<E>>>,
    clsync: Arc<CLSync>,
    l1_tracker: TrackedL1<F>,
    confirmed: ConfirmedL1<F>,
    sequencer: Option<Arc<NodeSequencer<F>>>,
    finalizer: Arc<Finalizer<TrackedL1<F>>>,
    status: Arc<StatusTracker>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
}

impl<E: fmt::Debug, F: fmt::Debug> fmt::Debug for ControlPlane<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlane")
            .field("system", &self.system)
            .field("sequencer", &self.sequencer.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<E, F> ControlPlane<E, F>
where
    E: EngineApi + 'static,
    F: L1Fetcher + 'static,
{
    /// Initialises the sequencer and asks for the engine heads to be established.
    pub async fn init(&self) -> Result<(), ControlPlaneError> {
        if let Some(sequencer) = &self.sequencer {
            sequencer.init(self.sequencer_config.start_active()).await?;
        }
        self.emitter.emit(Event::ResetEngineRequest).await;
        Ok(())
    }

    /// Spawns the driver of the single-threaded executor and the sequencer scheduler.
    pub fn spawn(&self) {
        let mut tasks = self.tasks();
        if let Some(executor) = &self.sync_executor {
            tasks.spawn(drive(Arc::clone(executor), self.cancel.child_token()));
        }
        if let Some(sequencer) = &self.sequencer {
            let scheduler = SequencerScheduler::new(
                sequencer.subscribe_schedule(),
                Arc::clone(&self.clock),
                Arc::clone(&self.emitter),
                self.system.subscribe_critical(),
                self.cancel.child_token(),
            );
            tasks.spawn(scheduler.run());
        }
    }

    /// [`init`](Self::init) followed by [`spawn`](Self::spawn).
    pub async fn start(&self) -> Result<(), ControlPlaneError> {
        self.init().await?;
        self.spawn();
        tiller_macros::set!(gauge, crate::Metrics::CONTROL_PLANE_UP, 1.0);
        info!(target: "node", "Control plane started");
        Ok(())
    }

    /// Waits until [`shutdown`](Self::shutdown) is called or an actor raises a critical
    /// error. Returns the critical error, if any.
    pub async fn wait_for_shutdown(&self) -> Option<EventError> {
        let mut critical = self.system.subscribe_critical();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            err = critical.wait_for(Option::is_some) => {
                let err = err.ok().and_then(|err| (*err).clone());
                if err.is_some() {
                    tiller_macros::inc!(counter, crate::Metrics::CRITICAL_ERRORS);
                }
                err
            }
        }
    }

    /// Stops the driving tasks, cancels any outstanding build and unregisters every actor.
    pub async fn shutdown(&self) {
        info!(target: "node", "Shutting down control plane");
        self.cancel.cancel();
        let mut tasks = std::mem::take(&mut *self.tasks());
        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(target: "node", %err, "Control plane task failed");
            }
        }

        if let Some(sequencer) = &self.sequencer {
            sequencer.close().await;
        }
        self.engine.close().await;
        if let Some(executor) = &self.sync_executor {
            executor.drain().await;
        }
        self.system.stop().await;
        tiller_macros::set!(gauge, crate::Metrics::CONTROL_PLANE_UP, 0.0);
        info!(target: "node", "Control plane stopped");
    }

    /// Reports a new L1 head.
    pub async fn on_l1_unsafe(&self, l1_unsafe: L1BlockRef) {
        self.emit(Event::L1Unsafe { l1_unsafe }).await;
    }

    /// Reports a new L1 safe block.
    pub async fn on_l1_safe(&self, l1_safe: L1BlockRef) {
        self.emit(Event::L1Safe { l1_safe }).await;
    }

    /// Reports a new finalized L1 block.
    pub async fn on_l1_finalized(&self, finalized_l1: L1BlockRef) {
        self.emit(Event::FinalizeL1 { finalized_l1 }).await;
    }

    /// Hands a payload received over gossip to the unsafe payload buffer.
    pub async fn on_unsafe_payload(&self, envelope: ExecutionPayloadEnvelope) {
        self.emit(Event::ReceivedUnsafePayload { envelope: Arc::new(envelope) }).await;
    }

    /// Emits `event` on behalf of the node.
    pub async fn emit(&self, event: Event) {
        self.emitter.emit(event).await;
    }

    /// The current sync status.
    pub fn sync_status(&self) -> SyncStatus {
        self.status.sync_status()
    }

    /// The status tracker.
    pub const fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    /// Operator control over sequencing. Fails every mutating call when sequencing is
    /// disabled.
    pub fn admin(&self) -> Arc<dyn SequencerAdmin> {
        match &self.sequencer {
            Some(sequencer) => Arc::clone(sequencer) as Arc<dyn SequencerAdmin>,
            None => Arc::new(DisabledSequencer),
        }
    }

    /// The sequencer, if sequencing is enabled.
    pub const fn sequencer(&self) -> Option<&Arc<NodeSequencer<F>>> {
        self.sequencer.as_ref()
    }

    /// The engine controller.
    pub const fn engine(&self) -> &Arc<EngineController<Arc<E>>> {
        &self.engine
    }

    /// The unsafe payload buffer.
    pub const fn clsync(&self) -> &Arc<CLSync> {
        &self.clsync
    }

    /// The finalizer.
    pub const fn finalizer(&self) -> &Arc<Finalizer<TrackedL1<F>>> {
        &self.finalizer
    }

    /// The cached L1 source shared by the actors.
    pub const fn l1_fetcher(&self) -> &TrackedL1<F> {
        &self.l1_tracker
    }

    /// The L1 source of the sequencer, trailing the head by the confirmation depth.
    pub const fn confirmed_l1(&self) -> &ConfirmedL1<F> {
        &self.confirmed
    }

    /// The rollup configuration.
    pub const fn rollup_config(&self) -> &Arc<RollupConfig> {
        &self.rollup
    }

    /// The event system.
    pub const fn system(&self) -> &System {
        &self.system
    }

    /// The single-threaded executor, when configured.
    pub const fn sync_executor(&self) -> Option<&Arc<SyncExecutor>> {
        self.sync_executor.as_ref()
    }

    /// Subscribes to the first critical error.
    pub fn subscribe_critical(&self) -> tokio::sync::watch::Receiver<Option<EventError>> {
        self.system.subscribe_critical()
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drains the single-threaded executor whenever events are queued.
async fn drive(executor: Arc<SyncExecutor>, cancel: CancellationToken) {
    debug!(target: "node", "Starting event driver");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = executor.notified() => executor.drain().await,
        }
    }
    debug!(target: "node", "Event driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{L2Heads, ResetWalkError};
    use async_trait::async_trait;
    use tiller_engine::test_utils::TestEngine;
    use tiller_protocol::{
        BlockId, Genesis,
        test_utils::{TestL1Fetcher, l1_ref, l2_ref},
    };
    use tiller_sequencer::test_utils::TestGossiper;

    #[derive(Debug)]
    struct FixedWalker(L2Heads);

    #[async_trait]
    impl ResetWalker for FixedWalker {
        async fn find_l2_heads(&self) -> Result<L2Heads, ResetWalkError> {
            Ok(self.0)
        }
    }

    fn config(executor: ExecutorKind, sequencer: bool) -> NodeConfig {
        let mut config = NodeConfig { executor, ..Default::default() };
        config.rollup.block_time = 2;
        config.rollup.max_sequencer_drift = 600;
        config.rollup.genesis = Genesis {
            l1: BlockId { hash: l1_ref(0).hash, number: 0 },
            ..Default::default()
        };
        config.sequencer.enabled = sequencer;
        config
    }

    fn builder(config: NodeConfig) -> ControlPlaneBuilder<TestEngine, TestL1Fetcher> {
        let head = l2_ref(10, 20, &l1_ref(1), 0);
        ControlPlaneBuilder::new(config, TestEngine::new(), TestL1Fetcher::with_chain(10))
            .with_reset_walker(Arc::new(FixedWalker(L2Heads {
                unsafe_head: head,
                safe_head: head,
                finalized: head,
            })))
    }

    #[tokio::test]
    async fn registers_every_actor() {
        let plane = builder(config(ExecutorKind::Sync, false)).build().unwrap();
        let mut actors = plane.system().actors();
        actors.sort();
        assert_eq!(
            actors,
            vec![
                "clsync",
                "conf-depth",
                "engine",
                "finalizer",
                "l1-tracker",
                "node",
                "origin-selector",
                "reset",
                "status",
            ]
        );
        assert!(plane.sequencer().is_none());
        assert!(plane.sync_executor().is_some());
    }

    #[tokio::test]
    async fn sequencer_requires_gossiper() {
        let err = builder(config(ExecutorKind::Sync, true)).build().unwrap_err();
        assert!(matches!(err, ControlPlaneError::MissingGossiper));

        let plane = builder(config(ExecutorKind::Sync, true))
            .with_gossiper(Arc::new(TestGossiper::default()))
            .build()
            .unwrap();
        assert!(plane.system().actors().contains(&"sequencer".to_string()));
    }

    #[tokio::test]
    async fn alt_da_requires_backend() {
        let mut config = config(ExecutorKind::Sync, false);
        config.rollup.alt_da = Some(Default::default());
        let err = builder(config).build().unwrap_err();
        assert!(matches!(err, ControlPlaneError::MissingAltDaBackend));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = config(ExecutorKind::Sync, false);
        config.event_channel_capacity = 0;
        let err = builder(config).build().unwrap_err();
        assert!(matches!(err, ControlPlaneError::Config(NodeConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn disabled_sequencer_admin_rejects_start() {
        let plane = builder(config(ExecutorKind::Sync, false)).build().unwrap();
        let admin = plane.admin();
        assert!(!admin.active());
        assert!(matches!(
            admin.start(Default::default()).await,
            Err(SequencerError::NotEnabled)
        ));
    }

    #[tokio::test]
    async fn init_resets_engine_heads() {
        let plane = builder(config(ExecutorKind::Sync, false)).build().unwrap();
        plane.init().await.unwrap();
        plane.sync_executor().unwrap().drain().await;

        let heads = plane.engine().heads().await;
        assert_eq!(heads.unsafe_head.number, 10);
        assert_eq!(heads.safe.number, 10);
        assert_eq!(plane.sync_status().unsafe_l2.number, 10);
        assert_eq!(plane.sync_status().finalized_l2.number, 10);
    }

    #[tokio::test]
    async fn spawned_driver_processes_inputs() {
        let plane = builder(config(ExecutorKind::Sync, false)).build().unwrap();
        plane.start().await.unwrap();

        let mut status = plane.status().subscribe();
        plane.on_l1_unsafe(l1_ref(10)).await;
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            status.wait_for(|s| s.head_l1.number == 10),
        )
        .await
        .unwrap()
        .unwrap();

        plane.shutdown().await;
        assert!(plane.system().actors().is_empty());
    }

    #[tokio::test]
    async fn parallel_plane_starts_and_stops() {
        let plane = builder(config(ExecutorKind::Parallel, false)).build().unwrap();
        plane.start().await.unwrap();

        let mut status = plane.status().subscribe();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            status.wait_for(|s| s.unsafe_l2.number == 10),
        )
        .await
        .unwrap()
        .unwrap();

        plane.shutdown().await;
        assert!(plane.wait_for_shutdown().await.is_none());
    }

    #[tokio::test]
    async fn critical_error_ends_wait() {
        let plane = builder(config(ExecutorKind::Sync, false)).build().unwrap();
        plane.start().await.unwrap();
        plane.emit(Event::CriticalError { err: EventError::msg("boom") }).await;

        let err = tokio::time::timeout(std::time::Duration::from_secs(5), plane.wait_for_shutdown())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(err.to_string(), "boom");
        plane.shutdown().await;
    }
}
