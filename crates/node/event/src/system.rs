//! The actor registry.

use crate::{
    AnnotatedEvent, DEFAULT_BURST, DEFAULT_EVENTS_PER_SECOND, Deriver, Emitter, Event, EventError,
    Executable, Executor, ExecutorHandle, ExecutorOpts, LimitedEmitter, OnRateLimited, Tracer,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Emitter options of a registration.
#[derive(Clone)]
pub struct EmitterOpts {
    /// Whether emissions pass through a token bucket.
    pub limiting: bool,
    /// Sustained rate, in events per second.
    pub events_per_second: u32,
    /// Bucket size.
    pub burst: u32,
    /// Called whenever an emission has to wait for a token.
    pub on_limited: Option<OnRateLimited>,
}

impl Default for EmitterOpts {
    fn default() -> Self {
        Self {
            limiting: true,
            events_per_second: DEFAULT_EVENTS_PER_SECOND,
            burst: DEFAULT_BURST,
            on_limited: None,
        }
    }
}

impl fmt::Debug for EmitterOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitterOpts")
            .field("limiting", &self.limiting)
            .field("events_per_second", &self.events_per_second)
            .field("burst", &self.burst)
            .field("on_limited", &self.on_limited.is_some())
            .finish()
    }
}

/// Options for [`System::register`].
#[derive(Debug, Clone, Default)]
pub struct RegisterOpts {
    /// Executor options.
    pub executor: ExecutorOpts,
    /// Emitter options.
    pub emitter: EmitterOpts,
}

/// Error returned by [`System`] registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SystemError {
    /// An actor with the same name is registered.
    #[error("actor {0} is already registered")]
    DuplicateActor(String),
}

/// Registry of named actors sharing one [`Executor`].
///
/// Cloning is cheap and yields a handle to the same registry.
#[derive(Clone)]
pub struct System {
    inner: Arc<SystemInner>,
}

struct SystemInner {
    executor: Arc<dyn Executor>,
    actors: Mutex<HashMap<String, Registration>>,
    tracers: RwLock<Vec<Arc<dyn Tracer>>>,
    emit_context: AtomicU64,
    derive_context: AtomicU64,
    abort: AtomicBool,
    critical: watch::Sender<Option<EventError>>,
}

struct Registration {
    actor: Arc<Actor>,
    handle: Box<dyn ExecutorHandle>,
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.inner.actors().keys().cloned().collect();
        names.sort();
        f.debug_struct("System")
            .field("executor", &self.inner.executor)
            .field("actors", &names)
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl System {
    /// Creates a registry delivering events through `executor`.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        let (critical, _) = watch::channel(None);
        Self {
            inner: Arc::new(SystemInner {
                executor,
                actors: Mutex::new(HashMap::new()),
                tracers: RwLock::new(Vec::new()),
                emit_context: AtomicU64::new(0),
                derive_context: AtomicU64::new(0),
                abort: AtomicBool::new(false),
                critical,
            }),
        }
    }

    /// Registers an actor under `name` and returns its emitter.
    ///
    /// Actors without a deriver only produce events.
    pub fn register(
        &self,
        name: &str,
        deriver: Option<Arc<dyn Deriver>>,
        opts: RegisterOpts,
    ) -> Result<Arc<dyn Emitter>, SystemError> {
        let (actor, emitter) = self.prepare(name, &opts)?;
        if let Some(deriver) = deriver {
            actor.attach(deriver);
        }
        self.activate(actor, &opts)?;
        Ok(emitter)
    }

    /// Registers an actor whose deriver is built from its own emitter.
    ///
    /// The deriver is attached before the actor receives any event.
    pub fn register_with<D, F>(
        &self,
        name: &str,
        opts: RegisterOpts,
        build: F,
    ) -> Result<Arc<D>, SystemError>
    where
        D: Deriver + 'static,
        F: FnOnce(Arc<dyn Emitter>) -> D,
    {
        let (actor, emitter) = self.prepare(name, &opts)?;
        let deriver = Arc::new(build(emitter));
        actor.attach(Arc::clone(&deriver) as Arc<dyn Deriver>);
        self.activate(actor, &opts)?;
        Ok(deriver)
    }

    fn prepare(
        &self,
        name: &str,
        opts: &RegisterOpts,
    ) -> Result<(Arc<Actor>, Arc<dyn Emitter>), SystemError> {
        if self.inner.actors().contains_key(name) {
            return Err(SystemError::DuplicateActor(name.to_string()));
        }
        let actor = Arc::new(Actor {
            name: name.to_string(),
            system: Arc::downgrade(&self.inner),
            deriver: RwLock::new(None),
            cancel: CancellationToken::new(),
            current: AtomicU64::new(0),
        });

        let base = ActorEmitter { actor: Arc::clone(&actor) };
        let emitter: Arc<dyn Emitter> = if opts.emitter.limiting {
            let limited_actor = Arc::downgrade(&actor);
            let user_hook = opts.emitter.on_limited.clone();
            let hook: OnRateLimited = Arc::new(move || {
                if let Some(actor) = limited_actor.upgrade() {
                    if let Some(system) = actor.system.upgrade() {
                        system.record_rate_limited(&actor.name, actor.current.load(Ordering::SeqCst));
                    }
                }
                if let Some(hook) = &user_hook {
                    hook();
                }
            });
            Arc::new(LimitedEmitter::new(
                base,
                opts.emitter.events_per_second,
                opts.emitter.burst,
                Some(hook),
            ))
        } else {
            Arc::new(base)
        };
        Ok((actor, emitter))
    }

    fn activate(&self, actor: Arc<Actor>, opts: &RegisterOpts) -> Result<(), SystemError> {
        let mut actors = self.inner.actors();
        if actors.contains_key(&actor.name) {
            return Err(SystemError::DuplicateActor(actor.name.clone()));
        }
        let handle =
            self.inner.executor.add(Arc::clone(&actor) as Arc<dyn Executable>, &opts.executor);
        debug!(target: "event", name = %actor.name, "Registered actor");
        actors.insert(actor.name.clone(), Registration { actor, handle });
        Ok(())
    }

    /// Unregisters `name`, cancelling it and detaching it from the executor.
    ///
    /// Returns `false` if no such actor exists.
    pub async fn unregister(&self, name: &str) -> bool {
        let registration = self.inner.actors().remove(name);
        match registration {
            Some(registration) => {
                Self::shutdown(registration).await;
                true
            }
            None => false,
        }
    }

    /// Unregisters every actor.
    pub async fn stop(&self) {
        let registrations: Vec<_> = self.inner.actors().drain().map(|(_, r)| r).collect();
        for registration in registrations {
            Self::shutdown(registration).await;
        }
    }

    async fn shutdown(registration: Registration) {
        let Registration { actor, handle } = registration;
        actor.cancel.cancel();
        handle.leave().await;
        actor.detach();
        debug!(target: "event", name = %actor.name, "Unregistered actor");
    }

    /// Names of the registered actors.
    pub fn actors(&self) -> Vec<String> {
        self.inner.actors().keys().cloned().collect()
    }

    /// Adds a tracer.
    pub fn add_tracer(&self, tracer: Arc<dyn Tracer>) {
        self.inner.tracers.write().unwrap_or_else(PoisonError::into_inner).push(tracer);
    }

    /// Removes a tracer previously passed to [`System::add_tracer`].
    pub fn remove_tracer(&self, tracer: &Arc<dyn Tracer>) {
        self.inner
            .tracers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|t| !Arc::ptr_eq(t, tracer));
    }

    /// Returns `true` once a critical error was emitted.
    pub fn is_aborted(&self) -> bool {
        self.inner.abort.load(Ordering::SeqCst)
    }

    /// Subscribes to the first critical error.
    pub fn subscribe_critical(&self) -> watch::Receiver<Option<EventError>> {
        self.inner.critical.subscribe()
    }
}

impl SystemInner {
    fn actors(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        self.actors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracers(&self) -> Vec<Arc<dyn Tracer>> {
        self.tracers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    async fn emit(&self, emitter: &str, derive_context: u64, event: Event) {
        let emit_context = self.emit_context.fetch_add(1, Ordering::SeqCst) + 1;

        // Abort before the event is scheduled so nothing else gets processed meanwhile.
        if let Event::CriticalError { err } = &event {
            if !self.abort.swap(true, Ordering::SeqCst) {
                error!(target: "event", emitter, %err, "Critical error, aborting event processing");
                self.critical.send_replace(Some(err.clone()));
            }
        }

        let annotated = AnnotatedEvent { event, emit_context };
        let name = annotated.event.name();
        for tracer in self.tracers() {
            tracer.on_emit(emitter, &annotated, derive_context);
        }
        tiller_macros::inc!(counter, crate::Metrics::EVENTS_EMITTED, "event" => name);

        if let Err(err) = self.executor.enqueue(annotated).await {
            tiller_macros::inc!(counter, crate::Metrics::ENQUEUE_FAILURES, "event" => name);
            error!(target: "event", emitter, event = name, derive_context, %err, "Failed to enqueue event");
        }
    }

    fn record_rate_limited(&self, emitter: &str, derive_context: u64) {
        for tracer in self.tracers() {
            tracer.on_rate_limited(emitter, derive_context);
        }
        tiller_macros::inc!(
            counter,
            crate::Metrics::RATE_LIMITED,
            "emitter" => emitter.to_string()
        );
    }
}

struct Actor {
    name: String,
    system: Weak<SystemInner>,
    deriver: RwLock<Option<Arc<dyn Deriver>>>,
    cancel: CancellationToken,
    /// Derive context of the event being handled, `0` when idle.
    current: AtomicU64,
}

impl Actor {
    fn attach(&self, deriver: Arc<dyn Deriver>) {
        *self.deriver.write().unwrap_or_else(PoisonError::into_inner) = Some(deriver);
    }

    fn detach(&self) {
        self.deriver.write().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn deriver(&self) -> Option<Arc<dyn Deriver>> {
        self.deriver.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Executable for Actor {
    async fn run_event(&self, event: AnnotatedEvent) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(system) = self.system.upgrade() else {
            return;
        };
        if system.abort.load(Ordering::SeqCst) && !event.event.is_critical() {
            return;
        }
        let Some(deriver) = self.deriver() else {
            return;
        };

        let derive_context = system.derive_context.fetch_add(1, Ordering::SeqCst) + 1;
        self.current.store(derive_context, Ordering::SeqCst);
        let tracers = system.tracers();
        for tracer in &tracers {
            tracer.on_derive_start(&self.name, &event, derive_context);
        }

        let start = Instant::now();
        let effect = deriver.on_event(&event.event).await;
        let elapsed = start.elapsed();

        for tracer in &tracers {
            tracer.on_derive_end(&self.name, &event, derive_context, elapsed, effect);
        }
        if effect {
            tiller_macros::inc!(
                counter,
                crate::Metrics::EVENTS_HANDLED,
                "deriver" => self.name.clone(),
                "event" => event.event.name()
            );
        }
        self.current.store(0, Ordering::SeqCst);
    }
}

struct ActorEmitter {
    actor: Arc<Actor>,
}

impl fmt::Debug for ActorEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorEmitter").field("name", &self.actor.name).finish()
    }
}

#[async_trait]
impl Emitter for ActorEmitter {
    async fn emit(&self, event: Event) {
        if self.actor.cancel.is_cancelled() {
            return;
        }
        let Some(system) = self.actor.system.upgrade() else {
            return;
        };
        let derive_context = self.actor.current.load(Ordering::SeqCst);
        system.emit(&self.actor.name, derive_context, event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParallelExecutor, SyncExecutor};
    use std::time::Duration;
    use tokio::sync::Mutex as AsyncMutex;

    /// Records every event name and answers a forkchoice request with a try-finalize.
    struct Echo {
        emitter: Arc<dyn Emitter>,
        seen: AsyncMutex<Vec<&'static str>>,
    }

    impl Echo {
        fn new(emitter: Arc<dyn Emitter>) -> Self {
            Self { emitter, seen: AsyncMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Deriver for Echo {
        async fn on_event(&self, event: &Event) -> bool {
            self.seen.lock().await.push(event.name());
            if matches!(event, Event::ForkchoiceRequest) {
                self.emitter.emit(Event::TryFinalize).await;
            }
            true
        }
    }

    fn sync_system() -> (System, Arc<SyncExecutor>) {
        let exec = Arc::new(SyncExecutor::new());
        (System::new(exec.clone()), exec)
    }

    #[tokio::test]
    async fn reentrant_emissions_are_processed_in_order() {
        let (system, exec) = sync_system();
        let echo = system.register_with("echo", RegisterOpts::default(), Echo::new).unwrap();
        let producer = system.register("producer", None, RegisterOpts::default()).unwrap();

        producer.emit(Event::ForkchoiceRequest).await;
        producer.emit(Event::SequencerAction).await;
        exec.drain().await;

        assert_eq!(
            *echo.seen.lock().await,
            vec!["forkchoice-request", "sequencer-action", "try-finalize"]
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let (system, _) = sync_system();
        system.register("a", None, RegisterOpts::default()).unwrap();
        assert_eq!(
            system.register("a", None, RegisterOpts::default()).unwrap_err(),
            SystemError::DuplicateActor("a".into())
        );
    }

    #[tokio::test]
    async fn critical_error_aborts_processing() {
        let (system, exec) = sync_system();
        let echo = system.register_with("echo", RegisterOpts::default(), Echo::new).unwrap();
        let producer = system.register("producer", None, RegisterOpts::default()).unwrap();
        let mut critical = system.subscribe_critical();

        producer.emit(Event::TryFinalize).await;
        let err = EventError::msg("unsafe below finalized");
        producer.emit(Event::CriticalError { err }).await;
        producer.emit(Event::SequencerAction).await;
        assert!(system.is_aborted());
        exec.drain().await;

        assert_eq!(*echo.seen.lock().await, vec!["critical-error"]);
        assert!(critical.has_changed().unwrap());
        assert_eq!(
            critical.borrow_and_update().as_ref().map(ToString::to_string).as_deref(),
            Some("unsafe below finalized")
        );
    }

    #[tokio::test]
    async fn unregistered_actor_stops_receiving() {
        let (system, exec) = sync_system();
        let echo = system.register_with("echo", RegisterOpts::default(), Echo::new).unwrap();
        let producer = system.register("producer", None, RegisterOpts::default()).unwrap();

        assert!(system.unregister("echo").await);
        assert!(!system.unregister("echo").await);
        producer.emit(Event::TryFinalize).await;
        exec.drain().await;
        assert!(echo.seen.lock().await.is_empty());

        // The name is free again.
        system.register_with("echo", RegisterOpts::default(), Echo::new).unwrap();
    }

    #[derive(Debug, Default)]
    struct CountingTracer {
        emits: AtomicU64,
        derives: AtomicU64,
    }

    impl Tracer for CountingTracer {
        fn on_emit(&self, _: &str, _: &AnnotatedEvent, _: u64) {
            self.emits.fetch_add(1, Ordering::SeqCst);
        }
        fn on_derive_start(&self, _: &str, _: &AnnotatedEvent, _: u64) {}
        fn on_derive_end(&self, _: &str, _: &AnnotatedEvent, _: u64, _: Duration, _: bool) {
            self.derives.fetch_add(1, Ordering::SeqCst);
        }
        fn on_rate_limited(&self, _: &str, _: u64) {}
    }

    #[tokio::test]
    async fn tracers_observe_until_removed() {
        let (system, exec) = sync_system();
        system.register_with("echo", RegisterOpts::default(), Echo::new).unwrap();
        let producer = system.register("producer", None, RegisterOpts::default()).unwrap();
        let tracer = Arc::new(CountingTracer::default());
        let dyn_tracer: Arc<dyn Tracer> = tracer.clone();
        system.add_tracer(dyn_tracer.clone());

        producer.emit(Event::ForkchoiceRequest).await;
        exec.drain().await;
        assert_eq!(tracer.emits.load(Ordering::SeqCst), 2);
        assert_eq!(tracer.derives.load(Ordering::SeqCst), 2);

        system.remove_tracer(&dyn_tracer);
        producer.emit(Event::TryFinalize).await;
        exec.drain().await;
        assert_eq!(tracer.emits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn parallel_system_delivers_reentrant_events() {
        let system = System::new(Arc::new(ParallelExecutor::new()));
        let echo = system.register_with("echo", RegisterOpts::default(), Echo::new).unwrap();
        let producer = system.register("producer", None, RegisterOpts::default()).unwrap();

        producer.emit(Event::ForkchoiceRequest).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while echo.seen.lock().await.len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*echo.seen.lock().await, vec!["forkchoice-request", "try-finalize"]);
        system.stop().await;
        assert!(system.actors().is_empty());
    }
}
