//! Helpers for testing derivers.

use crate::{Emitter, Event};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An [`Emitter`] that records everything emitted through it.
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct TestEmitter {
    events: Arc<Mutex<Vec<Event>>>,
}

impl TestEmitter {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    /// Names of the recorded events, in emission order.
    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(Event::name).collect()
    }

    /// Returns and clears the recorded events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.lock())
    }

    /// Clears the record.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// An [`Arc<dyn Emitter>`] view sharing this record.
    pub fn as_emitter(&self) -> Arc<dyn Emitter> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl Emitter for TestEmitter {
    async fn emit(&self, event: Event) {
        self.lock().push(event);
    }
}
