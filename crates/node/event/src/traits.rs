//! Capabilities of actors.

use crate::{AnnotatedEvent, Event};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

/// Reacts to events.
///
/// Derivers own their state and are only reached through [`Deriver::on_event`]. Long running
/// work is expressed as further emitted events rather than by blocking the handler.
#[async_trait]
pub trait Deriver: Send + Sync {
    /// Handles `event`, returning `true` if it had any effect.
    async fn on_event(&self, event: &Event) -> bool;
}

#[async_trait]
impl<T: Deriver + ?Sized> Deriver for Arc<T> {
    async fn on_event(&self, event: &Event) -> bool {
        (**self).on_event(event).await
    }
}

/// Publishes events into the system.
#[async_trait]
pub trait Emitter: Send + Sync + Debug {
    /// Emits `event`. May wait for back-pressure or rate limiting.
    async fn emit(&self, event: Event);
}

#[async_trait]
impl<T: Emitter + ?Sized> Emitter for Arc<T> {
    async fn emit(&self, event: Event) {
        (**self).emit(event).await
    }
}

/// Something an executor can deliver events to.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Processes one annotated event.
    async fn run_event(&self, event: AnnotatedEvent);
}
