//! Observation hooks on the event system.

use crate::AnnotatedEvent;
use std::{fmt::Debug, time::Duration};

/// Observes emissions and deriver activity.
///
/// Hooks run synchronously on the emitting or processing task and must return quickly.
pub trait Tracer: Send + Sync + Debug {
    /// `emitter` emitted `event` while handling the event with context `derive_context`.
    fn on_emit(&self, emitter: &str, event: &AnnotatedEvent, derive_context: u64);

    /// `name` starts handling `event`.
    fn on_derive_start(&self, name: &str, event: &AnnotatedEvent, derive_context: u64);

    /// `name` finished handling `event`.
    fn on_derive_end(
        &self,
        name: &str,
        event: &AnnotatedEvent,
        derive_context: u64,
        elapsed: Duration,
        effect: bool,
    );

    /// An emission of `emitter` was delayed by the rate limiter.
    fn on_rate_limited(&self, emitter: &str, derive_context: u64);
}

/// A [`Tracer`] that logs every hook at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTracer;

impl Tracer for LogTracer {
    fn on_emit(&self, emitter: &str, event: &AnnotatedEvent, derive_context: u64) {
        trace!(
            target: "event",
            emitter,
            event = event.event.name(),
            emit_context = event.emit_context,
            derive_context,
            "Emitting event"
        );
    }

    fn on_derive_start(&self, name: &str, event: &AnnotatedEvent, derive_context: u64) {
        trace!(
            target: "event",
            deriver = name,
            event = event.event.name(),
            emit_context = event.emit_context,
            derive_context,
            "Processing event"
        );
    }

    fn on_derive_end(
        &self,
        name: &str,
        event: &AnnotatedEvent,
        derive_context: u64,
        elapsed: Duration,
        effect: bool,
    ) {
        trace!(
            target: "event",
            deriver = name,
            event = event.event.name(),
            emit_context = event.emit_context,
            derive_context,
            ?elapsed,
            effect,
            "Processed event"
        );
    }

    fn on_rate_limited(&self, emitter: &str, derive_context: u64) {
        debug!(target: "event", emitter, derive_context, "Emitter is rate limited");
    }
}
