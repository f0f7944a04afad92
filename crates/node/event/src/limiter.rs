//! Token-bucket rate limiting for emitters.

use crate::{Emitter, Event};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::{
    fmt,
    num::NonZeroU32,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// Default sustained emission rate, in events per second.
pub const DEFAULT_EVENTS_PER_SECOND: u32 = 10_000;

/// Default burst size.
pub const DEFAULT_BURST: u32 = 500;

/// Callback fired when an emitter starts waiting for tokens.
pub type OnRateLimited = Arc<dyn Fn() + Send + Sync>;

/// An [`Emitter`] that waits for a token before forwarding each event.
///
/// The hook fires once per starvation period. It is re-armed by the next emission that
/// gets a token without waiting.
pub struct LimitedEmitter<E> {
    inner: E,
    limiter: DefaultDirectRateLimiter,
    on_limited: Option<OnRateLimited>,
    starved: AtomicBool,
}

impl<E> fmt::Debug for LimitedEmitter<E>
where
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitedEmitter").field("inner", &self.inner).finish_non_exhaustive()
    }
}

impl<E: Emitter> LimitedEmitter<E> {
    /// Wraps `inner`, allowing `per_second` events per second with bursts of `burst`.
    ///
    /// Zero values fall back to the defaults.
    pub fn new(inner: E, per_second: u32, burst: u32, on_limited: Option<OnRateLimited>) -> Self {
        let rate = NonZeroU32::new(per_second)
            .or(NonZeroU32::new(DEFAULT_EVENTS_PER_SECOND))
            .unwrap_or(NonZeroU32::MIN);
        let burst =
            NonZeroU32::new(burst).or(NonZeroU32::new(DEFAULT_BURST)).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(rate).allow_burst(burst));
        Self { inner, limiter, on_limited, starved: AtomicBool::new(false) }
    }
}

#[async_trait]
impl<E: Emitter> Emitter for LimitedEmitter<E> {
    async fn emit(&self, event: Event) {
        if self.limiter.check().is_ok() {
            self.starved.store(false, Ordering::Relaxed);
        } else {
            if !self.starved.swap(true, Ordering::Relaxed) {
                if let Some(on_limited) = &self.on_limited {
                    on_limited();
                }
            }
            self.limiter.until_ready().await;
        }
        self.inner.emit(event).await;
    }
}
