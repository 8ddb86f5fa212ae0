//! Fixed delay before each call.

use super::{Handler, Modifier};
use crate::context::CallContext;
use crate::envelope::{Envelope, Payload};
use crate::errors::ProcessingError;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;

/// Waits a fixed duration before invoking the inner handler.
///
/// Stateless, so one instance can be shared freely. A zero delay leaves the
/// inner handler unwrapped.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    duration: Duration,
}

impl Delay {
    /// Creates a delay modifier.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Creates a delay modifier from milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl<T: Payload> Modifier<T> for Delay {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn wrap(&self, next: Handler<T>) -> Handler<T> {
        if self.duration.is_zero() {
            return next;
        }
        let duration = self.duration;

        Arc::new(move |env: Envelope<T>, ctx: CallContext| {
            let next = next.clone();
            async move {
                tokio::select! {
                    () = tokio::time::sleep(duration) => {}
                    () = ctx.cancel_token().cancelled() => {
                        return Err(ProcessingError::cancelled(
                            ctx.cancel_token().reason().unwrap_or_default(),
                        ));
                    }
                }
                next(env, ctx).await
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifiers::ItemFuture;
    use std::time::Instant;

    fn identity() -> Handler<i32> {
        Arc::new(|env: Envelope<i32>, _ctx: CallContext| -> ItemFuture<i32> { async move { Ok(env) }.boxed() })
    }

    #[tokio::test]
    async fn test_zero_delay_returns_inner_handler() {
        let inner = identity();
        let wrapped = Modifier::<i32>::wrap(&Delay::new(Duration::ZERO), inner.clone());
        assert!(Arc::ptr_eq(&inner, &wrapped));
    }

    #[tokio::test]
    async fn test_delay_waits_before_call() {
        let handler = Modifier::<i32>::wrap(&Delay::from_millis(30), identity());
        let started = Instant::now();
        let out = handler(Envelope::new(0, 2), CallContext::default()).await.unwrap();

        assert_eq!(out.into_value(), 2);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_delay_abandoned_on_cancel() {
        let ctx = CallContext::default();
        ctx.cancel_token().cancel("stop");
        let handler = Modifier::<i32>::wrap(&Delay::from_millis(10_000), identity());

        let err = handler(Envelope::new(0, 2), ctx).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
