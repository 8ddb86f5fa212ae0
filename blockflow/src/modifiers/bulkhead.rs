//! Concurrency-limiting admission gate.

use super::{Handler, Modifier};
use crate::context::CallContext;
use crate::envelope::{Envelope, Payload};
use crate::errors::{ConfigurationError, ProcessingError};
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Admits at most `limit` concurrent calls to the inner handler.
///
/// The permit pool is created once per instance; clones and every stage the
/// instance is added to share it. A permit is released when the inner call
/// returns, whether it succeeded or failed.
#[derive(Debug, Clone)]
pub struct Bulkhead {
    limit: usize,
    permits: Arc<Semaphore>,
}

impl Bulkhead {
    /// Creates a bulkhead with the given capacity.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Returns the configured capacity.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns the number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl<T: Payload> Modifier<T> for Bulkhead {
    fn name(&self) -> &'static str {
        "bulkhead"
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.limit == 0 {
            return Err(ConfigurationError::new("bulkhead limit must be at least 1"));
        }
        Ok(())
    }

    fn wrap(&self, next: Handler<T>) -> Handler<T> {
        let permits = self.permits.clone();

        Arc::new(move |env: Envelope<T>, ctx: CallContext| {
            let next = next.clone();
            let permits = permits.clone();
            async move {
                let permit = tokio::select! {
                    acquired = permits.acquire_owned() => acquired
                        .map_err(|_| ProcessingError::failed("bulkhead closed"))?,
                    () = ctx.cancel_token().cancelled() => {
                        return Err(ProcessingError::cancelled(
                            ctx.cancel_token().reason().unwrap_or_default(),
                        ));
                    }
                };
                let result = next(env, ctx).await;
                drop(permit);
                result
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifiers::ItemFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_zero_limit_is_rejected() {
        assert!(Modifier::<i32>::validate(&Bulkhead::new(0)).is_err());
        assert!(Modifier::<i32>::validate(&Bulkhead::new(2)).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_limits_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (r, p) = (running.clone(), peak.clone());
        let inner: Handler<i32> = Arc::new(move |env: Envelope<i32>, _ctx: CallContext| -> ItemFuture<i32> {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(env)
            }
            .boxed()
        });

        let bulkhead = Bulkhead::new(2);
        let handler = Modifier::<i32>::wrap(&bulkhead, inner);
        let calls: Vec<_> = (0..6)
            .map(|i| tokio::spawn(handler(Envelope::new(i, 0), CallContext::default())))
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(bulkhead.available(), 2);
    }

    #[tokio::test]
    async fn test_permit_released_on_failure() {
        let inner: Handler<i32> = Arc::new(|_env: Envelope<i32>, _ctx: CallContext| -> ItemFuture<i32> {
            async move { Err(ProcessingError::failed("boom")) }.boxed()
        });
        let bulkhead = Bulkhead::new(1);
        let handler = Modifier::<i32>::wrap(&bulkhead, inner);

        assert!(handler(Envelope::new(0, 0), CallContext::default()).await.is_err());
        assert!(handler(Envelope::new(1, 0), CallContext::default()).await.is_err());
        assert_eq!(bulkhead.available(), 1);
    }
}
