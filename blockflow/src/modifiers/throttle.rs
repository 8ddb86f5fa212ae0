//! Minimum spacing between call start times.

use super::{Handler, Modifier};
use crate::context::CallContext;
use crate::envelope::{Envelope, Payload};
use crate::errors::{ConfigurationError, ProcessingError};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces at least `interval` between the starts of successive calls.
///
/// Admission is serialized through one clock per instance, so clones and
/// every stage sharing the instance share the spacing. The clock lock is
/// held only while waiting for the slot, never during the inner call.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_start: Arc<Mutex<Option<Instant>>>,
}

impl Throttle {
    /// Creates a throttle with the given spacing.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start: Arc::new(Mutex::new(None)),
        }
    }

    /// Creates a throttle from milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Returns the spacing.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl<T: Payload> Modifier<T> for Throttle {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interval.is_zero() {
            return Err(ConfigurationError::new("throttle interval must be positive"));
        }
        Ok(())
    }

    fn wrap(&self, next: Handler<T>) -> Handler<T> {
        let interval = self.interval;
        let last_start = self.last_start.clone();

        Arc::new(move |env: Envelope<T>, ctx: CallContext| {
            let next = next.clone();
            let last_start = last_start.clone();
            async move {
                let admitted = async {
                    let mut last = last_start.lock().await;
                    if let Some(previous) = *last {
                        tokio::time::sleep_until(previous + interval).await;
                    }
                    *last = Some(Instant::now());
                };

                tokio::select! {
                    () = admitted => {}
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
    use parking_lot::Mutex as SyncMutex;

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(Modifier::<i32>::validate(&Throttle::new(Duration::ZERO)).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_spaces_start_times() {
        let starts = Arc::new(SyncMutex::new(Vec::new()));
        let recorded = starts.clone();
        let inner: Handler<i32> = Arc::new(move |env: Envelope<i32>, _ctx: CallContext| -> ItemFuture<i32> {
            recorded.lock().push(std::time::Instant::now());
            async move { Ok(env) }.boxed()
        });

        let handler = Modifier::<i32>::wrap(&Throttle::from_millis(25), inner);
        let calls: Vec<_> = (0..4)
            .map(|i| tokio::spawn(handler(Envelope::new(i, 0), CallContext::default())))
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        let mut starts = starts.lock().clone();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            // Small tolerance for timer granularity.
            assert!(pair[1] - pair[0] >= Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn test_lock_not_held_during_call() {
        let throttle = Throttle::from_millis(1);
        let inner: Handler<i32> = Arc::new(|env: Envelope<i32>, _ctx: CallContext| -> ItemFuture<i32> {
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(env)
            }
            .boxed()
        });
        let handler = Modifier::<i32>::wrap(&throttle, inner);

        let slow = tokio::spawn(handler(Envelope::new(0, 0), CallContext::default()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let clock = tokio::time::timeout(Duration::from_millis(50), throttle.last_start.lock()).await;
        assert!(clock.is_ok());
        drop(clock);
        slow.await.unwrap().unwrap();
    }
}
