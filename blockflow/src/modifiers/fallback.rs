//! Failure-substituting modifier.

use super::{Handler, Modifier};
use crate::context::CallContext;
use crate::envelope::{Envelope, Payload};
use crate::errors::ProcessingError;
use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;

type FallbackFn<T> = Arc<dyn Fn(&ProcessingError) -> T + Send + Sync>;

/// Replaces a failed item's value with one computed from the failure.
///
/// The substituted envelope keeps the failed item's index, and the failure
/// never reaches the stage's error policy.
pub struct Fallback<T> {
    substitute: FallbackFn<T>,
}

impl<T: Payload> Fallback<T> {
    /// Creates a fallback from a function of the failure.
    pub fn new<F>(substitute: F) -> Self
    where
        F: Fn(&ProcessingError) -> T + Send + Sync + 'static,
    {
        Self {
            substitute: Arc::new(substitute),
        }
    }

    /// Substitutes a fixed value for every failure.
    pub fn value(value: T) -> Self {
        Self::new(move |_| value.clone())
    }
}

impl<T> Clone for Fallback<T> {
    fn clone(&self) -> Self {
        Self {
            substitute: self.substitute.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fallback").finish_non_exhaustive()
    }
}

impl<T: Payload> Modifier<T> for Fallback<T> {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn wrap(&self, next: Handler<T>) -> Handler<T> {
        let substitute = self.substitute.clone();

        Arc::new(move |env: Envelope<T>, ctx: CallContext| {
            let next = next.clone();
            let substitute = substitute.clone();
            async move {
                let index = env.index();
                match next(env, ctx).await {
                    Ok(out) => Ok(out),
                    Err(error) => {
                        debug!(index, error = %error, "Substituting fallback value");
                        Ok(Envelope::new(index, substitute(&error)))
                    }
                }
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifiers::{compose, ItemFuture, Retry};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn always_failing(attempts: Arc<AtomicU32>) -> Handler<i32> {
        Arc::new(move |_env: Envelope<i32>, _ctx: CallContext| -> ItemFuture<i32> {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(ProcessingError::failed("always")) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_substitutes_value_and_keeps_index() {
        let attempts = Arc::new(AtomicU32::new(0));
        let handler = Fallback::value(42).wrap(always_failing(attempts));

        let out = handler(Envelope::new(11, 0), CallContext::default()).await.unwrap();
        assert_eq!(out.index(), 11);
        assert_eq!(out.into_value(), 42);
    }

    #[tokio::test]
    async fn test_substitute_sees_the_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let fallback = Fallback::new(|err: &ProcessingError| if err.is_timeout() { -1 } else { -2 });
        let handler = fallback.wrap(always_failing(attempts));

        let out = handler(Envelope::new(0, 0), CallContext::default()).await.unwrap();
        assert_eq!(out.into_value(), -2);
    }

    #[tokio::test]
    async fn test_fallback_outside_retry_sees_only_final_failure() {
        let attempts = Arc::new(AtomicU32::new(0));
        let modifiers: Vec<Arc<dyn Modifier<i32>>> = vec![
            Arc::new(Retry::new(2).immediate()),
            Arc::new(Fallback::value(99)),
        ];
        let handler = compose(&modifiers, always_failing(attempts.clone()));

        let out = handler(Envelope::new(0, 1), CallContext::default()).await.unwrap();
        assert_eq!(out.into_value(), 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
