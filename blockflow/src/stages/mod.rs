//! Stage transforms and configuration.
//!
//! A stage is a transform applied by a pool of workers, wrapped in a stack
//! of [`modifiers`](crate::modifiers). [`StageConfig`] describes one stage;
//! [`StageConfig::branch`] merges two configurations into a single
//! predicate-dispatched stage.

mod branch;
mod config;
pub(crate) mod worker;

pub use branch::Predicate;
pub use config::{ErrorCallback, StageConfig, DEFAULT_CONCURRENCY};

use crate::cancellation::CancellationToken;
use crate::errors::ProcessingError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// The per-item work of a stage.
///
/// A transform receives the stage's cancellation signal (or a narrower one,
/// under a timeout modifier) and should return promptly once it fires.
#[async_trait]
pub trait Transform<T>: Send + Sync {
    /// Transforms one value.
    async fn apply(&self, value: T, cancel: &CancellationToken) -> Result<T, ProcessingError>;
}

/// A transform backed by a synchronous function.
pub struct FnTransform<F> {
    func: F,
}

impl<F> FnTransform<F> {
    /// Creates a new function-based transform.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnTransform<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransform").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, F> Transform<T> for FnTransform<F>
where
    T: Send + 'static,
    F: Fn(T) -> Result<T, ProcessingError> + Send + Sync,
{
    async fn apply(&self, value: T, _cancel: &CancellationToken) -> Result<T, ProcessingError> {
        (self.func)(value)
    }
}

/// A transform backed by an async function.
///
/// The function receives its own clone of the cancellation token.
pub struct AsyncFnTransform<F, Fut> {
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnTransform<F, Fut> {
    /// Creates a new async function-based transform.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnTransform<F, Fut> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnTransform").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T, F, Fut> Transform<T> for AsyncFnTransform<F, Fut>
where
    T: Send + 'static,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, ProcessingError>> + Send,
{
    async fn apply(&self, value: T, cancel: &CancellationToken) -> Result<T, ProcessingError> {
        (self.func)(value, cancel.clone()).await
    }
}

/// Passes every value through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

#[async_trait]
impl<T: Send + 'static> Transform<T> for IdentityTransform {
    async fn apply(&self, value: T, _cancel: &CancellationToken) -> Result<T, ProcessingError> {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fn_transform() {
        let transform = FnTransform::new(|v: i32| Ok::<_, ProcessingError>(v * 2));
        let out = transform.apply(21, &CancellationToken::new()).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_async_fn_transform_observes_token() {
        let transform = AsyncFnTransform::new(|v: i32, cancel: CancellationToken| async move {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(10)) => Ok(v),
                () = cancel.cancelled() => Err(ProcessingError::cancelled("stopped")),
            }
        });

        let token = CancellationToken::cancelled_with("now");
        let err = transform.apply(1, &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_identity_transform() {
        let out = IdentityTransform
            .apply("same".to_string(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "same");
    }
}
