//! Instrumented transforms for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::errors::ProcessingError;
use crate::stages::Transform;

/// Passes values through and records every input.
#[derive(Debug)]
pub struct RecordingTransform<T> {
    seen: Mutex<Vec<T>>,
}

impl<T: Clone> RecordingTransform<T> {
    /// Creates a new recording transform.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Returns the values seen so far, in arrival order.
    #[must_use]
    pub fn seen(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl<T: Clone + Send + 'static> Transform<T> for RecordingTransform<T> {
    async fn apply(&self, value: T, _cancel: &CancellationToken) -> Result<T, ProcessingError> {
        self.seen.lock().push(value.clone());
        Ok(value)
    }
}

type FailWhen<T> = Box<dyn Fn(&T, usize) -> bool + Send + Sync>;

/// Fails selected calls and passes the rest through.
pub struct FailingTransform<T> {
    fail_when: FailWhen<T>,
    attempts: AtomicUsize,
}

impl<T> FailingTransform<T> {
    /// Fails every call whose value matches `predicate`.
    pub fn on<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            fail_when: Box::new(move |value, _| predicate(value)),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fails every call.
    #[must_use]
    pub fn always() -> Self {
        Self::on(|_| true)
    }

    /// Fails the first `n` calls, then succeeds.
    #[must_use]
    pub fn first(n: usize) -> Self {
        Self {
            fail_when: Box::new(move |_, attempt| attempt <= n),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl<T> std::fmt::Debug for FailingTransform<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailingTransform")
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Transform<T> for FailingTransform<T> {
    async fn apply(&self, value: T, _cancel: &CancellationToken) -> Result<T, ProcessingError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if (self.fail_when)(&value, attempt) {
            Err(ProcessingError::failed(format!("injected failure on attempt {attempt}")))
        } else {
            Ok(value)
        }
    }
}

type DelayFor<T> = Box<dyn Fn(&T) -> Duration + Send + Sync>;

/// Sleeps a value-dependent time before passing the value through.
///
/// The sleep ends early with a cancellation failure if the token fires.
pub struct SlowTransform<T> {
    delay_for: DelayFor<T>,
}

impl<T> SlowTransform<T> {
    /// Sleeps `delay_for(value)` per call.
    pub fn new<F>(delay_for: F) -> Self
    where
        F: Fn(&T) -> Duration + Send + Sync + 'static,
    {
        Self {
            delay_for: Box::new(delay_for),
        }
    }

    /// Sleeps a fixed time per call.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::new(move |_| delay)
    }
}

impl<T> std::fmt::Debug for SlowTransform<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlowTransform").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Transform<T> for SlowTransform<T> {
    async fn apply(&self, value: T, cancel: &CancellationToken) -> Result<T, ProcessingError> {
        let delay = (self.delay_for)(&value);
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(value),
            () = cancel.cancelled() => Err(ProcessingError::cancelled(cancel.reason().unwrap_or_default())),
        }
    }
}

/// Tracks how many calls are in flight at once.
#[derive(Debug)]
pub struct ConcurrencyProbe {
    hold: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    /// Each call stays in flight for `hold`.
    #[must_use]
    pub fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Highest number of simultaneous calls observed.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Send + 'static> Transform<T> for ConcurrencyProbe {
    async fn apply(&self, value: T, _cancel: &CancellationToken) -> Result<T, ProcessingError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(value)
    }
}
