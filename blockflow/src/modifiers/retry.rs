//! Retry modifier with configurable backoff and jitter.

use super::{Handler, Modifier};
use crate::context::CallContext;
use crate::envelope::{Envelope, Payload};
use futures::FutureExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^(retry - 1)
    #[default]
    Exponential,
    /// delay = base * retry
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Serializable retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Base delay between attempts in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Delay before the given retry (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;

        let delay = match self.backoff {
            BackoffStrategy::Exponential => {
                let factor = 2u64.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(factor).min(max)
            }
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry)).min(max),
            BackoffStrategy::Constant => base.min(max),
        };

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Re-invokes the inner handler on failure.
///
/// With `max_retries = n` the inner handler runs at most `n + 1` times. The
/// last failure is returned once retries are exhausted, or as soon as the
/// call's cancellation signal fires.
#[derive(Clone)]
pub struct Retry {
    max_retries: u32,
    backoff: BackoffFn,
}

impl Retry {
    /// Retries up to `max_retries` times with the default exponential backoff.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self::from_policy(RetryPolicy::default().with_max_retries(max_retries))
    }

    /// Builds a retry modifier from a policy.
    #[must_use]
    pub fn from_policy(policy: RetryPolicy) -> Self {
        let max_retries = policy.max_retries;
        Self {
            max_retries,
            backoff: Arc::new(move |retry| policy.delay_for(retry)),
        }
    }

    /// Replaces the backoff function. It receives the 1-based retry number.
    #[must_use]
    pub fn with_backoff<F>(mut self, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.backoff = Arc::new(backoff);
        self
    }

    /// Retries immediately, without sleeping.
    #[must_use]
    pub fn immediate(self) -> Self {
        self.with_backoff(|_| Duration::ZERO)
    }

    /// Returns the number of retries.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry")
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl<T: Payload> Modifier<T> for Retry {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn wrap(&self, next: Handler<T>) -> Handler<T> {
        let max_retries = self.max_retries;
        let backoff = self.backoff.clone();

        Arc::new(move |env: Envelope<T>, ctx: CallContext| {
            let next = next.clone();
            let backoff = backoff.clone();
            async move {
                let mut retry = 0;
                loop {
                    let error = match next(env.clone(), ctx.clone()).await {
                        Ok(out) => return Ok(out),
                        Err(error) => error,
                    };

                    if retry >= max_retries || ctx.cancel_token().is_cancelled() {
                        return Err(error);
                    }

                    retry += 1;
                    let delay = backoff(retry);
                    debug!(
                        index = env.index(),
                        retry,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Retrying after error"
                    );

                    if !delay.is_zero() {
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = ctx.cancel_token().cancelled() => return Err(error),
                        }
                    }
                }
            }
            .boxed()
        })
    }
}
