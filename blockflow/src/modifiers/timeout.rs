//! Deadline modifier.

use super::{Handler, Modifier};
use crate::context::CallContext;
use crate::envelope::{Envelope, Payload};
use crate::errors::ProcessingError;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Fails an item with [`ProcessingError::Timeout`] when the inner handler
/// does not finish within the deadline.
///
/// The inner handler observes a child of the call's cancellation token, so a
/// transform can notice the deadline cooperatively. The caller's own token is
/// never cancelled by the deadline. If the caller's token fired first, the
/// result is a cancellation, not a timeout.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    /// Creates a timeout modifier.
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Creates a timeout modifier from milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// Returns the deadline.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl<T: Payload> Modifier<T> for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn wrap(&self, next: Handler<T>) -> Handler<T> {
        let duration = self.duration;

        Arc::new(move |env: Envelope<T>, ctx: CallContext| {
            let next = next.clone();
            async move {
                let index = env.index();
                let ambient = ctx.cancel_token().clone();
                let deadline = ambient.child_token();
                let call = next(env, ctx.with_cancel_token(deadline.clone()));

                tokio::select! {
                    biased;
                    result = call => result,
                    () = tokio::time::sleep(duration) => {
                        deadline.cancel(format!("deadline of {duration:?} elapsed"));
                        if ambient.is_cancelled() {
                            Err(ProcessingError::cancelled(ambient.reason().unwrap_or_default()))
                        } else {
                            warn!(
                                index,
                                timeout_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                                "Item timed out"
                            );
                            Err(ProcessingError::Timeout(duration))
                        }
                    }
                }
            }
            .boxed()
        })
    }
}
