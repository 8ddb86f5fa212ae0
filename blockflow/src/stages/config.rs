//! Stage configuration.

use super::branch::BranchBody;
use super::{AsyncFnTransform, FnTransform, IdentityTransform, Transform};
use crate::cancellation::CancellationToken;
use crate::context::{Branch, CallContext};
use crate::envelope::{Envelope, Payload};
use crate::errors::{ConfigurationError, ProcessingError};
use crate::modifiers::{compose, Handler, Modifier, ModifierSpec};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Default number of workers per stage.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Callback that consumes a stage's item failures.
///
/// A stage with a callback drops failed items and keeps going; a stage
/// without one faults the pipeline on the first failure.
pub type ErrorCallback = Arc<dyn Fn(&ProcessingError) + Send + Sync>;

pub(crate) enum StageBody<T> {
    Single(Arc<dyn Transform<T>>),
    Branch(BranchBody<T>),
}

/// Immutable description of one stage.
///
/// ```
/// use blockflow::prelude::*;
///
/// let stage = StageConfig::map(|v: i32| v * 2)
///     .with_name("double")
///     .with_concurrency(4)
///     .with_modifier(Retry::new(2));
/// assert_eq!(stage.concurrency(), 4);
/// ```
pub struct StageConfig<T> {
    pub(crate) name: Option<String>,
    pub(crate) body: StageBody<T>,
    pub(crate) modifiers: Vec<Arc<dyn Modifier<T>>>,
    pub(crate) concurrency: usize,
    pub(crate) channel_capacity: Option<usize>,
    pub(crate) cancel_token: Option<CancellationToken>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl<T: Payload> StageConfig<T> {
    /// Creates a stage from a transform.
    pub fn new(transform: impl Transform<T> + 'static) -> Self {
        Self::from_transform(Arc::new(transform))
    }

    /// Creates a stage from a shared transform.
    pub fn from_transform(transform: Arc<dyn Transform<T>>) -> Self {
        Self {
            name: None,
            body: StageBody::Single(transform),
            modifiers: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
            channel_capacity: None,
            cancel_token: None,
            on_error: None,
        }
    }

    /// Creates a stage from an infallible function.
    pub fn map<F>(func: F) -> Self
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        Self::new(FnTransform::new(move |value: T| -> Result<T, ProcessingError> {
            Ok(func(value))
        }))
    }

    /// Creates a stage from a fallible function.
    pub fn try_map<F>(func: F) -> Self
    where
        F: Fn(T) -> Result<T, ProcessingError> + Send + Sync + 'static,
    {
        Self::new(FnTransform::new(func))
    }

    /// Creates a stage from an async function.
    pub fn from_async<F, Fut>(func: F) -> Self
    where
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ProcessingError>> + Send + 'static,
    {
        Self::new(AsyncFnTransform::new(func))
    }

    /// Creates a pass-through stage.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(IdentityTransform)
    }

    /// Sets the stage name used in logs, events and failures.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Appends a modifier. Later modifiers wrap earlier ones.
    #[must_use]
    pub fn with_modifier(self, modifier: impl Modifier<T> + 'static) -> Self {
        self.with_shared_modifier(Arc::new(modifier))
    }

    /// Appends a modifier instance that may also be used by other stages.
    #[must_use]
    pub fn with_shared_modifier(mut self, modifier: Arc<dyn Modifier<T>>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    /// Appends modifiers built from their data descriptions.
    #[must_use]
    pub fn with_modifier_specs(mut self, specs: impl IntoIterator<Item = ModifierSpec>) -> Self {
        self.modifiers
            .extend(specs.into_iter().map(ModifierSpec::into_modifier));
        self
    }

    /// Sets the number of concurrent workers.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the capacity of the stage's input channel.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Sets the stage's own cancellation signal.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    /// Installs an error callback.
    ///
    /// On a stage built by [`StageConfig::branch`] it handles failures from
    /// arms that have no callback of their own.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ProcessingError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Returns the configured name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the number of workers.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the input channel capacity, if set.
    #[must_use]
    pub fn channel_capacity(&self) -> Option<usize> {
        self.channel_capacity
    }

    /// Returns the stage's cancellation signal, if set.
    #[must_use]
    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel_token.as_ref()
    }

    /// Returns true if this stage dispatches on a predicate.
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(self.body, StageBody::Branch(_))
    }

    /// Names of the modifiers, innermost first.
    #[must_use]
    pub fn modifier_names(&self) -> Vec<&'static str> {
        self.modifiers.iter().map(|m| m.name()).collect()
    }

    /// Checks the stage's settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if concurrency or channel capacity is
    /// zero, or if any modifier rejects its own settings.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let attach = |e: ConfigurationError| match self.name() {
            Some(name) if e.stage.is_none() => e.with_stage(name),
            _ => e,
        };

        if self.concurrency < 1 {
            return Err(attach(ConfigurationError::new("concurrency must be at least 1")));
        }
        if self.channel_capacity == Some(0) {
            return Err(attach(ConfigurationError::new(
                "channel capacity must be at least 1",
            )));
        }
        for modifier in &self.modifiers {
            modifier.validate().map_err(attach)?;
        }
        Ok(())
    }

    /// Picks the branch for a value; `None` for an unbranched stage.
    pub(crate) fn route(&self, value: &T) -> Option<Branch> {
        match &self.body {
            StageBody::Single(_) => None,
            StageBody::Branch(body) => Some(body.route(value)),
        }
    }

    /// The error callback responsible for an item routed to `branch`.
    ///
    /// On a branching stage an arm's own callback wins; the stage-level
    /// callback covers arms without one.
    pub(crate) fn error_callback(&self, branch: Option<Branch>) -> Option<&ErrorCallback> {
        match (&self.body, branch) {
            (StageBody::Branch(body), Some(branch)) => body
                .error_callback(branch)
                .or(self.on_error.as_ref()),
            _ => self.on_error.as_ref(),
        }
    }

    /// Builds the effective handler: the transform wrapped in every modifier.
    pub(crate) fn handler(&self) -> Handler<T> {
        let core: Handler<T> = match &self.body {
            StageBody::Single(transform) => transform_handler(transform.clone()),
            StageBody::Branch(body) => body.handler(),
        };
        compose(&self.modifiers, core)
    }
}

/// Adapts a transform to the handler shape, keeping the envelope's index.
pub(crate) fn transform_handler<T: Payload>(transform: Arc<dyn Transform<T>>) -> Handler<T> {
    Arc::new(move |env: Envelope<T>, ctx: CallContext| {
        let transform = transform.clone();
        async move {
            let index = env.index();
            let value = transform.apply(env.into_value(), ctx.cancel_token()).await?;
            Ok::<_, ProcessingError>(Envelope::new(index, value))
        }
        .boxed()
    })
}

impl<T> std::fmt::Debug for StageConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageConfig")
            .field("name", &self.name)
            .field("branch", &matches!(self.body, StageBody::Branch(_)))
            .field("modifiers", &self.modifiers.len())
            .field("concurrency", &self.concurrency)
            .field("channel_capacity", &self.channel_capacity)
            .field("has_error_callback", &self.on_error.is_some())
            .finish_non_exhaustive()
    }
}
