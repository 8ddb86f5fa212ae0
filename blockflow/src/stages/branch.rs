//! Predicate-dispatched stages.
//!
//! Two stage configurations are merged into one physical stage. The worker
//! evaluates the predicate once per item and tags the call with the chosen
//! [`Branch`]; the merged handler and the error dispatch both read that tag.

use super::config::{transform_handler, StageBody};
use super::{ErrorCallback, StageConfig, Transform};
use crate::context::{Branch, CallContext};
use crate::envelope::{Envelope, Payload};
use crate::errors::ConfigurationError;
use crate::modifiers::Handler;
use futures::FutureExt;
use std::sync::Arc;

/// Decides which branch a value takes.
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

pub(crate) struct BranchBody<T> {
    predicate: Predicate<T>,
    when_true: Arc<dyn Transform<T>>,
    when_false: Option<Arc<dyn Transform<T>>>,
    on_true_error: Option<ErrorCallback>,
    on_false_error: Option<ErrorCallback>,
}

impl<T: Payload> BranchBody<T> {
    pub(crate) fn route(&self, value: &T) -> Branch {
        if (self.predicate)(value) {
            Branch::WhenTrue
        } else {
            Branch::WhenFalse
        }
    }

    /// Without a false arm, items routed false fall back to the true arm's
    /// callback.
    pub(crate) fn error_callback(&self, branch: Branch) -> Option<&ErrorCallback> {
        match branch {
            Branch::WhenTrue => self.on_true_error.as_ref(),
            Branch::WhenFalse if self.when_false.is_some() => self.on_false_error.as_ref(),
            Branch::WhenFalse => self.on_true_error.as_ref(),
        }
    }

    pub(crate) fn handler(&self) -> Handler<T> {
        let when_true = transform_handler(self.when_true.clone());
        let when_false = self.when_false.clone().map(transform_handler);

        Arc::new(move |env: Envelope<T>, ctx: CallContext| match ctx.branch() {
            Some(Branch::WhenFalse) => match &when_false {
                Some(handler) => handler(env, ctx),
                None => async move { Ok(env) }.boxed(),
            },
            _ => when_true(env, ctx),
        })
    }
}

impl<T: Payload> StageConfig<T> {
    /// Merges two configurations into one branching stage.
    ///
    /// Values for which `predicate` holds go through `when_true`; the rest go
    /// through `when_false`, or pass unchanged when it is absent. The merged
    /// stage runs `max` of the arms' concurrency, takes channel capacity and
    /// cancellation token from the true arm (else the false arm), and applies
    /// the true arm's modifiers followed by the false arm's around both.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if either arm is invalid or is itself a
    /// branch.
    pub fn branch<P>(
        predicate: P,
        when_true: StageConfig<T>,
        when_false: Option<StageConfig<T>>,
    ) -> Result<Self, ConfigurationError>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        when_true.validate()?;
        if let Some(arm) = &when_false {
            arm.validate()?;
        }

        let true_transform = match when_true.body {
            StageBody::Single(transform) => transform,
            StageBody::Branch(_) => return Err(nested_branch(when_true.name)),
        };

        let mut name = when_true.name;
        let mut concurrency = when_true.concurrency;
        let mut channel_capacity = when_true.channel_capacity;
        let mut cancel_token = when_true.cancel_token;
        let mut modifiers = when_true.modifiers;
        let mut false_transform = None;
        let mut on_false_error = None;

        if let Some(arm) = when_false {
            false_transform = match arm.body {
                StageBody::Single(transform) => Some(transform),
                StageBody::Branch(_) => return Err(nested_branch(arm.name)),
            };
            name = name.or(arm.name);
            concurrency = concurrency.max(arm.concurrency);
            channel_capacity = channel_capacity.or(arm.channel_capacity);
            cancel_token = cancel_token.or(arm.cancel_token);
            modifiers.extend(arm.modifiers);
            on_false_error = arm.on_error;
        }

        Ok(Self {
            name,
            body: StageBody::Branch(BranchBody {
                predicate: Arc::new(predicate),
                when_true: true_transform,
                when_false: false_transform,
                on_true_error: when_true.on_error,
                on_false_error,
            }),
            modifiers,
            concurrency,
            channel_capacity,
            cancel_token,
            on_error: None,
        })
    }
}

fn nested_branch(name: Option<String>) -> ConfigurationError {
    let err = ConfigurationError::new("a branch arm cannot itself be a branch");
    match name {
        Some(name) => err.with_stage(name),
        None => err,
    }
}
