//! Modifier trait and composition.

use crate::context::CallContext;
use crate::envelope::Envelope;
use crate::errors::{ConfigurationError, ProcessingError};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Result of running one item through a handler.
pub type ItemResult<T> = Result<Envelope<T>, ProcessingError>;

/// Boxed future returned by a [`Handler`].
pub type ItemFuture<T> = BoxFuture<'static, ItemResult<T>>;

/// An effective item transform: the core transform, possibly wrapped by
/// any number of modifiers.
pub type Handler<T> = Arc<dyn Fn(Envelope<T>, CallContext) -> ItemFuture<T> + Send + Sync>;

/// A wrapper that adds behavior around a stage's item transform.
///
/// `wrap` receives the next handler inward and returns a handler that
/// decides when (and whether, and how often) to call it. State that must be
/// shared by every call through the modifier (a bulkhead's permits, a
/// throttle's clock) lives in the modifier value, so adding the same
/// `Arc<dyn Modifier>` to two stages shares that state.
pub trait Modifier<T>: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Checks the modifier's own settings; called when the stage is added.
    fn validate(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Wraps `next` with this modifier's behavior.
    fn wrap(&self, next: Handler<T>) -> Handler<T>;
}

/// Composes modifiers around a core handler.
///
/// The first modifier in the slice is innermost (closest to `core`); the last
/// is outermost and sees each call first. `[retry, fallback]` therefore
/// lets the retry exhaust its attempts before the fallback sees a failure.
pub fn compose<T>(modifiers: &[Arc<dyn Modifier<T>>], core: Handler<T>) -> Handler<T> {
    modifiers
        .iter()
        .fold(core, |next, modifier| modifier.wrap(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    /// Records "enter:<tag>" and "exit:<tag>" around the inner call.
    struct Tracer {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Modifier<i32> for Tracer {
        fn name(&self) -> &'static str {
            "tracer"
        }

        fn wrap(&self, next: Handler<i32>) -> Handler<i32> {
            let tag = self.tag;
            let log = self.log.clone();
            Arc::new(move |env: Envelope<i32>, ctx: CallContext| {
                let next = next.clone();
                let log = log.clone();
                async move {
                    log.lock().push(format!("enter:{tag}"));
                    let result = next(env, ctx).await;
                    log.lock().push(format!("exit:{tag}"));
                    result
                }
                .boxed()
            })
        }
    }

    #[tokio::test]
    async fn test_last_modifier_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let core_log = log.clone();
        let core: Handler<i32> = Arc::new(move |env: Envelope<i32>, _ctx: CallContext| {
            core_log.lock().push("core".to_string());
            async move { Ok::<_, ProcessingError>(env) }.boxed()
        });

        let modifiers: Vec<Arc<dyn Modifier<i32>>> = vec![
            Arc::new(Tracer { tag: "first", log: log.clone() }),
            Arc::new(Tracer { tag: "second", log: log.clone() }),
        ];

        let handler = compose(&modifiers, core);
        let out = handler(Envelope::new(0, 5), CallContext::default())
            .await
            .unwrap();

        assert_eq!(out.into_value(), 5);
        assert_eq!(
            *log.lock(),
            vec!["enter:second", "enter:first", "core", "exit:first", "exit:second"]
        );
    }

    #[tokio::test]
    async fn test_compose_without_modifiers_is_core() {
        let core: Handler<i32> = Arc::new(|env: Envelope<i32>, _ctx: CallContext| {
            async move { Ok::<_, ProcessingError>(env.map(|v| v + 1)) }.boxed()
        });
        let handler = compose(&[], core);

        let out = handler(Envelope::new(3, 1), CallContext::default())
            .await
            .unwrap();
        assert_eq!(out.index(), 3);
        assert_eq!(out.into_value(), 2);
    }
}
