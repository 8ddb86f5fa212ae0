//! Disposal hooks registered against a pipeline.
//!
//! Any extension can ask to be told when a pipeline is disposed without the
//! pipeline knowing what the extension is. Hooks run exactly once: the
//! registration set is taken atomically before any hook runs, so a second
//! disposal finds nothing to do.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Type alias for async disposal hooks.
pub type DisposeHook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Outcome of running every registered hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisposeReport {
    /// Hooks that ran to completion.
    pub completed: Vec<String>,
    /// Hooks that did not finish, with the reason.
    pub failed: Vec<(String, String)>,
}

impl DisposeReport {
    /// Total number of hooks that were notified.
    #[must_use]
    pub fn notified(&self) -> usize {
        self.completed.len() + self.failed.len()
    }
}

/// Registry of disposal hooks.
///
/// Hooks run in LIFO order (last registered, first executed) to unwind
/// resource acquisition.
#[derive(Default)]
pub struct ResourceRegistry {
    hooks: Mutex<Vec<(String, DisposeHook)>>,
    closed: Mutex<bool>,
}

impl ResourceRegistry {
    /// Creates a new registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a disposal hook.
    ///
    /// Returns `false` (and drops the hook) when the registry has already
    /// been disposed.
    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let closed = self.closed.lock();
        if *closed {
            warn!(resource = %name, "Resource registered after disposal; ignoring");
            return false;
        }
        let boxed: DisposeHook = Box::new(move || Box::pin(hook()));
        self.hooks.lock().push((name, boxed));
        true
    }

    /// Returns the number of pending hooks.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Returns true once [`dispose_all`](Self::dispose_all) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        *self.closed.lock()
    }

    /// Runs every hook once, in LIFO order.
    ///
    /// Each hook gets an equal share of `total_timeout`. A hook that times
    /// out has still been notified and is reported in `failed`.
    pub async fn dispose_all(&self, total_timeout: Duration) -> DisposeReport {
        let hooks: Vec<_> = {
            let mut closed = self.closed.lock();
            *closed = true;
            std::mem::take(&mut *self.hooks.lock())
        };

        let mut report = DisposeReport::default();
        if hooks.is_empty() {
            return report;
        }

        let per_hook = total_timeout
            .checked_div(u32::try_from(hooks.len()).unwrap_or(u32::MAX))
            .unwrap_or(total_timeout)
            .max(Duration::from_millis(10));

        for (name, hook) in hooks.into_iter().rev() {
            match timeout(per_hook, hook()).await {
                Ok(()) => {
                    debug!(resource = %name, "Resource disposed");
                    report.completed.push(name);
                }
                Err(_) => {
                    warn!(
                        resource = %name,
                        timeout_ms = u64::try_from(per_hook.as_millis()).unwrap_or(u64::MAX),
                        "Resource disposal timed out"
                    );
                    report.failed.push((name, "Timeout".to_string()));
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("pending_count", &self.pending_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_registry_lifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = ResourceRegistry::new();

        for i in 1..=3 {
            let order = order.clone();
            registry.register(format!("hook-{i}"), move || async move {
                order.lock().push(i);
            });
        }

        let report = registry.dispose_all(Duration::from_secs(10)).await;

        assert_eq!(report.completed.len(), 3);
        assert!(report.failed.is_empty());
        assert_eq!(*order.lock(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_registry_runs_each_hook_once() {
        let registry = ResourceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        registry.register("counter", move || async move {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.dispose_all(Duration::from_secs(1)).await;
        let second = registry.dispose_all(Duration::from_secs(1)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.notified(), 0);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_register_after_dispose_is_rejected() {
        let registry = ResourceRegistry::new();
        registry.dispose_all(Duration::from_secs(1)).await;

        assert!(!registry.register("late", || async {}));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_registry_timeout_still_notifies_others() {
        let registry = ResourceRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        registry.register("fast", move || async move {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        registry.register("slow", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let report = registry.dispose_all(Duration::from_millis(40)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "slow");
        assert_eq!(report.notified(), 2);
    }
}
