//! Cancellation token for cooperative cancellation.

use futures::future::select_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct TokenState {
    /// Whether cancellation has been requested on this token.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Wakes tasks waiting in [`CancellationToken::cancelled`].
    notify: Notify,
    /// The token this one was derived from.
    parent: Option<CancellationToken>,
}

/// A cloneable token for cooperative cancellation.
///
/// Clones share state. A token created with [`child_token`](Self::child_token)
/// observes its parent's cancellation, but cancelling the child leaves the
/// parent untouched. The child holds the only link, so short-lived children
/// (one per timed call, say) never accumulate on the parent.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is already cancelled.
    #[must_use]
    pub fn cancelled_with(reason: impl Into<String>) -> Self {
        let token = Self::new();
        token.cancel(reason);
        token
    }

    /// Derives a child token linked to this one.
    #[must_use]
    pub fn child_token(&self) -> Self {
        Self {
            inner: Arc::new(TokenState {
                parent: Some(self.clone()),
                ..TokenState::default()
            }),
        }
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            debug!(reason = %reason, "Cancellation requested");
            *self.inner.reason.write() = Some(reason);
            self.inner.notify.notify_waiters();
        }
    }

    /// Returns whether cancellation has been requested on this token or any
    /// ancestor.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lineage()
            .iter()
            .any(|state| state.cancelled.load(Ordering::SeqCst))
    }

    /// Returns the cancellation reason, if any.
    ///
    /// The token's own reason takes precedence over an inherited one.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.lineage()
            .iter()
            .find(|state| state.cancelled.load(Ordering::SeqCst))
            .and_then(|state| state.reason.read().clone())
    }

    /// Waits until this token or one of its ancestors is cancelled.
    ///
    /// Resolves immediately if cancellation was already requested.
    pub async fn cancelled(&self) {
        let lineage = self.lineage();
        loop {
            // Register interest before checking the flag so a concurrent
            // cancel cannot slip between the check and the wait.
            let waits: Vec<_> = lineage
                .iter()
                .map(|state| Box::pin(state.notify.notified()))
                .collect();
            if self.is_cancelled() {
                return;
            }
            select_all(waits).await;
        }
    }

    fn lineage(&self) -> Vec<&TokenState> {
        let mut states = Vec::new();
        let mut current = Some(self);
        while let Some(token) = current {
            states.push(token.inner.as_ref());
            current = token.inner.parent.as_ref();
        }
        states
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel() {
        let token = CancellationToken::new();
        token.cancel("User requested");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("User requested".to_string()));
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        // First reason wins
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel("via clone");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_observes_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();

        parent.cancel("shutdown");

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.reason(), Some("shutdown".to_string()));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        child.cancel("deadline");

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_when_cancelled() {
        let token = CancellationToken::cancelled_with("done");
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should resolve immediately");
    }

    #[tokio::test]
    async fn test_cancelled_wakes_on_parent_cancel() {
        let parent = CancellationToken::new();
        let child = parent.child_token();

        let waiter = tokio::spawn(async move {
            child.cancelled().await;
            child.reason()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel("stop");

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert_eq!(reason, Some("stop".to_string()));
    }
}
