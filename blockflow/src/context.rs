//! Per-invocation call context.

use crate::cancellation::CancellationToken;
use serde::{Deserialize, Serialize};

/// Which arm of a branching stage an item was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// The predicate held.
    WhenTrue,
    /// The predicate did not hold.
    WhenFalse,
}

/// Context travelling alongside one in-flight item through a modifier chain.
///
/// Carries the cancellation signal the transform should observe and, for
/// branching stages, the branch the item was routed to. Modifiers pass it
/// down unchanged unless they need to narrow the signal (the timeout
/// modifier substitutes a linked deadline token).
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    branch: Option<Branch>,
}

impl CallContext {
    /// Creates a context for an unbranched call.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            branch: None,
        }
    }

    /// Tags the call with the branch it was routed to.
    #[must_use]
    pub fn with_branch(mut self, branch: Option<Branch>) -> Self {
        self.branch = branch;
        self
    }

    /// Returns a copy of this context observing a different token.
    #[must_use]
    pub fn with_cancel_token(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            branch: self.branch,
        }
    }

    /// The cancellation signal for this call.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The branch tag, if the stage branches.
    #[must_use]
    pub fn branch(&self) -> Option<Branch> {
        self.branch
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
