//! Error types for the blockflow framework.
//!
//! Pipeline-level failures are reported through [`PipelineError`]. Failures
//! of a single item inside a stage are [`ProcessingError`]s; they are either
//! consumed by the stage's error callback or promoted to
//! [`PipelineError::Processing`] when the pipeline completes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// The main error type for pipeline operations.
///
/// Every variant is cheap to clone so that the first fatal failure can be
/// handed to each caller awaiting completion.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A stage or pipeline was configured with invalid options.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// An item failed inside a stage that has no error callback.
    #[error("Stage '{stage}' failed on item {index}: {error}")]
    Processing {
        /// The stage name.
        stage: String,
        /// The sequence index of the failed item.
        index: u64,
        /// The underlying failure.
        #[source]
        error: ProcessingError,
    },

    /// The reorder buffer exceeded its bound.
    #[error("{0}")]
    Overflow(#[from] OverflowError),

    /// The pipeline has been disposed.
    #[error("Pipeline has been disposed")]
    Disposed,

    /// The pipeline must be built before items can flow.
    #[error("Pipeline has not been built")]
    NotBuilt,

    /// The stage graph is frozen.
    #[error("Pipeline has already been built")]
    AlreadyBuilt,

    /// Input was closed by a call to `complete`.
    #[error("Pipeline input is closed")]
    InputClosed,

    /// A write was abandoned because its cancellation token fired.
    #[error("Write cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error (worker panic, lost task).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Returns true for the disposed condition.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }

    /// Returns the processing failure behind this error, if any.
    #[must_use]
    pub fn processing_error(&self) -> Option<&ProcessingError> {
        match self {
            Self::Processing { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Error raised synchronously when options are invalid.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Invalid configuration{}: {message}", .stage.as_ref().map(|s| format!(" for stage '{s}'")).unwrap_or_default())]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The stage the error relates to, if any.
    pub stage: Option<String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stage: None,
        }
    }

    /// Sets the stage the error relates to.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}

/// Error surfaced to the output consumer when the reorder buffer overflows.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Reorder buffer overflow: {pending} pending items exceed the bound of {max_buffered}")]
pub struct OverflowError {
    /// The configured bound.
    pub max_buffered: usize,
    /// The number of entries held when the bound was exceeded.
    pub pending: usize,
    /// The index the buffer was waiting for.
    pub next_expected: u64,
}

/// Failure of a single item inside a stage's modifier chain.
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    /// The transform (or a modifier) failed.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),

    /// The timeout modifier's deadline elapsed.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The stage's cancellation signal fired while the item was in flight.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ProcessingError {
    /// Creates a failure from a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(Arc::new(anyhow::Error::msg(message.into())))
    }

    /// Creates a cancellation failure.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled(reason.into())
    }

    /// Returns true if this is a timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns true if this is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Short machine-readable kind, used in events and failure records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed(_) => "failed",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

impl From<anyhow::Error> for ProcessingError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }
}
