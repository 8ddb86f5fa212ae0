//! State shared by every task of one pipeline run.

use super::PipelineStats;
use crate::cancellation::CancellationToken;
use crate::errors::{PipelineError, ProcessingError};
use crate::events::{EventSink, PipelineEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// One item failure, handled or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage name.
    pub stage: String,
    /// Sequence index of the item.
    pub index: u64,
    /// `failed`, `timeout` or `cancelled`.
    pub kind: String,
    /// Error message.
    pub message: String,
    /// Whether an error callback consumed the failure.
    pub handled: bool,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub(crate) fn new(stage: &str, index: u64, error: &ProcessingError, handled: bool) -> Self {
        Self {
            stage: stage.to_string(),
            index,
            kind: error.kind().to_string(),
            message: error.to_string(),
            handled,
            timestamp: Utc::now(),
        }
    }
}

pub(crate) struct RunContext {
    pub(crate) pipeline: String,
    pub(crate) run_id: Uuid,
    pub(crate) preserve_order: bool,
    pub(crate) stats: Arc<PipelineStats>,
    sink: Arc<dyn EventSink>,
    /// Cancelled on the first fatal failure.
    fault: CancellationToken,
    first_fault: Mutex<Option<PipelineError>>,
    failures: Mutex<Vec<FailureRecord>>,
}

impl RunContext {
    pub(crate) fn new(
        pipeline: String,
        run_id: Uuid,
        preserve_order: bool,
        stats: Arc<PipelineStats>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pipeline,
            run_id,
            preserve_order,
            stats,
            sink,
            fault: CancellationToken::new(),
            first_fault: Mutex::new(None),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn event(&self, kind: &str, data: serde_json::Value) -> PipelineEvent {
        PipelineEvent::new(kind, self.pipeline.clone(), self.run_id.to_string(), data)
    }

    pub(crate) fn emit(&self, kind: &str, data: serde_json::Value) {
        self.sink.try_emit(self.event(kind, data));
    }

    /// Records a fatal failure. Only the first one is kept.
    pub(crate) fn record_fault(&self, err: PipelineError) -> bool {
        let mut slot = self.first_fault.lock();
        if slot.is_some() {
            return false;
        }
        error!(pipeline = %self.pipeline, run_id = %self.run_id, error = %err, "Pipeline faulted");
        self.fault.cancel(err.to_string());
        *slot = Some(err);
        true
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.fault.is_cancelled()
    }

    pub(crate) fn fault(&self) -> Option<PipelineError> {
        self.first_fault.lock().clone()
    }

    pub(crate) fn record_failure(&self, record: FailureRecord) {
        self.failures.lock().push(record);
    }

    pub(crate) fn failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{kinds, CollectingEventSink};

    fn context(sink: Arc<CollectingEventSink>) -> RunContext {
        RunContext::new("test".to_string(), Uuid::new_v4(), false, Arc::default(), sink)
    }

    #[test]
    fn test_first_fault_wins() {
        let run = context(Arc::new(CollectingEventSink::new()));
        assert!(!run.is_faulted());

        assert!(run.record_fault(PipelineError::Internal("first".into())));
        assert!(!run.record_fault(PipelineError::Internal("second".into())));

        assert!(run.is_faulted());
        assert_eq!(run.fault().unwrap().to_string(), "Internal error: first");
    }

    #[test]
    fn test_emit_stamps_pipeline_identity() {
        let sink = Arc::new(CollectingEventSink::new());
        let run = context(sink.clone());
        run.emit(kinds::ITEM_DROPPED, serde_json::json!({"index": 1}));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pipeline, "test");
        assert_eq!(events[0].run_id, run.run_id.to_string());
    }

    #[test]
    fn test_failure_record_from_error() {
        let record = FailureRecord::new("parse", 3, &ProcessingError::failed("bad"), true);
        assert_eq!(record.kind, "failed");
        assert_eq!(record.message, "bad");
        assert!(record.handled);
    }
}
