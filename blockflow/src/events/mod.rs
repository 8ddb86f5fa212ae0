//! Pipeline events.
//!
//! The engine reports lifecycle transitions and per-item outcomes to an
//! [`EventSink`] owned by the pipeline. Sinks are attached per pipeline;
//! there is no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type names emitted by the engine.
pub mod kinds {
    /// The stage graph was frozen.
    pub const PIPELINE_BUILT: &str = "pipeline.built";
    /// Every stage drained after input closed.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// The pipeline was torn down.
    pub const PIPELINE_DISPOSED: &str = "pipeline.disposed";
    /// An item was skipped because its stage was cancelled.
    pub const ITEM_DROPPED: &str = "stage.item_dropped";
    /// An item failed and the stage's error callback consumed it.
    pub const ITEM_FAILED: &str = "stage.item_failed";
    /// An item failed with no error callback; the pipeline is faulted.
    pub const STAGE_FAULT: &str = "stage.fault";
    /// The reorder buffer exceeded its bound.
    pub const REORDER_OVERFLOW: &str = "reorder.overflow";
}

/// A single event emitted by a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dotted event type, one of [`kinds`].
    pub event_type: String,
    /// The pipeline name.
    pub pipeline: String,
    /// The run id of the emitting pipeline.
    pub run_id: String,
    /// Event-specific fields.
    pub data: serde_json::Value,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        pipeline: impl Into<String>,
        run_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            pipeline: pipeline.into(),
            run_id: run_id.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type() {
        let event = PipelineEvent::new(
            kinds::STAGE_FAULT,
            "orders",
            "run-1",
            serde_json::json!({"stage": "parse", "index": 4}),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "stage.fault");
        assert_eq!(json["data"]["index"], 4);
        assert!(json["timestamp"].is_string());
    }
}
