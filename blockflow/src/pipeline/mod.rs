//! Pipeline assembly and execution.
//!
//! A [`Pipeline`] owns a linear chain of stages. Each stage runs its own
//! worker pool fed by a bounded channel; the last stage feeds either the
//! output channel directly or, for ordered pipelines, a [`ReorderBuffer`].

mod engine;
mod options;
mod output;
mod reorder;
pub(crate) mod runtime;
mod stats;


pub use engine::{Pipeline, PipelineState};
pub use options::PipelineOptions;
pub use output::OutputReader;
pub use reorder::ReorderBuffer;
pub use runtime::FailureRecord;
pub use stats::PipelineStats;

pub(crate) use output::EgressSender;
