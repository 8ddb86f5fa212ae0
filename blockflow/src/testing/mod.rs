//! Testing utilities for blockflow pipelines.
//!
//! This module provides:
//! - Instrumented transforms (recording, failing, slow, concurrency probe)
//! - An in-memory [`BlockStorage`](crate::plugins::BlockStorage)
//! - A harness that writes, completes and collects in one call

mod assertions;
mod fixtures;
mod mocks;
mod storage;

pub use assertions::{assert_in_order, assert_same_elements};
pub use fixtures::{run_to_completion, PipelineRun};
pub use mocks::{ConcurrencyProbe, FailingTransform, RecordingTransform, SlowTransform};
pub use storage::InMemoryStorage;
