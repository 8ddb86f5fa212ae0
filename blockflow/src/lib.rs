//! # Blockflow
//!
//! Composable asynchronous multi-stage processing pipelines.
//!
//! A pipeline is a linear chain of stages connected by bounded channels.
//! Each stage applies a [`Transform`](stages::Transform) through a pool of
//! workers, optionally wrapped in modifiers:
//!
//! - **Resilience**: retry with backoff, timeout, fallback substitution
//! - **Pacing**: fixed delay, throttling, bulkhead admission limits
//! - **Ordering**: results in input order through a bounded reorder buffer
//! - **Branching**: predicate dispatch between two transforms in one stage
//! - **Lifecycle**: plugins and disposal hooks run exactly once on teardown
//!
//! ## Quick Start
//!
//! ```
//! use blockflow::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> blockflow::Result<()> {
//! let mut pipeline = Pipeline::ordered(Some(64));
//! pipeline
//!     .add_stage(
//!         StageConfig::map(|v: u32| v + 1)
//!             .with_name("increment")
//!             .with_concurrency(4)
//!             .with_modifier(Timeout::new(Duration::from_secs(1))),
//!     )?
//!     .branch_if(
//!         |v: &u32| v % 2 == 0,
//!         StageConfig::map(|v: u32| v / 2),
//!         None,
//!     )?;
//!
//! let output = pipeline.build()?;
//! let reader = tokio::spawn(output.collect_all());
//!
//! let token = CancellationToken::new();
//! for v in 0..5 {
//!     pipeline.write(v, &token).await?;
//! }
//! pipeline.complete().await?;
//!
//! assert_eq!(reader.await.unwrap()?, vec![1, 1, 3, 2, 5]);
//! pipeline.dispose().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod modifiers;
pub mod observability;
pub mod pipeline;
pub mod plugins;
pub mod stages;
pub mod testing;

pub use errors::{PipelineError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::context::{Branch, CallContext};
    pub use crate::envelope::{Envelope, Payload};
    pub use crate::errors::{
        ConfigurationError, OverflowError, PipelineError, ProcessingError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::modifiers::{
        Bulkhead, Delay, Fallback, Modifier, ModifierSpec, Retry, RetryPolicy, Throttle,
        Timeout,
    };
    pub use crate::pipeline::{OutputReader, Pipeline, PipelineOptions, PipelineState};
    pub use crate::plugins::{BlockStorage, Plugin, PluginRegistry, StoragePlugin};
    pub use crate::stages::{StageConfig, Transform};
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[tokio::test]
    async fn test_prelude_covers_a_full_run() {
        let mut pipeline = Pipeline::new(PipelineOptions::new().with_name("prelude"));
        pipeline
            .add_stage(StageConfig::map(|v: i64| v - 1).with_modifier(Retry::new(1)))
            .unwrap();
        let output = pipeline.build().unwrap();

        pipeline.write(10, &CancellationToken::new()).await.unwrap();
        pipeline.complete().await.unwrap();

        assert_eq!(output.collect_all().await.unwrap(), vec![9]);
        assert_eq!(pipeline.name(), "prelude");
    }
}
