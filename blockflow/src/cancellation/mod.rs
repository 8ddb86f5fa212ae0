//! Cancellation and disposal utilities.
//!
//! This module provides:
//! - CancellationToken for cooperative, linkable cancellation
//! - ResourceRegistry for exactly-once disposal hooks

mod resources;
mod token;

pub use resources::{DisposeHook, DisposeReport, ResourceRegistry};
pub use token::CancellationToken;
