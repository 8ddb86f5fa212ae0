//! Pipeline plugins.
//!
//! A plugin is attached to one pipeline, at most one instance per concrete
//! type. The pipeline calls [`Plugin::on_attach`] when the plugin is added
//! and [`Plugin::on_dispose`] exactly once when the pipeline is disposed.
//! Transforms reach a plugin by capturing the `Arc` returned from
//! `Pipeline::plugin`.

mod registry;
mod storage;

pub use registry::PluginRegistry;
pub use storage::{BlockStorage, StoragePlugin};

#[cfg(test)]
pub use storage::MockBlockStorage;

use crate::errors::ConfigurationError;
use async_trait::async_trait;
use std::any::Any;

/// An extension attached to a pipeline.
#[async_trait]
pub trait Plugin: Any + Send + Sync {
    /// Name used in logs and in the disposal report.
    fn name(&self) -> &str;

    /// Called synchronously when the plugin is attached.
    ///
    /// `registry` already contains this plugin, so it can look up the
    /// plugins attached before it.
    ///
    /// # Errors
    ///
    /// An error rejects the plugin; it is removed from the registry.
    fn on_attach(&self, _registry: &PluginRegistry) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Called once when the pipeline is disposed.
    async fn on_dispose(&self) {}
}
