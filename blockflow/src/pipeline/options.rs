//! Pipeline options.

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options fixed when a pipeline is created.
///
/// Loadable from JSON; every field has a default.
///
/// ```
/// use blockflow::pipeline::PipelineOptions;
///
/// let options = PipelineOptions::from_json(r#"{"preserve_order": true, "reorder_max_buffer": 16}"#).unwrap();
/// assert!(options.preserve_order);
/// assert_eq!(options.default_channel_capacity, 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Name used in logs and events.
    pub name: String,
    /// Emit results in input order.
    pub preserve_order: bool,
    /// Maximum out-of-order results held while ordering; `None` is unbounded.
    pub reorder_max_buffer: Option<usize>,
    /// Input channel capacity for stages that do not set their own.
    pub default_channel_capacity: usize,
    /// Capacity of the output channel.
    pub output_capacity: usize,
    /// Total time allowed for disposal hooks.
    pub dispose_timeout_ms: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            name: "pipeline".to_string(),
            preserve_order: false,
            reorder_max_buffer: None,
            default_channel_capacity: 64,
            output_capacity: 64,
            dispose_timeout_ms: 5_000,
        }
    }
}

impl PipelineOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enables ordered output with an optional reorder bound.
    #[must_use]
    pub fn with_order(mut self, max_buffer: Option<usize>) -> Self {
        self.preserve_order = true;
        self.reorder_max_buffer = max_buffer;
        self
    }

    /// Sets the default stage channel capacity.
    #[must_use]
    pub fn with_default_channel_capacity(mut self, capacity: usize) -> Self {
        self.default_channel_capacity = capacity;
        self
    }

    /// Sets the output channel capacity.
    #[must_use]
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Sets the disposal timeout.
    #[must_use]
    pub fn with_dispose_timeout_ms(mut self, timeout: u64) -> Self {
        self.dispose_timeout_ms = timeout;
        self
    }

    /// Parses options from JSON.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| ConfigurationError::new(format!("invalid pipeline options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// Checks channel capacities.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.default_channel_capacity == 0 {
            return Err(ConfigurationError::new("default_channel_capacity must be at least 1"));
        }
        if self.output_capacity == 0 {
            return Err(ConfigurationError::new("output_capacity must be at least 1"));
        }
        Ok(())
    }

    /// The disposal timeout as a duration.
    #[must_use]
    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PipelineOptions::default();
        assert!(!options.preserve_order);
        assert_eq!(options.reorder_max_buffer, None);
        assert_eq!(options.output_capacity, 64);
        assert_eq!(options.dispose_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_builders() {
        let options = PipelineOptions::new()
            .with_name("ingest")
            .with_order(Some(8))
            .with_default_channel_capacity(4);
        assert_eq!(options.name, "ingest");
        assert!(options.preserve_order);
        assert_eq!(options.reorder_max_buffer, Some(8));
        assert_eq!(options.default_channel_capacity, 4);
    }

    #[test]
    fn test_zero_capacity_rejected_from_json() {
        let err = PipelineOptions::from_json(r#"{"output_capacity": 0}"#).unwrap_err();
        assert!(err.message.contains("output_capacity"));
        assert!(PipelineOptions::from_json("not json").is_err());
    }
}
