//! Serializable modifier descriptions.

use super::{Bulkhead, Delay, Modifier, Retry, RetryPolicy, Throttle, Timeout};
use crate::envelope::Payload;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A modifier described by data, so a stage's stack can be loaded from JSON.
///
/// Fallback needs a function and has no data form.
///
/// ```json
/// [{"kind": "retry", "max_retries": 2}, {"kind": "timeout", "timeout_ms": 500}]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModifierSpec {
    /// See [`Retry`].
    Retry(RetryPolicy),
    /// See [`Timeout`].
    Timeout {
        /// Deadline in milliseconds.
        timeout_ms: u64,
    },
    /// See [`Delay`].
    Delay {
        /// Delay in milliseconds.
        delay_ms: u64,
    },
    /// See [`Bulkhead`].
    Bulkhead {
        /// Concurrent calls admitted.
        limit: usize,
    },
    /// See [`Throttle`].
    Throttle {
        /// Minimum spacing in milliseconds.
        interval_ms: u64,
    },
}

impl ModifierSpec {
    /// Builds a fresh modifier instance.
    ///
    /// Each call creates new state, so two stages built from the same
    /// description do not share a bulkhead or throttle.
    #[must_use]
    pub fn into_modifier<T: Payload>(self) -> Arc<dyn Modifier<T>> {
        match self {
            Self::Retry(policy) => Arc::new(Retry::from_policy(policy)),
            Self::Timeout { timeout_ms } => Arc::new(Timeout::from_millis(timeout_ms)),
            Self::Delay { delay_ms } => Arc::new(Delay::from_millis(delay_ms)),
            Self::Bulkhead { limit } => Arc::new(Bulkhead::new(limit)),
            Self::Throttle { interval_ms } => Arc::new(Throttle::from_millis(interval_ms)),
        }
    }

    /// Parses a JSON list of descriptions.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the JSON does not describe modifiers.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>, ConfigurationError> {
        serde_json::from_str(json)
            .map_err(|e| ConfigurationError::new(format!("invalid modifier list: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_modifier_list() {
        let specs = ModifierSpec::list_from_json(
            r#"[
                {"kind": "retry", "max_retries": 2, "backoff": "constant"},
                {"kind": "timeout", "timeout_ms": 250},
                {"kind": "bulkhead", "limit": 4},
                {"kind": "throttle", "interval_ms": 10},
                {"kind": "delay", "delay_ms": 0}
            ]"#,
        )
        .unwrap();

        assert_eq!(specs.len(), 5);
        assert_eq!(specs[1], ModifierSpec::Timeout { timeout_ms: 250 });
        match &specs[0] {
            ModifierSpec::Retry(policy) => {
                assert_eq!(policy.max_retries, 2);
                assert_eq!(policy.base_delay_ms, 100);
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_configuration_error() {
        let err = ModifierSpec::list_from_json(r#"[{"kind": "fallback"}]"#).unwrap_err();
        assert!(err.message.starts_with("invalid modifier list"));
    }

    #[test]
    fn test_into_modifier_names() {
        let names: Vec<_> = [
            ModifierSpec::Retry(RetryPolicy::default()),
            ModifierSpec::Timeout { timeout_ms: 1 },
            ModifierSpec::Bulkhead { limit: 0 },
        ]
        .into_iter()
        .map(|spec| spec.into_modifier::<i32>())
        .map(|m| (m.name(), m.validate().is_ok()))
        .collect();

        assert_eq!(names, vec![("retry", true), ("timeout", true), ("bulkhead", false)]);
    }
}
