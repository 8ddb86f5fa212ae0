//! Type-keyed plugin registry.

use super::Plugin;
use crate::errors::ConfigurationError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    name: String,
    instance: Arc<dyn Any + Send + Sync>,
}

/// Holds at most one plugin per concrete type.
#[derive(Default)]
pub struct PluginRegistry {
    entries: HashMap<TypeId, Entry>,
    order: Vec<TypeId>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a plugin of the same type is present.
    pub fn insert<P: Plugin>(&mut self, plugin: Arc<P>) -> Result<(), ConfigurationError> {
        let key = TypeId::of::<P>();
        if self.entries.contains_key(&key) {
            return Err(ConfigurationError::new(format!(
                "plugin '{}' is already attached",
                plugin.name()
            )));
        }
        self.entries.insert(
            key,
            Entry {
                name: plugin.name().to_string(),
                instance: plugin,
            },
        );
        self.order.push(key);
        Ok(())
    }

    /// Returns the plugin of type `P`, if attached.
    #[must_use]
    pub fn get<P: Plugin>(&self) -> Option<Arc<P>> {
        self.entries
            .get(&TypeId::of::<P>())
            .and_then(|entry| entry.instance.clone().downcast::<P>().ok())
    }

    pub(crate) fn remove<P: Plugin>(&mut self) {
        let key = TypeId::of::<P>();
        self.entries.remove(&key);
        self.order.retain(|k| *k != key);
    }

    /// Names of attached plugins, in attach order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .map(|entry| entry.name.as_str())
            .collect()
    }

    /// Number of attached plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}
