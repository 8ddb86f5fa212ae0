//! Key-value storage reachable from transforms.

use super::Plugin;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Key-value contract for block storage backends.
///
/// Values are JSON so any backend can hold them; use the typed helpers on
/// [`StoragePlugin`] to work with concrete types.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockStorage: Send + Sync {
    /// Returns the value for `key`, if present.
    async fn try_get(&self, key: &str) -> Option<serde_json::Value>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: serde_json::Value);

    /// Removes `key`. Returns true if it was present.
    async fn remove(&self, key: &str) -> bool;

    /// Removes every key.
    async fn clear(&self);
}

/// Attaches a [`BlockStorage`] backend to a pipeline.
///
/// By default the storage is cleared when the pipeline is disposed.
pub struct StoragePlugin {
    storage: Arc<dyn BlockStorage>,
    clear_on_dispose: bool,
}

impl StoragePlugin {
    /// Wraps a storage backend.
    pub fn new(storage: Arc<dyn BlockStorage>) -> Self {
        Self {
            storage,
            clear_on_dispose: true,
        }
    }

    /// Keeps the stored data when the pipeline is disposed.
    #[must_use]
    pub fn retain_on_dispose(mut self) -> Self {
        self.clear_on_dispose = false;
        self
    }

    /// The underlying backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn BlockStorage> {
        &self.storage
    }

    /// Reads and deserializes a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not deserialize into `V`.
    pub async fn get_as<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, serde_json::Error> {
        self.storage
            .try_get(key)
            .await
            .map(serde_json::from_value)
            .transpose()
    }

    /// Serializes and stores a value.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub async fn set_as<V: Serialize + Sync>(&self, key: &str, value: &V) -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(value)?;
        self.storage.set(key, json).await;
        Ok(())
    }
}

impl std::fmt::Debug for StoragePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoragePlugin")
            .field("clear_on_dispose", &self.clear_on_dispose)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Plugin for StoragePlugin {
    fn name(&self) -> &str {
        "storage"
    }

    async fn on_dispose(&self) {
        if self.clear_on_dispose {
            debug!("Clearing block storage");
            self.storage.clear().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Checkpoint {
        offset: u64,
    }

    #[tokio::test]
    async fn test_get_as_deserializes() {
        let mut mock = MockBlockStorage::new();
        mock.expect_try_get()
            .with(eq("cp"))
            .returning(|_| Some(serde_json::json!({"offset": 12})));

        let plugin = StoragePlugin::new(Arc::new(mock));
        let cp: Option<Checkpoint> = plugin.get_as("cp").await.unwrap();
        assert_eq!(cp, Some(Checkpoint { offset: 12 }));
    }

    #[tokio::test]
    async fn test_get_as_type_mismatch() {
        let mut mock = MockBlockStorage::new();
        mock.expect_try_get()
            .returning(|_| Some(serde_json::json!("not an object")));

        let plugin = StoragePlugin::new(Arc::new(mock));
        assert!(plugin.get_as::<Checkpoint>("cp").await.is_err());
    }

    #[tokio::test]
    async fn test_set_as_serializes() {
        let mut mock = MockBlockStorage::new();
        mock.expect_set()
            .withf(|key, value| key == "cp" && value["offset"] == 3)
            .times(1)
            .return_const(());

        let plugin = StoragePlugin::new(Arc::new(mock));
        plugin.set_as("cp", &Checkpoint { offset: 3 }).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispose_clears_unless_retained() {
        let mut mock = MockBlockStorage::new();
        mock.expect_clear().times(1).return_const(());
        StoragePlugin::new(Arc::new(mock)).on_dispose().await;

        let mut mock = MockBlockStorage::new();
        mock.expect_clear().never();
        StoragePlugin::new(Arc::new(mock))
            .retain_on_dispose()
            .on_dispose()
            .await;
    }
}
