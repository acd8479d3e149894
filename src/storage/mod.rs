pub mod memory;

pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Key/value view of the mount's storage, as provided by the hosting
/// platform's storage driver.
///
/// Every operation is atomic at the key level; there are no transactions.
/// Keys are `/`-separated paths relative to the mount.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetch the value stored at `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `value` at `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove the value stored at `key`. Deleting a missing key is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List the entries directly under `prefix`, with the prefix stripped.
    /// Nested subtrees appear once as `<segment>/`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Fetch and JSON-decode the entry at `key`.
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
        None => Ok(None),
    }
}

/// JSON-encode `value` and store it at `key`.
pub async fn put_json<T: Serialize>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_vec(value)?;
    storage.put(key, raw).await
}
