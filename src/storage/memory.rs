use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Storage, StorageError};

/// In-memory [`Storage`] implementation.
///
/// Keys are kept ordered so `list` is a range scan, mirroring how the
/// platform's storage drivers behave. Useful for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        let mut results: Vec<String> = Vec::new();

        for key in entries.keys() {
            let Some(suffix) = key.strip_prefix(prefix) else {
                continue;
            };
            if suffix.is_empty() {
                continue;
            }

            // Collapse nested keys into a single `<segment>/` entry.
            let entry = match suffix.find('/') {
                Some(idx) => &suffix[..=idx],
                None => suffix,
            };
            if results.last().map(String::as_str) != Some(entry) {
                results.push(entry.to_string());
            }
        }

        Ok(results)
    }
}
