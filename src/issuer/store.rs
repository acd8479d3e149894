use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::{self, Storage};

use super::{
    IssuerEntry, IssuerError, IssuerId, IssuerUsage, IssuersConfig, KeyId, LEGACY_BUNDLE_SHIM_KEY_ID,
};

/// Storage prefix for issuer entries.
pub const ISSUER_PREFIX: &str = "config/issuer/";

/// Storage key for the mount-wide issuer configuration.
pub const ISSUERS_CONFIG_KEY: &str = "config/issuers";

/// Storage key of the pre-multi-issuer CA bundle.
pub const LEGACY_CA_BUNDLE_KEY: &str = "config/ca_bundle";

/// CA bundle layout used before the multi-issuer storage upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyCaBundle {
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// Read-oriented projection of the mount's issuers.
///
/// While the mount still runs on the legacy layout, the store exposes a
/// single synthetic issuer backed by the legacy CA bundle. The hosting
/// platform's migration watcher flips the mode once storage is upgraded.
pub struct IssuerStore {
    storage: Arc<dyn Storage>,
    legacy_bundle: AtomicBool,
}

impl IssuerStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            legacy_bundle: AtomicBool::new(false),
        }
    }

    /// Whether the mount still uses the single-CA legacy storage layout.
    pub fn use_legacy_bundle_ca_storage(&self) -> bool {
        self.legacy_bundle.load(Ordering::SeqCst)
    }

    pub fn set_legacy_bundle_ca_storage(&self, legacy: bool) {
        self.legacy_bundle.store(legacy, Ordering::SeqCst);
    }

    /// List the ids of all stored issuers.
    pub async fn list_issuers(&self) -> Result<Vec<IssuerId>, IssuerError> {
        let entries = self.storage.list(ISSUER_PREFIX).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.ends_with('/'))
            .map(IssuerId::new)
            .collect())
    }

    /// Fetch a single issuer entry.
    ///
    /// The legacy shim id resolves to an entry synthesized from the legacy
    /// CA bundle with full usage.
    pub async fn fetch_issuer(&self, id: &IssuerId) -> Result<IssuerEntry, IssuerError> {
        if id.is_legacy_shim() {
            let bundle: Option<LegacyCaBundle> =
                storage::get_json(self.storage.as_ref(), LEGACY_CA_BUNDLE_KEY).await?;
            let Some(bundle) = bundle else {
                return Err(IssuerError::NotFound(id.clone()));
            };

            return Ok(IssuerEntry {
                id: id.clone(),
                name: String::new(),
                key_id: KeyId::new(LEGACY_BUNDLE_SHIM_KEY_ID),
                certificate: bundle.certificate,
                private_key: bundle.private_key,
                usage: IssuerUsage::ALL,
                revoked: false,
                revocation_time_utc: None,
                revocation_sig_alg: None,
            });
        }

        let key = format!("{ISSUER_PREFIX}{id}");
        storage::get_json(self.storage.as_ref(), &key)
            .await?
            .ok_or_else(|| IssuerError::NotFound(id.clone()))
    }

    /// Fetch the mount-wide issuer configuration, defaulting when absent.
    pub async fn issuers_config(&self) -> Result<IssuersConfig, IssuerError> {
        let config: Option<IssuersConfig> =
            storage::get_json(self.storage.as_ref(), ISSUERS_CONFIG_KEY).await?;
        Ok(config.unwrap_or_default())
    }

    /// Persist an issuer entry. Issuer CRUD proper lives in the hosting
    /// platform; this is the storage codec it shares with the engine.
    pub async fn save_issuer(&self, entry: &IssuerEntry) -> Result<(), IssuerError> {
        let key = format!("{ISSUER_PREFIX}{}", entry.id);
        storage::put_json(self.storage.as_ref(), &key, entry).await?;
        Ok(())
    }

    /// Remove an issuer entry.
    pub async fn delete_issuer(&self, id: &IssuerId) -> Result<(), IssuerError> {
        debug!(issuer = %id, "deleting issuer entry");
        let key = format!("{ISSUER_PREFIX}{id}");
        self.storage.delete(&key).await?;
        Ok(())
    }

    /// Set or clear the default issuer.
    pub async fn set_default_issuer(&self, id: Option<IssuerId>) -> Result<(), IssuerError> {
        let config = IssuersConfig { default_issuer: id };
        storage::put_json(self.storage.as_ref(), ISSUERS_CONFIG_KEY, &config).await?;
        Ok(())
    }

    /// Persist the legacy CA bundle used while in legacy mode.
    pub async fn save_legacy_bundle(&self, bundle: &LegacyCaBundle) -> Result<(), IssuerError> {
        storage::put_json(self.storage.as_ref(), LEGACY_CA_BUNDLE_KEY, bundle).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn entry(id: &str) -> IssuerEntry {
        IssuerEntry {
            id: IssuerId::new(id),
            name: id.to_string(),
            key_id: KeyId::new("key-1"),
            certificate: vec![0x30],
            private_key: vec![0x30],
            usage: IssuerUsage::ALL,
            revoked: false,
            revocation_time_utc: None,
            revocation_sig_alg: None,
        }
    }

    #[tokio::test]
    async fn save_list_fetch_delete() {
        let store = IssuerStore::new(Arc::new(MemoryStorage::new()));

        store.save_issuer(&entry("a1")).await.unwrap();
        store.save_issuer(&entry("b2")).await.unwrap();

        let mut listed = store.list_issuers().await.unwrap();
        listed.sort();
        assert_eq!(listed, vec![IssuerId::new("a1"), IssuerId::new("b2")]);

        let fetched = store.fetch_issuer(&IssuerId::new("a1")).await.unwrap();
        assert_eq!(fetched.name, "a1");

        store.delete_issuer(&IssuerId::new("a1")).await.unwrap();
        assert!(matches!(
            store.fetch_issuer(&IssuerId::new("a1")).await,
            Err(IssuerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn issuers_config_defaults_when_absent() {
        let store = IssuerStore::new(Arc::new(MemoryStorage::new()));
        assert_eq!(store.issuers_config().await.unwrap().default_issuer, None);

        store
            .set_default_issuer(Some(IssuerId::new("a1")))
            .await
            .unwrap();
        assert_eq!(
            store.issuers_config().await.unwrap().default_issuer,
            Some(IssuerId::new("a1"))
        );
    }

    #[tokio::test]
    async fn legacy_shim_resolves_to_bundle() {
        let store = IssuerStore::new(Arc::new(MemoryStorage::new()));
        store.set_legacy_bundle_ca_storage(true);

        let shim = IssuerId::legacy_shim();
        assert!(matches!(
            store.fetch_issuer(&shim).await,
            Err(IssuerError::NotFound(_))
        ));

        let bundle = LegacyCaBundle {
            certificate: vec![1, 2, 3],
            private_key: vec![4, 5, 6],
        };
        store.save_legacy_bundle(&bundle).await.unwrap();

        let fetched = store.fetch_issuer(&shim).await.unwrap();
        assert_eq!(fetched.certificate, vec![1, 2, 3]);
        assert_eq!(fetched.key_id.as_str(), LEGACY_BUNDLE_SHIM_KEY_ID);
        assert!(fetched.can_sign_crls());
    }
}
