mod assembly;
mod error;
mod revoke;
mod scheduler;
mod state;
mod types;

pub use error::{CrlError, CrlResult};
pub use revoke::RevokeResponse;
pub use scheduler::{DEFAULT_CHECK_INTERVAL, RebuildScheduler};
pub use types::{
    CERTS_PREFIX, CRL_CONFIG_KEY, CRL_PREFIX, CrlId, LEGACY_CRL_KEY, LOCAL_CRL_INDEX_KEY,
    LocalCrlIndex, REVOKED_PREFIX, RevocationEntry,
};

use std::sync::Arc;

use crate::cluster::SystemView;
use crate::issuer::IssuerStore;
use crate::storage::Storage;

use state::CrlBuilderState;

/// Gatekeeper for all reads and writes of CRL state.
///
/// Secondary cluster nodes observe storage writes without the API calls
/// that caused them, and lack the state to rebuild CRLs during
/// invalidation. Rebuilds are therefore scheduled through a force flag that
/// the next local read or write drains, while the revocation configuration
/// is cached behind a dirty flag and reloaded on demand.
///
/// One engine exists per mount; construct it at mount activation and drop
/// it on unload.
pub struct CrlEngine {
    storage: Arc<dyn Storage>,
    issuers: Arc<IssuerStore>,
    system: Arc<dyn SystemView>,
    state: CrlBuilderState,
}

impl CrlEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        issuers: Arc<IssuerStore>,
        system: Arc<dyn SystemView>,
    ) -> Self {
        Self {
            storage,
            issuers,
            system,
            state: CrlBuilderState::default(),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn issuers(&self) -> &IssuerStore {
        &self.issuers
    }

    pub fn system(&self) -> &dyn SystemView {
        self.system.as_ref()
    }
}
