use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::CrlConfig;
use crate::storage;

use super::types::{CRL_CONFIG_KEY, CRL_PREFIX, LEGACY_CRL_KEY, LOCAL_CRL_INDEX_KEY, LocalCrlIndex};
use super::{CrlEngine, CrlError, CrlResult};

/// Mutable builder state shared by every caller of the engine.
///
/// The dirty and force flags are atomics rather than channels because their
/// producers (invalidation callbacks, writers, the scheduler) are many,
/// uncoordinated, and must never block on an in-flight build.
pub(crate) struct CrlBuilderState {
    /// Serializes CRL assembly; held for the whole of a build.
    build_lock: Mutex<()>,
    /// One-shot request for the next reader or writer to rebuild; CAS'd
    /// between 0 and 1.
    force_rebuild: AtomicU32,
    /// Cached revocation configuration; snapshots are handed to callers.
    config: RwLock<CrlConfig>,
    /// Set when the stored configuration may be newer than the cache.
    dirty: AtomicBool,
}

impl Default for CrlBuilderState {
    fn default() -> Self {
        // Starting dirty makes the first operation load the stored config.
        Self {
            build_lock: Mutex::new(()),
            force_rebuild: AtomicU32::new(0),
            config: RwLock::new(CrlConfig::default()),
            dirty: AtomicBool::new(true),
        }
    }
}

impl CrlEngine {
    /// Note that the stored revocation configuration may have changed
    /// behind our back. Called from storage invalidation, so it must not
    /// block.
    pub fn mark_config_dirty(&self) {
        self.state.dirty.store(true, Ordering::SeqCst);
    }

    /// Reload the cached configuration from storage if it has been marked
    /// dirty. The hot path is a single atomic load; the cold path upgrades
    /// to the write lock and re-checks before fetching.
    pub async fn reload_config_if_required(&self) -> CrlResult<()> {
        if !self.state.dirty.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut config = self.state.config.write().await;
        if !self.state.dirty.load(Ordering::SeqCst) {
            // Someone else reloaded while we waited for the lock.
            return Ok(());
        }

        let stored: Option<CrlConfig> =
            storage::get_json(self.storage.as_ref(), CRL_CONFIG_KEY).await?;
        *config = stored.unwrap_or_default();
        self.state.dirty.store(false, Ordering::SeqCst);

        Ok(())
    }

    /// Return a snapshot of the current configuration, reloading it first
    /// when dirty.
    pub async fn config_with_update(&self) -> CrlResult<CrlConfig> {
        self.reload_config_if_required().await?;
        Ok(self.state.config.read().await.clone())
    }

    /// Schedule a rebuild for the next read or write, but only on the
    /// active node; standby and DR-secondary nodes cannot write the CRL.
    pub fn request_rebuild_if_active_node(&self) {
        if !self.system.replication_state().can_write() {
            debug!("ignoring request to schedule a CRL rebuild, not on active node");
            return;
        }

        info!("scheduling CRL rebuild");
        // Losing the race to another requester is fine, the flag is already up.
        let _ = self
            .state
            .force_rebuild
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// React to an external storage invalidation for `key`.
    ///
    /// Replicated writes arrive without the API calls that caused them, and
    /// the invalidation callback lacks the state to rebuild CRLs in place;
    /// it only flags the work for the next local operation.
    pub fn handle_storage_invalidation(&self, key: &str) {
        if key == CRL_CONFIG_KEY {
            self.mark_config_dirty();
            self.request_rebuild_if_active_node();
        } else if key == LEGACY_CRL_KEY || key.starts_with(CRL_PREFIX) {
            self.request_rebuild_if_active_node();
        }
    }

    /// Raise the force flag when any CRL is missing, unaccounted for, or
    /// inside its auto-rebuild grace window.
    pub async fn check_for_auto_rebuild(&self) -> CrlResult<()> {
        let config = self.config_with_update().await?;
        if config.disable
            || !config.auto_rebuild
            || self.state.force_rebuild.load(Ordering::SeqCst) == 1
        {
            // Not enabled, not auto-rebuilding, or already scheduled; no
            // point interrogating CRL expirations.
            return Ok(());
        }

        let index: Option<LocalCrlIndex> =
            storage::get_json(self.storage.as_ref(), LOCAL_CRL_INDEX_KEY)
                .await
                .map_err(|e| {
                    CrlError::internal(format!(
                        "error checking for auto-rebuild status: unable to fetch cluster-local CRL state: {e}"
                    ))
                })?;

        // Without expiration bookkeeping, assume a rebuild is needed to
        // produce it.
        let Some(index) = index else {
            self.raise_force_rebuild();
            return Ok(());
        };
        if index.crl_expiration_map.is_empty() {
            self.raise_force_rebuild();
            return Ok(());
        }

        let grace = config.auto_rebuild_grace().map_err(|e| {
            CrlError::internal(format!(
                "error checking for auto-rebuild status: unable to parse grace period {:?}: {e}",
                config.auto_rebuild_grace_period
            ))
        })?;

        let now = OffsetDateTime::now_utc();
        for next_update in index.crl_expiration_map.values() {
            match next_update {
                None => {
                    self.raise_force_rebuild();
                    return Ok(());
                }
                Some(next_update) if now > *next_update - grace => {
                    self.raise_force_rebuild();
                    return Ok(());
                }
                Some(_) => {}
            }
        }

        Ok(())
    }

    /// Run a rebuild now if one has been requested via the force flag.
    /// Meant for readers and periodic callers.
    pub async fn rebuild_if_forced(&self) -> CrlResult<()> {
        if self.state.force_rebuild.load(Ordering::SeqCst) == 1 {
            return self.do_rebuild(true, false).await;
        }

        Ok(())
    }

    /// Run a full rebuild unconditionally. Meant for write paths that know
    /// the CRL has changed.
    pub async fn rebuild(&self, force_new: bool) -> CrlResult<()> {
        self.do_rebuild(force_new, true).await
    }

    async fn do_rebuild(&self, force_new: bool, ignore_force_flag: bool) -> CrlResult<()> {
        let _guard = self.state.build_lock.lock().await;

        // Re-read the flag now that we hold the lock; another builder may
        // have drained it while we waited.
        let force_flag = self.state.force_rebuild.load(Ordering::SeqCst);
        if force_flag == 1 || ignore_force_flag {
            // Clear the flag before building, not after. A revocation that
            // lands mid-build re-raises it and costs one extra rebuild; a
            // clear after completion could swallow that revocation entirely.
            let _ = self
                .state
                .force_rebuild
                .compare_exchange(1, 0, Ordering::SeqCst, Ordering::SeqCst);

            // An explicit force request always implies a complete rebuild.
            let force_new = force_flag == 1 || force_new;
            return self.build_crls(force_new).await;
        }

        Ok(())
    }

    pub(crate) fn raise_force_rebuild(&self) {
        let _ = self
            .state
            .force_rebuild
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn force_rebuild_flag(&self) -> u32 {
        self.state.force_rebuild.load(Ordering::SeqCst)
    }
}
