use std::sync::atomic::{AtomicBool, Ordering};

/// Replication role of the local node, as reported by the hosting cluster.
///
/// CRLs and the cluster-local CRL index are per-cluster state, so the check
/// deliberately ignores whether the wider replication group considers this
/// cluster a performance primary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationState {
    pub performance_standby: bool,
    pub dr_secondary: bool,
}

impl ReplicationState {
    /// Whether this node is permitted to write storage.
    pub fn can_write(self) -> bool {
        !self.performance_standby && !self.dr_secondary
    }
}

/// View of the hosting platform consumed by the CRL engine.
pub trait SystemView: Send + Sync {
    /// Current replication role of the local node.
    fn replication_state(&self) -> ReplicationState;

    /// True while the mount is being torn down. A tainted mount's storage
    /// is about to be cleared, so writes are pointless.
    fn tainted(&self) -> bool;
}

/// A [`SystemView`] backed by plain flags.
///
/// Suitable for single-node deployments and tests; clustered hosts wire in
/// their own oracle.
#[derive(Debug, Default)]
pub struct StaticSystemView {
    performance_standby: AtomicBool,
    dr_secondary: AtomicBool,
    tainted: AtomicBool,
}

impl StaticSystemView {
    /// An active, writable, untainted node.
    pub fn active() -> Self {
        Self::default()
    }

    pub fn set_performance_standby(&self, value: bool) {
        self.performance_standby.store(value, Ordering::SeqCst);
    }

    pub fn set_dr_secondary(&self, value: bool) {
        self.dr_secondary.store(value, Ordering::SeqCst);
    }

    pub fn set_tainted(&self, value: bool) {
        self.tainted.store(value, Ordering::SeqCst);
    }
}

impl SystemView for StaticSystemView {
    fn replication_state(&self) -> ReplicationState {
        ReplicationState {
            performance_standby: self.performance_standby.load(Ordering::SeqCst),
            dr_secondary: self.dr_secondary.load(Ordering::SeqCst),
        }
    }

    fn tainted(&self) -> bool {
        self.tainted.load(Ordering::SeqCst)
    }
}
