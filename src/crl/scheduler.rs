use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error};

use super::{CrlEngine, CrlResult};

/// How often the scheduler checks whether CRLs need rebuilding.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic driver of deferred CRL rebuilds.
///
/// With auto-rebuild enabled, revocations only raise the force flag; this
/// task drains it. It also picks up rebuild requests scheduled by storage
/// invalidations.
pub struct RebuildScheduler {
    engine: Arc<CrlEngine>,
    period: Duration,
}

impl RebuildScheduler {
    pub fn new(engine: Arc<CrlEngine>) -> Self {
        Self::with_period(engine, DEFAULT_CHECK_INTERVAL)
    }

    pub fn with_period(engine: Arc<CrlEngine>, period: Duration) -> Self {
        Self { engine, period }
    }

    /// One scheduler pass: raise the force flag if any CRL is inside its
    /// grace window, then drain the flag if set.
    pub async fn run_once(&self) -> CrlResult<()> {
        self.engine.check_for_auto_rebuild().await?;
        self.engine.rebuild_if_forced().await
    }

    /// Start the periodic task. Aborting the returned handle stops it, for
    /// example on mount unload.
    pub fn start(self) -> JoinHandle<()> {
        debug!(period_secs = self.period.as_secs(), "starting CRL rebuild scheduler");

        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.tick().await; // First tick completes immediately

            loop {
                ticker.tick().await;

                // Only the active node may write CRLs; standby nodes keep
                // ticking and pick up once promoted.
                if !self.engine.system().replication_state().can_write() {
                    debug!("skipping CRL rebuild check, not on active node");
                    continue;
                }

                if let Err(e) = self.run_once().await {
                    error!("scheduled CRL rebuild check failed: {e}");
                }
            }
        })
    }
}
