use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Compiled-in CRL validity period.
pub const DEFAULT_CRL_EXPIRY: &str = "72h";

/// Compiled-in window before `next_update` in which the auto-rebuilder
/// refreshes a CRL.
pub const DEFAULT_AUTO_REBUILD_GRACE_PERIOD: &str = "12h";

/// Revocation configuration, persisted as JSON at `config/crl`.
///
/// Durations are stored as humane strings and parsed lazily so that a
/// malformed value written by an older version degrades instead of
/// poisoning the whole config entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrlConfig {
    /// Validity period added to `this_update` to derive `next_update`.
    pub expiry: String,
    /// When set, CRLs are never rebuilt; existing CRL bytes stay frozen.
    pub disable: bool,
    /// When set, rebuilds are deferred to the periodic scheduler instead of
    /// running synchronously on each revocation.
    pub auto_rebuild: bool,
    /// How long before a CRL's `next_update` the scheduler starts rebuilding.
    pub auto_rebuild_grace_period: String,
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self {
            expiry: DEFAULT_CRL_EXPIRY.to_string(),
            disable: false,
            auto_rebuild: false,
            auto_rebuild_grace_period: DEFAULT_AUTO_REBUILD_GRACE_PERIOD.to_string(),
        }
    }
}

impl CrlConfig {
    /// Parse the configured CRL validity period.
    pub fn expiry_duration(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.expiry)
    }

    /// Parse the auto-rebuild grace period, falling back to the compiled-in
    /// default when the configured value does not parse.
    pub fn auto_rebuild_grace(&self) -> Result<Duration, humantime::DurationError> {
        match humantime::parse_duration(&self.auto_rebuild_grace_period) {
            Ok(period) => Ok(period),
            Err(_) => humantime::parse_duration(DEFAULT_AUTO_REBUILD_GRACE_PERIOD),
        }
    }
}
