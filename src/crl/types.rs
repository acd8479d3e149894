use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::issuer::IssuerId;

/// Storage prefix for revocation entries, keyed by canonical serial.
pub const REVOKED_PREFIX: &str = "revoked/";

/// Storage prefix for issued certificates, keyed by canonical serial.
pub const CERTS_PREFIX: &str = "certs/";

/// Storage prefix for signed CRL blobs, keyed by CRL id.
pub const CRL_PREFIX: &str = "crls/";

/// Storage key of the revocation configuration.
pub const CRL_CONFIG_KEY: &str = "config/crl";

/// Storage key of the cluster-local CRL index singleton.
pub const LOCAL_CRL_INDEX_KEY: &str = "crls/config";

/// Fixed storage key of the single CRL written in legacy mode.
pub const LEGACY_CRL_KEY: &str = "crl";

/// Opaque name of a persisted CRL, decoupled from issuer ids so the blob
/// survives issuer churn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrlId(String);

impl CrlId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CrlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CrlId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A recorded revocation, persisted at `revoked/<canonical-serial>`.
///
/// Entries are immutable once written except that `issuer_id` may be filled
/// in later, when a build manages to associate the certificate with one of
/// the known issuers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationEntry {
    pub certificate_bytes: Vec<u8>,
    pub revocation_time: i64,
    /// Absent on entries written before UTC timestamps were recorded.
    #[serde(default)]
    pub revocation_time_utc: Option<OffsetDateTime>,
    #[serde(rename = "issuer_id", default)]
    pub certificate_issuer: Option<IssuerId>,
}

/// Cluster-local CRL bookkeeping, persisted as a singleton.
///
/// `crl_number_map` and `crl_expiration_map` are deliberately never pruned
/// when a CRL id loses its last issuer: if the id were ever reused, a fresh
/// number sequence could move backwards. Only the CRL blob itself is
/// deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalCrlIndex {
    /// Many-to-one mapping of issuers onto their shared CRL.
    #[serde(default)]
    pub issuer_crl_map: HashMap<IssuerId, CrlId>,
    /// Strictly increasing CRL number per CRL id; gaps are fine.
    #[serde(default)]
    pub crl_number_map: HashMap<CrlId, u64>,
    /// Next-update time per CRL id; `None` marks a CRL written while
    /// building was disabled.
    #[serde(default)]
    pub crl_expiration_map: HashMap<CrlId, Option<OffsetDateTime>>,
}
