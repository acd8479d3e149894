use std::collections::HashMap;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::issuer::{IssuerError, IssuerId};
use crate::serial::{normalize_serial, serial_from_cert};
use crate::storage;

use super::assembly::find_revoked_cert_issuer;
use super::types::{CERTS_PREFIX, REVOKED_PREFIX, RevocationEntry};
use super::{CrlEngine, CrlError, CrlResult};

/// Outcome of a revocation request.
///
/// User-level problems are carried in `error` rather than bubbling up as
/// failures, so the API layer can turn them into 4xx responses. Benign
/// no-ops (tainted mount, lease races) produce an empty response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevokeResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_time_rfc3339: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RevokeResponse {
    fn noop() -> Self {
        Self::default()
    }

    fn error_response(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn with_warning(message: impl Into<String>) -> Self {
        Self {
            warnings: vec![message.into()],
            ..Self::default()
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.error.is_some()
    }
}

impl CrlEngine {
    /// Revoke the certificate with the given serial.
    ///
    /// `from_lease` marks revocations driven by lease expiry rather than an
    /// operator; several failure modes become silent successes there, since
    /// retrying the lease cleanup would never do better.
    pub async fn revoke(&self, serial: &str, from_lease: bool) -> CrlResult<RevokeResponse> {
        // A tainted mount's storage is about to be cleared wholesale; any
        // CRL written now would be blown away with it.
        if self.system.tainted() {
            return Ok(RevokeResponse::noop());
        }

        let issuer_ids = if !self.issuers.use_legacy_bundle_ca_storage() {
            match self.issuers.list_issuers().await {
                Ok(ids) => ids,
                Err(e) => {
                    return Ok(RevokeResponse::error_response(format!(
                        "could not fetch issuers list: {e}"
                    )));
                }
            }
        } else {
            vec![IssuerId::legacy_shim()]
        };

        // Refuse to put an issuer on its own CRL, and collect certificates
        // for the later parent association.
        let colon_serial = normalize_serial(serial);
        let mut issuer_certs: HashMap<IssuerId, Vec<u8>> = HashMap::with_capacity(issuer_ids.len());
        for issuer_id in &issuer_ids {
            let entry = match self.issuers.fetch_issuer(issuer_id).await {
                Ok(entry) => entry,
                Err(e @ IssuerError::NotFound(_)) => {
                    return Ok(RevokeResponse::error_response(format!(
                        "could not fetch the CA certificate for issuer id {issuer_id}: {e}"
                    )));
                }
                Err(e) => {
                    return Err(CrlError::internal(format!(
                        "error fetching CA certificate for issuer id {issuer_id}: {e}"
                    )));
                }
            };

            {
                let cert = entry.parse_certificate().map_err(|e| {
                    CrlError::internal(format!("stored CA certificate not able to be parsed: {e}"))
                })?;
                if colon_serial == serial_from_cert(&cert) {
                    return Ok(RevokeResponse::error_response(format!(
                        "adding issuer (id: {issuer_id}) to its own CRL is not allowed"
                    )));
                }
            }

            issuer_certs.insert(issuer_id.clone(), entry.certificate);
        }

        let revoked_key = format!("{REVOKED_PREFIX}{colon_serial}");
        let existing: Option<RevocationEntry> =
            storage::get_json(self.storage.as_ref(), &revoked_key)
                .await
                .map_err(|e| {
                    CrlError::internal(format!("error decoding existing revocation entry: {e}"))
                })?;

        let already_revoked = existing.is_some();
        let rev_info = match existing {
            Some(info) => {
                debug!(serial = %colon_serial, "certificate already revoked");
                info
            }
            None => {
                let cert_key = format!("{CERTS_PREFIX}{colon_serial}");
                let cert_bytes = self
                    .storage
                    .get(&cert_key)
                    .await?
                    .filter(|bytes| !bytes.is_empty());
                let Some(cert_bytes) = cert_bytes else {
                    if from_lease {
                        // Without the certificate there is nothing to put on
                        // the CRL, and a retry will not find it either. Let
                        // the lease be deleted.
                        warn!(
                            serial = %colon_serial,
                            "expired certificate revoke failed because not found in storage, treating as success"
                        );
                        return Ok(RevokeResponse::noop());
                    }
                    return Ok(RevokeResponse::error_response(format!(
                        "certificate with serial {serial} not found"
                    )));
                };

                let now = OffsetDateTime::now_utc();
                {
                    let (_, cert) = X509Certificate::from_der(&cert_bytes)
                        .map_err(|e| CrlError::internal(format!("error parsing certificate: {e}")))?;

                    // Leases are stored with second granularity; give the
                    // comparison a little wiggle room.
                    let cutoff = now + std::time::Duration::from_secs(2);
                    if cert.validity().not_after.timestamp() < cutoff.unix_timestamp() {
                        return Ok(RevokeResponse::with_warning(format!(
                            "certificate with serial {serial} already expired; refusing to add to CRL"
                        )));
                    }

                    // Historic CAs were issued leases; those must not be
                    // revoked when the lease runs out.
                    if cert.is_ca() && from_lease {
                        return Ok(RevokeResponse::noop());
                    }
                }

                let mut entry = RevocationEntry {
                    certificate_bytes: cert_bytes,
                    revocation_time: now.unix_timestamp(),
                    revocation_time_utc: Some(now),
                    certificate_issuer: None,
                };

                // The issuer may be unknown (already deleted); that's fine,
                // the build routes such entries to the default issuer.
                {
                    let (_, cert) = X509Certificate::from_der(&entry.certificate_bytes)
                        .map_err(|e| CrlError::internal(format!("error parsing certificate: {e}")))?;
                    entry.certificate_issuer = find_revoked_cert_issuer(
                        &cert,
                        issuer_certs.iter().map(|(id, der)| (id, der.as_slice())),
                    );
                }

                storage::put_json(self.storage.as_ref(), &revoked_key, &entry)
                    .await
                    .map_err(|e| {
                        CrlError::internal(format!(
                            "error saving revoked certificate to new location: {e}"
                        ))
                    })?;

                entry
            }
        };

        // When auto-rebuild is on, the revocation only lands on the CRL at
        // the scheduler's next pass.
        let config = self
            .config_with_update()
            .await
            .map_err(|e| CrlError::internal(format!("error building CRL: while updating config: {e}")))?;
        if !config.auto_rebuild {
            if let Err(e) = self.rebuild(false).await {
                if e.is_user_error() {
                    return Ok(RevokeResponse::error_response(format!(
                        "error during CRL building: {e}"
                    )));
                }
                return Err(CrlError::internal(format!(
                    "error encountered during CRL building: {e}"
                )));
            }
        }

        if already_revoked {
            debug!(serial = %colon_serial, "returning stored revocation times");
        }

        let mut response = RevokeResponse {
            revocation_time: Some(rev_info.revocation_time),
            ..RevokeResponse::default()
        };
        if let Some(utc) = rev_info.revocation_time_utc {
            let formatted = utc
                .format(&Rfc3339)
                .map_err(|e| CrlError::internal(format!("error formatting revocation time: {e}")))?;
            response.revocation_time_rfc3339 = Some(formatted);
        }

        Ok(response)
    }
}
