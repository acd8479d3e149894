use std::collections::HashMap;

use rcgen::{CertificateRevocationListParams, KeyIdMethod, RevokedCertParams, SerialNumber};
use time::OffsetDateTime;
use tracing::debug;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::config::CrlConfig;
use crate::issuer::{IssuerEntry, IssuerId, KeyId};
use crate::serial::serial_from_cert;
use crate::storage;

use super::types::{
    CRL_PREFIX, CrlId, LEGACY_CRL_KEY, LOCAL_CRL_INDEX_KEY, LocalCrlIndex, REVOKED_PREFIX,
    RevocationEntry,
};
use super::{CrlEngine, CrlError, CrlResult};

/// Find the issuer that signed `cert` by name comparison plus trial
/// signature verification.
pub(crate) fn find_revoked_cert_issuer<'a, I>(
    cert: &X509Certificate<'_>,
    issuers: I,
) -> Option<IssuerId>
where
    I: IntoIterator<Item = (&'a IssuerId, &'a [u8])>,
{
    for (issuer_id, issuer_der) in issuers {
        let Ok((_, issuer_cert)) = X509Certificate::from_der(issuer_der) else {
            continue;
        };

        if cert.tbs_certificate.issuer.as_raw() == issuer_cert.tbs_certificate.subject.as_raw()
            && cert
                .verify_signature(Some(issuer_cert.public_key()))
                .is_ok()
        {
            return Some(issuer_id.clone());
        }
    }

    None
}

impl CrlEngine {
    /// Rebuild every CRL.
    ///
    /// Any two issuers sharing key and subject are functionally equivalent
    /// and share one CRL. The issuer designated as default additionally
    /// publishes revoked certificates whose issuer is unknown or deleted,
    /// so certificates keep appearing on a CRL even as issuers come and go.
    pub(crate) async fn build_crls(&self, force_new: bool) -> CrlResult<()> {
        let config = self
            .config_with_update()
            .await
            .map_err(|e| CrlError::internal(format!("error building CRLs: while updating config: {e}")))?;

        if config.disable && !force_new {
            // While disabled, one long-lived empty CRL is left in place
            // rather than being re-signed with fresher validity windows.
            return Ok(());
        }

        let (issuer_ids, was_legacy) = if !self.issuers.use_legacy_bundle_ca_storage() {
            let ids = self.issuers.list_issuers().await.map_err(|e| {
                CrlError::internal(format!("error building CRLs: while listing issuers: {e}"))
            })?;
            (ids, false)
        } else {
            (vec![IssuerId::legacy_shim()], true)
        };

        let issuers_config = self.issuers.issuers_config().await.map_err(|e| {
            CrlError::internal(format!("error building CRLs: while getting the default issuer: {e}"))
        })?;

        // Group issuers into equivalence classes keyed on (key id, raw
        // subject); every non-empty cell shares a single CRL.
        let mut issuer_entries: HashMap<IssuerId, IssuerEntry> =
            HashMap::with_capacity(issuer_ids.len());
        let mut key_subject_issuers: HashMap<KeyId, HashMap<Vec<u8>, Vec<IssuerId>>> =
            HashMap::new();
        for issuer_id in &issuer_ids {
            let entry = self.issuers.fetch_issuer(issuer_id).await.map_err(|e| {
                CrlError::internal(format!(
                    "error building CRLs: unable to fetch specified issuer ({issuer_id}): {e}"
                ))
            })?;

            if entry.key_id.is_empty() {
                continue;
            }
            if !entry.can_sign_crls() {
                debug!(issuer = %issuer_id, "skipping issuer not enabled for CRL signing");
                continue;
            }

            let subject = {
                let cert = entry.parse_certificate().map_err(|e| {
                    CrlError::internal(format!(
                        "error building CRLs: unable to parse issuer ({issuer_id})'s certificate: {e}"
                    ))
                })?;
                cert.tbs_certificate.subject.as_raw().to_vec()
            };

            key_subject_issuers
                .entry(entry.key_id.clone())
                .or_default()
                .entry(subject)
                .or_default()
                .push(issuer_id.clone());
            issuer_entries.insert(issuer_id.clone(), entry);
        }

        let mut index: LocalCrlIndex =
            storage::get_json(self.storage.as_ref(), LOCAL_CRL_INDEX_KEY)
                .await
                .map_err(|e| {
                    CrlError::internal(format!(
                        "error building CRLs: unable to fetch cluster-local CRL state: {e}"
                    ))
                })?
                .unwrap_or_default();

        let (unassigned, mut revoked_by_issuer) =
            self.load_revoked_cert_entries(&issuer_entries).await?;
        let mut unassigned = Some(unassigned);

        augment_with_revoked_issuers(&issuer_entries, &mut revoked_by_issuer)?;

        for subject_map in key_subject_issuers.values() {
            for members in subject_map.values() {
                if members.is_empty() {
                    continue;
                }

                let mut revoked: Vec<RevokedCertParams> = Vec::new();
                let mut representative = &members[0];
                let mut chosen_crl_id: Option<(CrlId, IssuerId)> = None;
                for member in members {
                    if Some(member) == issuers_config.default_issuer.as_ref() {
                        // The default issuer absorbs the pool of revoked
                        // certificates no known issuer accounts for.
                        if let Some(pool) = unassigned.take() {
                            revoked.extend(pool);
                        }
                        representative = member;
                    }

                    if let Some(mut list) = revoked_by_issuer.remove(member) {
                        revoked.append(&mut list);
                    }

                    if let Some(existing) = index.issuer_crl_map.get(member).cloned() {
                        match &chosen_crl_id {
                            Some((chosen, holder)) => {
                                if *chosen != existing {
                                    return Err(CrlError::internal(format!(
                                        "error building CRLs: two issuers with same keys/subjects ({member} vs {holder}) have different internal CRL IDs: {existing} vs {chosen}"
                                    )));
                                }
                            }
                            None => chosen_crl_id = Some((existing, member.clone())),
                        }
                    }
                }

                let crl_id = match chosen_crl_id {
                    Some((id, _)) => id,
                    None => {
                        let id = CrlId::generate();
                        index.crl_number_map.insert(id.clone(), 1);
                        id
                    }
                };

                for member in members {
                    index.issuer_crl_map.insert(member.clone(), crl_id.clone());
                }

                // Always advance the number: duplicates are forbidden, gaps
                // are fine.
                let number = index.crl_number_map.entry(crl_id.clone()).or_insert(1);
                let crl_number = *number;
                *number += 1;

                let entry = issuer_entries.get(representative).ok_or_else(|| {
                    CrlError::internal(format!(
                        "error building CRLs: missing entry for issuer {representative}"
                    ))
                })?;

                let next_update = self
                    .build_crl(&config, force_new, entry, revoked, &crl_id, crl_number, was_legacy)
                    .await
                    .map_err(|e| match e {
                        CrlError::User(_) => e,
                        other => CrlError::internal(format!(
                            "error building CRLs: unable to build CRL for issuer ({representative}): {other}"
                        )),
                    })?;

                index.crl_expiration_map.insert(crl_id, next_update);
            }
        }

        if let Some(pool) = &unassigned
            && !pool.is_empty()
        {
            debug!(
                orphaned = pool.len(),
                "no default issuer configured; unattributed revoked certificates not published"
            );
        }

        // Drop mappings for issuers that no longer exist, then delete CRL
        // blobs nothing references anymore. Number and expiration history
        // stay: a reused CRL id must never restart its sequence.
        index
            .issuer_crl_map
            .retain(|issuer_id, _| issuer_ids.contains(issuer_id));
        for crl_id in index.crl_number_map.keys() {
            if !index.issuer_crl_map.values().any(|mapped| mapped == crl_id) {
                self.storage
                    .delete(&format!("{CRL_PREFIX}{crl_id}"))
                    .await
                    .map_err(|e| {
                        CrlError::internal(format!(
                            "error building CRLs: unable to clean up deleted issuers' CRL: {e}"
                        ))
                    })?;
            }
        }

        // The legacy layout predates the index; the legacy CRL is the only
        // state written in that mode.
        if !was_legacy {
            storage::put_json(self.storage.as_ref(), LOCAL_CRL_INDEX_KEY, &index)
                .await
                .map_err(|e| {
                    CrlError::internal(format!(
                        "error building CRLs: unable to persist updated cluster-local CRL state: {e}"
                    ))
                })?;
        }

        Ok(())
    }

    /// Load every revocation entry and route it to the issuer that signed
    /// it, or to the unassigned pool when no known issuer matches.
    async fn load_revoked_cert_entries(
        &self,
        issuer_entries: &HashMap<IssuerId, IssuerEntry>,
    ) -> CrlResult<(Vec<RevokedCertParams>, HashMap<IssuerId, Vec<RevokedCertParams>>)> {
        let mut unassigned: Vec<RevokedCertParams> = Vec::new();
        let mut revoked_by_issuer: HashMap<IssuerId, Vec<RevokedCertParams>> = HashMap::new();

        let serials = self.storage.list(REVOKED_PREFIX).await.map_err(|e| {
            CrlError::internal(format!("error fetching list of revoked certs: {e}"))
        })?;

        // Issuer serial -> certificate DER, to keep issuers off their own
        // CRLs; revoked issuers are published canonically via
        // augment_with_revoked_issuers instead, which also avoids duplicate
        // serials from the two paths.
        let mut issuer_serial_certs: HashMap<String, Vec<&[u8]>> =
            HashMap::with_capacity(issuer_entries.len());
        for entry in issuer_entries.values() {
            let cert = entry.parse_certificate()?;
            issuer_serial_certs
                .entry(serial_from_cert(&cert))
                .or_default()
                .push(entry.certificate.as_slice());
        }

        for serial in serials {
            let key = format!("{REVOKED_PREFIX}{serial}");
            let raw = self
                .storage
                .get(&key)
                .await
                .map_err(|e| {
                    CrlError::internal(format!(
                        "unable to fetch revoked cert with serial {serial}: {e}"
                    ))
                })?
                .filter(|bytes| !bytes.is_empty());
            let Some(raw) = raw else {
                return Err(CrlError::internal(format!(
                    "revoked certificate entry for serial {serial} is missing or empty"
                )));
            };

            let mut rev_info: RevocationEntry = serde_json::from_slice(&raw).map_err(|e| {
                CrlError::internal(format!(
                    "error decoding revocation entry for serial {serial}: {e}"
                ))
            })?;

            let (_, revoked_cert) = X509Certificate::from_der(&rev_info.certificate_bytes)
                .map_err(|e| {
                    CrlError::internal(format!(
                        "unable to parse stored revoked certificate with serial {serial}: {e}"
                    ))
                })?;

            if let Some(candidates) = issuer_serial_certs.get(&serial_from_cert(&revoked_cert))
                && candidates
                    .iter()
                    .any(|der| *der == rev_info.certificate_bytes.as_slice())
            {
                continue;
            }

            // CRLs must encode UTC revocation times; entries from before
            // UTC timestamps were recorded fall back to the Unix seconds.
            let revocation_time = match rev_info.revocation_time_utc {
                Some(utc) => utc,
                None => OffsetDateTime::from_unix_timestamp(rev_info.revocation_time).map_err(
                    |e| {
                        CrlError::internal(format!(
                            "invalid revocation time on entry for serial {serial}: {e}"
                        ))
                    },
                )?,
            };
            let revoked_params = RevokedCertParams {
                serial_number: SerialNumber::from(
                    revoked_cert.tbs_certificate.serial.to_bytes_be(),
                ),
                revocation_time,
                reason_code: None,
                invalidity_date: None,
            };

            // A recorded issuer id wins as long as that issuer still
            // exists; otherwise fall through and re-associate.
            if let Some(issuer_id) = &rev_info.certificate_issuer
                && issuer_entries.contains_key(issuer_id)
            {
                revoked_by_issuer
                    .entry(issuer_id.clone())
                    .or_default()
                    .push(revoked_params);
                continue;
            }

            match find_revoked_cert_issuer(
                &revoked_cert,
                issuer_entries.iter().map(|(id, e)| (id, e.certificate.as_slice())),
            ) {
                Some(issuer_id) => {
                    rev_info.certificate_issuer = Some(issuer_id.clone());

                    // Persist the discovered association so future builds
                    // skip the signature scan for this entry.
                    storage::put_json(self.storage.as_ref(), &key, &rev_info)
                        .await
                        .map_err(|e| {
                            CrlError::internal(format!(
                                "error updating revoked certificate at existing location {serial}: {e}"
                            ))
                        })?;

                    revoked_by_issuer
                        .entry(issuer_id)
                        .or_default()
                        .push(revoked_params);
                }
                None => unassigned.push(revoked_params),
            }
        }

        Ok((unassigned, revoked_by_issuer))
    }

    /// Sign and persist one CRL for an equivalence class, returning its
    /// next-update time (`None` when building is disabled).
    #[allow(clippy::too_many_arguments)]
    async fn build_crl(
        &self,
        config: &CrlConfig,
        force_new: bool,
        issuer: &IssuerEntry,
        revoked: Vec<RevokedCertParams>,
        crl_id: &CrlId,
        crl_number: u64,
        was_legacy: bool,
    ) -> CrlResult<Option<OffsetDateTime>> {
        let lifetime = config.expiry_duration().map_err(|e| {
            CrlError::internal(format!("error parsing CRL duration of {:?}: {e}", config.expiry))
        })?;

        let revoked = if config.disable {
            if !force_new {
                // Leave a sentinel so re-enabling forces a refresh.
                return Ok(None);
            }
            // Forced while disabled: sign an empty CRL rather than the
            // current revocation set.
            Vec::new()
        } else {
            revoked
        };

        if !issuer.can_sign_crls() {
            return Err(CrlError::user(format!(
                "could not fetch the CA certificate: issuer {} is not enabled for CRL signing",
                issuer.id
            )));
        }

        let now = OffsetDateTime::now_utc();
        let next_update = now + lifetime;

        let params = CertificateRevocationListParams {
            this_update: now,
            next_update,
            crl_number: SerialNumber::from(crl_number),
            issuing_distribution_point: None,
            revoked_certs: revoked,
            key_identifier_method: KeyIdMethod::Sha256,
        };

        let signer = issuer
            .crl_signer()
            .map_err(|e| CrlError::internal(format!("error loading CRL signing key: {e}")))?;
        let crl = params
            .signed_by(&signer)
            .map_err(|e| CrlError::internal(format!("error creating new CRL: {e}")))?;

        // The legacy layout has exactly one CRL at a fixed path; the CRL id
        // is not persisted there.
        let write_path = if was_legacy {
            LEGACY_CRL_KEY.to_string()
        } else {
            format!("{CRL_PREFIX}{crl_id}")
        };

        self.storage
            .put(&write_path, crl.der().as_ref().to_vec())
            .await
            .map_err(|e| CrlError::internal(format!("error storing CRL: {e}")))?;

        Ok(Some(next_update))
    }
}

/// Publish revoked issuers on the CRL of every other issuer that validates
/// them. An issuer never appears on its own CRL, but cross-signed and
/// re-issued variants carry the revocation on the signer's CRL.
fn augment_with_revoked_issuers(
    issuer_entries: &HashMap<IssuerId, IssuerEntry>,
    revoked_by_issuer: &mut HashMap<IssuerId, Vec<RevokedCertParams>>,
) -> CrlResult<()> {
    for (our_id, our_entry) in issuer_entries {
        if !our_entry.revoked {
            continue;
        }

        let our_cert = our_entry.parse_certificate()?;
        let serial_bytes = our_cert.tbs_certificate.serial.to_bytes_be();
        let revocation_time = our_entry
            .revocation_time_utc
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        for (other_id, other_entry) in issuer_entries {
            if other_id == our_id {
                continue;
            }

            let other_cert = other_entry.parse_certificate()?;
            if our_cert
                .verify_signature(Some(other_cert.public_key()))
                .is_ok()
            {
                revoked_by_issuer
                    .entry(other_id.clone())
                    .or_default()
                    .push(RevokedCertParams {
                        serial_number: SerialNumber::from(serial_bytes.clone()),
                        revocation_time,
                        reason_code: None,
                        invalidity_date: None,
                    });
            }
        }
    }

    Ok(())
}
