use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use time::OffsetDateTime;
use x509_parser::prelude::{CertificateRevocationList, FromDer, X509Certificate};

use pki_crl_engine::cluster::{StaticSystemView, SystemView};
use pki_crl_engine::crl::{CERTS_PREFIX, CrlEngine};
use pki_crl_engine::issuer::{IssuerEntry, IssuerId, IssuerStore, IssuerUsage, KeyId};
use pki_crl_engine::serial::{serial_from_bytes, serial_from_cert};
use pki_crl_engine::storage::{MemoryStorage, Storage};

/// An engine wired to in-memory storage on an active node.
pub struct TestEngine {
    pub storage: Arc<dyn Storage>,
    pub issuers: Arc<IssuerStore>,
    pub system: Arc<StaticSystemView>,
    pub engine: CrlEngine,
}

pub fn test_engine() -> TestEngine {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let issuers = Arc::new(IssuerStore::new(Arc::clone(&storage)));
    let system = Arc::new(StaticSystemView::active());
    let engine = CrlEngine::new(
        Arc::clone(&storage),
        Arc::clone(&issuers),
        Arc::clone(&system) as Arc<dyn SystemView>,
    );

    TestEngine {
        storage,
        issuers,
        system,
        engine,
    }
}

/// A CA registered as an issuer, keeping the signing handle around for
/// issuing leaf certificates.
pub struct TestCa {
    pub id: IssuerId,
    pub signer: rcgen::Issuer<'static, KeyPair>,
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
    pub serial: String,
}

fn ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::CrlSign,
    ];
    params
}

/// Create a self-signed CA and register it as an issuer.
pub async fn add_ca(env: &TestEngine, id: &str, common_name: &str, key_id: &str) -> TestCa {
    let params = ca_params(common_name);
    let key = KeyPair::generate().unwrap();
    let key_der = key.serialize_der();
    let cert = params.self_signed(&key).unwrap();
    let cert_der = cert.der().as_ref().to_vec();

    let serial = {
        let (_, parsed) = X509Certificate::from_der(&cert_der).unwrap();
        serial_from_cert(&parsed)
    };

    save_issuer_entry(env, id, key_id, &cert_der, &key_der, false).await;

    TestCa {
        id: IssuerId::new(id),
        signer: rcgen::Issuer::new(params, key),
        cert_der,
        key_der,
        serial,
    }
}

/// Create an intermediate CA signed by `parent` and register it as an
/// issuer, optionally already marked revoked.
pub async fn add_intermediate_ca(
    env: &TestEngine,
    parent: &TestCa,
    id: &str,
    common_name: &str,
    key_id: &str,
    revoked: bool,
) -> TestCa {
    let params = ca_params(common_name);
    let key = KeyPair::generate().unwrap();
    let key_der = key.serialize_der();
    let cert = params.signed_by(&key, &parent.signer).unwrap();
    let cert_der = cert.der().as_ref().to_vec();

    let serial = {
        let (_, parsed) = X509Certificate::from_der(&cert_der).unwrap();
        serial_from_cert(&parsed)
    };

    save_issuer_entry(env, id, key_id, &cert_der, &key_der, revoked).await;

    TestCa {
        id: IssuerId::new(id),
        signer: rcgen::Issuer::new(params, key),
        cert_der,
        key_der,
        serial,
    }
}

/// Register a second issuer entry sharing `ca`'s certificate and key,
/// making the two functionally equivalent.
pub async fn add_equivalent_issuer(env: &TestEngine, ca: &TestCa, id: &str, key_id: &str) {
    save_issuer_entry(env, id, key_id, &ca.cert_der, &ca.key_der, false).await;
}

async fn save_issuer_entry(
    env: &TestEngine,
    id: &str,
    key_id: &str,
    cert_der: &[u8],
    key_der: &[u8],
    revoked: bool,
) {
    let entry = IssuerEntry {
        id: IssuerId::new(id),
        name: id.to_string(),
        key_id: KeyId::new(key_id),
        certificate: cert_der.to_vec(),
        private_key: key_der.to_vec(),
        usage: IssuerUsage::ALL,
        revoked,
        revocation_time_utc: revoked.then(OffsetDateTime::now_utc),
        revocation_sig_alg: None,
    };
    env.issuers.save_issuer(&entry).await.unwrap();
}

/// Issue a leaf certificate, store it under `certs/`, and return its
/// canonical serial.
pub async fn issue_cert(
    env: &TestEngine,
    ca: &TestCa,
    common_name: &str,
    not_after: OffsetDateTime,
) -> String {
    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;
    params.not_after = not_after;

    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &ca.signer).unwrap();
    let der = cert.der().as_ref().to_vec();

    let serial = {
        let (_, parsed) = X509Certificate::from_der(&der).unwrap();
        serial_from_cert(&parsed)
    };

    env.storage
        .put(&format!("{CERTS_PREFIX}{serial}"), der)
        .await
        .unwrap();

    serial
}

/// Revoked serials and CRL number of a signed DER CRL, verified against the
/// issuing CA's certificate.
pub fn crl_summary(crl_der: &[u8], issuer_cert_der: &[u8]) -> (Vec<String>, String) {
    let (_, crl) = CertificateRevocationList::from_der(crl_der).unwrap();
    let (_, issuer_cert) = X509Certificate::from_der(issuer_cert_der).unwrap();

    crl.verify_signature(issuer_cert.public_key())
        .expect("CRL signature must verify against its issuer");

    let mut serials: Vec<String> = crl
        .iter_revoked_certificates()
        .map(|revoked| serial_from_bytes(&revoked.user_certificate.to_bytes_be()))
        .collect();
    serials.sort();

    let number = crl
        .crl_number()
        .map(|n| n.to_string())
        .expect("CRL must carry a CRL number");

    (serials, number)
}
