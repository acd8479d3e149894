pub mod store;

pub use store::{IssuerStore, LegacyCaBundle};

use std::fmt;
use std::ops::BitOr;

use rcgen::KeyPair;
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::prelude::{FromDer, X509Certificate, X509Error};

use crate::storage::StorageError;

/// Issuer id used in place of a real issuer while the mount still runs on
/// the legacy single-CA storage layout.
pub const LEGACY_BUNDLE_SHIM_ID: &str = "legacy-entry-shim-id";

/// Key id paired with [`LEGACY_BUNDLE_SHIM_ID`].
pub const LEGACY_BUNDLE_SHIM_KEY_ID: &str = "legacy-entry-shim-key-id";

/// Error type for issuer operations.
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("X.509 error: {0}")]
    X509(#[from] X509Error),

    #[error("signer error: {0}")]
    Signer(#[from] rcgen::Error),

    #[error("unable to find issuer {0}")]
    NotFound(IssuerId),
}

/// Opaque issuer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuerId(String);

impl IssuerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The synthetic issuer id representing the legacy CA bundle.
    pub fn legacy_shim() -> Self {
        Self(LEGACY_BUNDLE_SHIM_ID.to_string())
    }

    pub fn is_legacy_shim(&self) -> bool {
        self.0 == LEGACY_BUNDLE_SHIM_ID
    }
}

impl fmt::Display for IssuerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IssuerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque identifier of the key material backing one or more issuers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Bit set of the operations an issuer may perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuerUsage(u8);

impl IssuerUsage {
    pub const READ_ONLY: IssuerUsage = IssuerUsage(1);
    pub const ISSUANCE: IssuerUsage = IssuerUsage(1 << 1);
    pub const CRL_SIGNING: IssuerUsage = IssuerUsage(1 << 2);
    pub const ALL: IssuerUsage = IssuerUsage(1 | 1 << 1 | 1 << 2);

    pub fn contains(self, other: IssuerUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for IssuerUsage {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for IssuerUsage {
    type Output = IssuerUsage;

    fn bitor(self, rhs: IssuerUsage) -> IssuerUsage {
        IssuerUsage(self.0 | rhs.0)
    }
}

/// Signature algorithm an issuer uses when signing its CRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationSigAlg {
    EcdsaP256Sha256,
    EcdsaP384Sha384,
    Ed25519,
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl RevocationSigAlg {
    pub fn signature_algorithm(self) -> &'static rcgen::SignatureAlgorithm {
        match self {
            Self::EcdsaP256Sha256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            Self::EcdsaP384Sha384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            Self::Ed25519 => &rcgen::PKCS_ED25519,
            Self::RsaSha256 => &rcgen::PKCS_RSA_SHA256,
            Self::RsaSha384 => &rcgen::PKCS_RSA_SHA384,
            Self::RsaSha512 => &rcgen::PKCS_RSA_SHA512,
        }
    }
}

/// A Certificate Authority identity as consumed by the CRL engine.
///
/// The certificate is kept as raw DER and parsed on demand; the private key
/// is PKCS#8 DER. Issuer CRUD lives in the hosting platform, this crate only
/// reads and (re)writes entries through [`IssuerStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerEntry {
    pub id: IssuerId,
    #[serde(default)]
    pub name: String,
    pub key_id: KeyId,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
    #[serde(default)]
    pub usage: IssuerUsage,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub revocation_time_utc: Option<OffsetDateTime>,
    #[serde(default)]
    pub revocation_sig_alg: Option<RevocationSigAlg>,
}

impl IssuerEntry {
    /// Parse the issuer's certificate from its stored DER bytes.
    pub fn parse_certificate(&self) -> Result<X509Certificate<'_>, IssuerError> {
        let (_, cert) =
            X509Certificate::from_der(&self.certificate).map_err(|e| IssuerError::X509(e.into()))?;
        Ok(cert)
    }

    pub fn can_sign_crls(&self) -> bool {
        self.usage.contains(IssuerUsage::CRL_SIGNING)
    }

    /// Load the issuer's signing key, honoring the configured revocation
    /// signature algorithm when one is set.
    pub fn signing_key(&self) -> Result<KeyPair, IssuerError> {
        let key = match self.revocation_sig_alg {
            Some(alg) => KeyPair::from_pkcs8_der_and_sign_algo(
                &PrivatePkcs8KeyDer::from(self.private_key.as_slice()),
                alg.signature_algorithm(),
            )?,
            None => KeyPair::try_from(self.private_key.as_slice())?,
        };
        Ok(key)
    }

    /// Build a CRL signing handle from the issuer's certificate and key.
    pub fn crl_signer(&self) -> Result<rcgen::Issuer<'static, KeyPair>, IssuerError> {
        let key = self.signing_key()?;
        let cert = CertificateDer::from(self.certificate.clone());
        Ok(rcgen::Issuer::from_ca_cert_der(&cert, key)?)
    }
}

/// Mount-wide issuer configuration, persisted at `config/issuers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssuersConfig {
    /// The issuer whose CRL also carries revoked certificates that can no
    /// longer be attributed to any known issuer.
    #[serde(rename = "default", default)]
    pub default_issuer: Option<IssuerId>,
}
