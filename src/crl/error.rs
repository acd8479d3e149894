use thiserror::Error;
use x509_parser::prelude::X509Error;

use crate::issuer::IssuerError;
use crate::storage::StorageError;

/// CRL engine errors.
///
/// `User` carries problems attributable to the request (missing
/// certificates, bad references, self-revocation attempts) and maps to a
/// 4xx-style response at the API boundary. Every other variant is internal
/// and aborts the operation.
#[derive(Debug, Error)]
pub enum CrlError {
    #[error("{0}")]
    User(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("issuer error: {0}")]
    Issuer(#[from] IssuerError),

    #[error("X.509 error: {0}")]
    X509(#[from] X509Error),

    #[error("CRL signing error: {0}")]
    Signing(#[from] rcgen::Error),

    #[error("{0}")]
    Internal(String),
}

impl CrlError {
    pub fn user(msg: impl Into<String>) -> Self {
        Self::User(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error should surface as a user-facing response rather
    /// than an operational failure.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::User(_) | Self::Issuer(IssuerError::NotFound(_)))
    }
}

/// Convenient Result type alias.
pub type CrlResult<T> = Result<T, CrlError>;
