//! PKI domain error types.

use crate::roles::CertRole;

#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error("issuance invariant violated: {0}")]
    Issuance(String),

    #[error("certificate chain rejected: {0}")]
    ChainInvalid(String),

    #[error("signer role mismatch: expected {expected:?}, found {found:?}")]
    WrongRole {
        expected: CertRole,
        found: Option<CertRole>,
    },

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("certificate validity window is empty")]
    EmptyValidityWindow,

    #[error("key error: {0}")]
    Key(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PkiError>;
