//! Netmap domain error types.

use tern_pki::PkiError;

#[derive(Debug, thiserror::Error)]
pub enum NetmapError {
    #[error("registry returned {status}: {body}")]
    Transport { status: u16, body: String },

    #[error("registry not reachable: {0}")]
    Unreachable(String),

    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("no parameters update pending with hash {0}")]
    UpdateConflict(String),

    #[error("network parameters mismatch: zone advertises {advertised}, node runs {current}")]
    ParametersMismatch { advertised: String, current: String },

    #[error("no network-map client configured")]
    NotConfigured,

    #[error("already subscribed to the network map")]
    AlreadySubscribed,

    #[error("certificate error: {0}")]
    Pki(#[from] PkiError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetmapError>;
