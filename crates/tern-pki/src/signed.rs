//! Detached-signature envelopes carrying the signer's certificate.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::PkiError;
use crate::keys::{self, NodeKeyPair};

/// Opaque signed payload: the serialized bytes, a detached signature over
/// them, and the DER certificate of the signer.
///
/// Holding a `SignedWith<T>` proves nothing by itself. Callers go through
/// [`crate::validate::verify_role_bound`] (or at minimum
/// [`SignedWith::verify_signature`]) before trusting the payload; the
/// signer's chain must be validatable to an externally supplied trust
/// anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct SignedWith<T> {
    pub raw: Vec<u8>,
    pub signature: Vec<u8>,
    pub certificate: Vec<u8>,
    #[serde(skip)]
    payload: PhantomData<fn() -> T>,
}

impl<T> SignedWith<T> {
    /// Assemble an envelope from parts already produced elsewhere.
    pub fn from_parts(raw: Vec<u8>, signature: Vec<u8>, certificate: Vec<u8>) -> Self {
        Self {
            raw,
            signature,
            certificate,
            payload: PhantomData,
        }
    }

    /// Check the detached signature against the embedded certificate's
    /// public key. Says nothing about whether that certificate is trusted.
    pub fn verify_signature(&self) -> Result<(), PkiError> {
        keys::verify_with_certificate(&self.certificate, &self.raw, &self.signature)
    }
}

impl<T: Serialize> SignedWith<T> {
    /// Serialize and sign a payload. `certificate` must be the signer's
    /// certificate matching `key`.
    pub fn sign(value: &T, key: &NodeKeyPair, certificate: Vec<u8>) -> Result<Self, PkiError> {
        let raw = serde_json::to_vec(value).map_err(|e| PkiError::Payload(e.to_string()))?;
        let signature = key.sign(&raw);
        Ok(Self {
            raw,
            signature,
            certificate,
            payload: PhantomData,
        })
    }
}

impl<T: DeserializeOwned> SignedWith<T> {
    /// Deserialize the payload without any signature or chain check.
    pub fn unverified(&self) -> Result<T, PkiError> {
        serde_json::from_slice(&self.raw).map_err(|e| PkiError::Payload(e.to_string()))
    }
}
