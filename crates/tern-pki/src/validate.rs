//! Chain validation and role-bound artifact verification.
//!
//! Validation walks a leaf-first chain to a single trust anchor: name
//! chaining, current time validity, CA authority on every issuer, and a
//! signature check on every link. Revocation is deliberately never
//! consulted; membership changes in the zone propagate through the
//! network map, not through CRLs.

use chrono::Utc;
use serde::de::DeserializeOwned;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::PkiError;
use crate::roles::{self, CertRole};
use crate::signed::SignedWith;

/// Validate a leaf-first certificate chain against a single trust anchor.
///
/// The anchor is appended when the chain does not already end with it.
/// Every link must chain by name to its issuer, be valid at the current
/// time, and verify under the issuer's key; every issuer must be a CA
/// entitled to sign certificates.
pub fn validate_chain(trust_root_der: &[u8], chain: &[Vec<u8>]) -> Result<(), PkiError> {
    if chain.is_empty() {
        return Err(PkiError::ChainInvalid("empty certificate chain".into()));
    }

    let mut ders: Vec<&[u8]> = chain.iter().map(|c| c.as_slice()).collect();
    if *ders.last().expect("chain is non-empty") != trust_root_der {
        ders.push(trust_root_der);
    }

    let now = Utc::now().timestamp();
    for index in 0..ders.len() {
        let (_, cert) = X509Certificate::from_der(ders[index])
            .map_err(|e| PkiError::ChainInvalid(format!("link {index} does not parse: {e}")))?;

        let not_before = cert.validity().not_before.timestamp();
        let not_after = cert.validity().not_after.timestamp();
        if now < not_before || now > not_after {
            return Err(PkiError::ChainInvalid(format!(
                "{} is not valid at the current time",
                cert.subject()
            )));
        }

        if index + 1 == ders.len() {
            break;
        }
        let (_, issuer) = X509Certificate::from_der(ders[index + 1]).map_err(|e| {
            PkiError::ChainInvalid(format!("link {} does not parse: {e}", index + 1))
        })?;

        if cert.issuer().as_raw() != issuer.subject().as_raw() {
            return Err(PkiError::ChainInvalid(format!(
                "{} was not issued by {}",
                cert.subject(),
                issuer.subject()
            )));
        }

        let issuer_is_ca = issuer
            .basic_constraints()
            .map_err(|e| PkiError::ChainInvalid(format!("bad basicConstraints: {e}")))?
            .map(|bc| bc.value.ca)
            .unwrap_or(false);
        if !issuer_is_ca {
            return Err(PkiError::ChainInvalid(format!(
                "{} is not a CA certificate",
                issuer.subject()
            )));
        }
        if let Some(usage) = issuer
            .key_usage()
            .map_err(|e| PkiError::ChainInvalid(format!("bad keyUsage: {e}")))?
        {
            if !usage.value.key_cert_sign() {
                return Err(PkiError::ChainInvalid(format!(
                    "{} may not sign certificates",
                    issuer.subject()
                )));
            }
        }

        cert.verify_signature(Some(issuer.public_key()))
            .map_err(|_| {
                PkiError::ChainInvalid(format!(
                    "signature of {} does not verify under {}",
                    cert.subject(),
                    issuer.subject()
                ))
            })?;
    }

    Ok(())
}

/// Verify a signed envelope whose signer must carry `expected` in the
/// platform role extension, then validate the signer's chain to the trust
/// anchor and check the detached signature. The payload is deserialized
/// only after both checks pass.
pub fn verify_role_bound<T: DeserializeOwned>(
    envelope: &SignedWith<T>,
    expected: CertRole,
    trust_root_der: &[u8],
) -> Result<T, PkiError> {
    let found = {
        let (_, signer) = X509Certificate::from_der(&envelope.certificate)
            .map_err(|e| PkiError::Payload(format!("signer certificate rejected: {e}")))?;
        roles::role_of(&signer)?
    };
    if found != Some(expected) {
        return Err(PkiError::WrongRole { expected, found });
    }

    validate_chain(trust_root_der, std::slice::from_ref(&envelope.certificate))?;
    envelope.verify_signature()?;
    envelope.unverified()
}

/// Verify a signed envelope without pinning a role: chain to the anchor,
/// then the detached signature, then deserialize.
pub fn verify_signed<T: DeserializeOwned>(
    envelope: &SignedWith<T>,
    trust_root_der: &[u8],
) -> Result<T, PkiError> {
    validate_chain(trust_root_der, std::slice::from_ref(&envelope.certificate))?;
    envelope.verify_signature()?;
    envelope.unverified()
}
