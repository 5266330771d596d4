//! Signature schemes and in-memory signing keys.
//!
//! Two schemes exist across the platform: ECDSA P-256 with SHA-256 (the
//! default for TLS material and CSRs) and Ed25519 for identity signing.
//! Key pairs live for the lifetime of the holding process and are never
//! persisted by this module.

use ed25519_dalek::pkcs8::EncodePrivateKey as _;
use ed25519_dalek::pkcs8::EncodePublicKey as _;
use p256::pkcs8::EncodePrivateKey as _;
use p256::pkcs8::EncodePublicKey as _;
use rand::rngs::OsRng;
use x509_parser::certificate::X509Certificate;
use x509_parser::oid_registry::asn1_rs::{oid, Oid};
use x509_parser::prelude::FromDer;
use x509_parser::x509::SubjectPublicKeyInfo;
use zeroize::Zeroizing;

use crate::error::PkiError;

/// SPKI algorithm identifier for EC public keys (id-ecPublicKey).
const OID_EC_PUBLIC_KEY: Oid<'static> = oid!(1.2.840.10045.2.1);

/// SPKI algorithm identifier for Ed25519 (id-Ed25519).
const OID_ED25519: Oid<'static> = oid!(1.3.101.112);

/// Signature schemes supported for platform certificates and envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// ECDSA over secp256r1 with SHA-256. Default for TLS and CSRs.
    EcdsaP256Sha256,
    /// Ed25519 (SHA-512 internally).
    Ed25519,
}

impl SignatureScheme {
    /// Dotted signature-algorithm OID, for display and interop checks.
    pub fn oid(&self) -> &'static str {
        match self {
            Self::EcdsaP256Sha256 => "1.2.840.10045.4.3.2",
            Self::Ed25519 => "1.3.101.112",
        }
    }
}

impl Default for SignatureScheme {
    fn default() -> Self {
        Self::EcdsaP256Sha256
    }
}

/// An in-memory signing key pair for one of the platform schemes.
///
/// Wraps the raw curve keys; conversion to an `rcgen::KeyPair` happens at
/// the issuance boundary via PKCS#8 PEM, and detached signatures for
/// envelopes are produced directly here.
pub enum NodeKeyPair {
    EcdsaP256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl NodeKeyPair {
    /// Generate a fresh key pair for the given scheme from the OS CSPRNG.
    pub fn generate(scheme: SignatureScheme) -> Self {
        match scheme {
            SignatureScheme::EcdsaP256Sha256 => {
                Self::EcdsaP256(p256::ecdsa::SigningKey::random(&mut OsRng))
            }
            SignatureScheme::Ed25519 => {
                Self::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng))
            }
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            Self::EcdsaP256(_) => SignatureScheme::EcdsaP256Sha256,
            Self::Ed25519(_) => SignatureScheme::Ed25519,
        }
    }

    /// Export the private key in PKCS#8 PEM format.
    /// Caller is responsible for zeroizing the returned string.
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>, PkiError> {
        match self {
            Self::EcdsaP256(key) => key
                .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
                .map_err(|e| PkiError::Key(e.to_string())),
            Self::Ed25519(key) => key
                .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
                .map_err(|e| PkiError::Key(e.to_string())),
        }
    }

    /// Export the public key as DER-encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>, PkiError> {
        match self {
            Self::EcdsaP256(key) => key
                .verifying_key()
                .to_public_key_der()
                .map(|doc| doc.as_bytes().to_vec())
                .map_err(|e| PkiError::Key(e.to_string())),
            Self::Ed25519(key) => key
                .verifying_key()
                .to_public_key_der()
                .map(|doc| doc.as_bytes().to_vec())
                .map_err(|e| PkiError::Key(e.to_string())),
        }
    }

    /// Rebuild an `rcgen` key pair for certificate signing operations.
    pub fn to_rcgen(&self) -> Result<rcgen::KeyPair, PkiError> {
        let pem = self.private_key_pem()?;
        rcgen::KeyPair::from_pem(&pem).map_err(|e| PkiError::Key(e.to_string()))
    }

    /// Produce a detached signature over `data`.
    ///
    /// ECDSA signatures are DER-encoded; Ed25519 signatures are the raw
    /// 64-byte form.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::EcdsaP256(key) => {
                use p256::ecdsa::signature::Signer;
                let sig: p256::ecdsa::Signature = key.sign(data);
                sig.to_der().as_bytes().to_vec()
            }
            Self::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(data).to_bytes().to_vec()
            }
        }
    }
}

/// Verify a detached signature against the public key of a DER certificate.
pub fn verify_with_certificate(
    cert_der: &[u8],
    data: &[u8],
    signature: &[u8],
) -> Result<(), PkiError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| PkiError::Payload(format!("signer certificate rejected: {e}")))?;
    verify_with_spki(cert.public_key(), data, signature)
}

/// Verify a detached signature against a parsed SubjectPublicKeyInfo.
pub fn verify_with_spki(
    spki: &SubjectPublicKeyInfo<'_>,
    data: &[u8],
    signature: &[u8],
) -> Result<(), PkiError> {
    let alg = &spki.algorithm.algorithm;
    let key_bytes = spki.subject_public_key.data.as_ref();

    if *alg == OID_EC_PUBLIC_KEY {
        use p256::ecdsa::signature::Verifier;
        let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(key_bytes)
            .map_err(|e| PkiError::Key(format!("bad P-256 public key: {e}")))?;
        let sig = p256::ecdsa::Signature::from_der(signature)
            .map_err(|e| PkiError::Payload(format!("bad ECDSA signature encoding: {e}")))?;
        key.verify(data, &sig)
            .map_err(|_| PkiError::Payload("signature does not verify".into()))
    } else if *alg == OID_ED25519 {
        use ed25519_dalek::Verifier;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| PkiError::Key("bad Ed25519 public key length".into()))?;
        let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| PkiError::Key(format!("bad Ed25519 public key: {e}")))?;
        let sig = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|e| PkiError::Payload(format!("bad Ed25519 signature encoding: {e}")))?;
        key.verify(data, &sig)
            .map_err(|_| PkiError::Payload("signature does not verify".into()))
    } else {
        Err(PkiError::Key(format!(
            "unsupported public key algorithm: {alg}"
        )))
    }
}
