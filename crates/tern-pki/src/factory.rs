//! Certificate parsing, PEM round-trips, and cert-path assembly.
//!
//! Helpers here hold no shared state; parsing happens per call. A caller
//! that wants to amortize parsed material keeps its own copies; nothing
//! in this module is meant to be shared across owners.

use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::PkiError;

/// Summary fields of a parsed certificate, for display and policy checks.
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl CertificateInfo {
    pub fn from_der(der: &[u8]) -> Result<Self, PkiError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| PkiError::Payload(format!("certificate rejected: {e}")))?;
        let (not_before, not_after) = validity_of(&cert);
        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before,
            not_after,
        })
    }

    pub fn from_pem(pem_str: &str) -> Result<Self, PkiError> {
        Self::from_der(&parse_pem(pem_str)?)
    }
}

/// Decode a single PEM certificate object and require it to be time-valid
/// at the moment of parsing. Inputs with multiple objects are rejected.
pub fn parse_pem(pem_str: &str) -> Result<Vec<u8>, PkiError> {
    let objects = pem::parse_many(pem_str)
        .map_err(|e| PkiError::Payload(format!("pem rejected: {e}")))?;
    let object = match objects.as_slice() {
        [single] => single,
        [] => return Err(PkiError::Payload("no pem object found".into())),
        _ => {
            return Err(PkiError::Payload(format!(
                "expected a single pem object, found {}",
                objects.len()
            )))
        }
    };
    if object.tag() != "CERTIFICATE" {
        return Err(PkiError::Payload(format!(
            "expected a CERTIFICATE pem object, found {}",
            object.tag()
        )));
    }
    let der = object.contents().to_vec();

    let info = CertificateInfo::from_der(&der)?;
    let now = Utc::now();
    if now < info.not_before || now > info.not_after {
        return Err(PkiError::Payload(format!(
            "certificate for {} is not currently valid ({} – {})",
            info.subject, info.not_before, info.not_after
        )));
    }
    Ok(der)
}

/// Encode a DER certificate as PEM.
pub fn encode_pem(der: &[u8]) -> String {
    pem::encode(&pem::Pem::new("CERTIFICATE", der.to_vec()))
}

/// Read a single time-valid PEM certificate from a file.
pub fn read_cert_file(path: &Path) -> Result<Vec<u8>, PkiError> {
    let pem_str = std::fs::read_to_string(path)?;
    parse_pem(&pem_str)
}

/// Write a certificate to a file in PEM format.
pub fn write_cert_file(path: &Path, der: &[u8]) -> Result<(), PkiError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, encode_pem(der))?;
    Ok(())
}

/// SHA-256 fingerprint of a DER certificate as a lowercase hex string.
pub fn fingerprint_sha256(der: &[u8]) -> String {
    let hash = Sha256::digest(der);
    let mut s = String::with_capacity(hash.len() * 2);
    for b in hash {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// An ordered certificate path, leaf first, with issuer/subject adjacency
/// verified at construction.
#[derive(Debug, Clone)]
pub struct CertPath {
    certs: Vec<Vec<u8>>,
}

impl CertPath {
    /// Build a path from leaf-first DER certificates. Adjacent pairs must
    /// chain by name: each certificate's issuer DN equals the next one's
    /// subject DN. Signatures are not checked here; that is the chain
    /// validator's job.
    pub fn build(certs: Vec<Vec<u8>>) -> Result<Self, PkiError> {
        if certs.is_empty() {
            return Err(PkiError::Payload("certificate path is empty".into()));
        }
        for pair in certs.windows(2) {
            let (_, child) = X509Certificate::from_der(&pair[0])
                .map_err(|e| PkiError::Payload(format!("certificate rejected: {e}")))?;
            let (_, parent) = X509Certificate::from_der(&pair[1])
                .map_err(|e| PkiError::Payload(format!("certificate rejected: {e}")))?;
            if child.issuer().as_raw() != parent.subject().as_raw() {
                return Err(PkiError::Payload(format!(
                    "broken path: {} was not issued by {}",
                    child.subject(),
                    parent.subject()
                )));
            }
        }
        Ok(Self { certs })
    }

    pub fn leaf(&self) -> &[u8] {
        &self.certs[0]
    }

    pub fn certs(&self) -> &[Vec<u8>] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// Validity bounds of a DER certificate as UTC datetimes.
pub(crate) fn validity_bounds(der: &[u8]) -> Result<(DateTime<Utc>, DateTime<Utc>), PkiError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| PkiError::Payload(format!("certificate rejected: {e}")))?;
    Ok(validity_of(&cert))
}

fn validity_of(cert: &X509Certificate<'_>) -> (DateTime<Utc>, DateTime<Utc>) {
    let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
        .unwrap_or_else(Utc::now);
    let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
        .unwrap_or_else(Utc::now);
    (not_before, not_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::{issue, issue_root, SubjectName, ValidityWindow};
    use crate::keys::{NodeKeyPair, SignatureScheme};
    use crate::roles::CertificateType;

    fn test_root() -> (crate::issuer::CertAuthority, NodeKeyPair) {
        let key = NodeKeyPair::generate(SignatureScheme::EcdsaP256Sha256);
        let root = issue_root(
            &SubjectName::new("Factory Test Root"),
            &key,
            &ValidityWindow::default(),
        )
        .unwrap();
        (root, key)
    }

    #[test]
    fn pem_round_trip() {
        let (root, _) = test_root();
        let pem_str = encode_pem(root.cert_der());
        assert!(pem_str.contains("BEGIN CERTIFICATE"));
        let der = parse_pem(&pem_str).unwrap();
        assert_eq!(der, root.cert_der());
    }

    #[test]
    fn parse_pem_rejects_multiple_objects() {
        let (root, _) = test_root();
        let one = encode_pem(root.cert_der());
        let two = format!("{one}{one}");
        assert!(matches!(parse_pem(&two), Err(PkiError::Payload(_))));
    }

    #[test]
    fn parse_pem_rejects_empty_input() {
        assert!(parse_pem("").is_err());
    }

    #[test]
    fn parse_pem_rejects_wrong_tag() {
        let key = NodeKeyPair::generate(SignatureScheme::EcdsaP256Sha256);
        let key_pem = key.private_key_pem().unwrap();
        assert!(matches!(parse_pem(&key_pem), Err(PkiError::Payload(_))));
    }

    #[test]
    fn certificate_info_reflects_subject_and_window() {
        let (root, _) = test_root();
        let info = CertificateInfo::from_der(root.cert_der()).unwrap();
        assert!(info.subject.contains("Factory Test Root"));
        assert_eq!(info.subject, info.issuer);
        assert!(info.not_before <= Utc::now());
        assert!(info.not_after > Utc::now());
    }

    #[test]
    fn cert_file_round_trip() {
        let (root, _) = test_root();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("root.pem");

        write_cert_file(&path, root.cert_der()).unwrap();
        let der = read_cert_file(&path).unwrap();
        assert_eq!(der, root.cert_der());
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let (root, _) = test_root();
        let fp = fingerprint_sha256(root.cert_der());
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprints_differ_between_certs() {
        let (a, _) = test_root();
        let (b, _) = test_root();
        assert_ne!(
            fingerprint_sha256(a.cert_der()),
            fingerprint_sha256(b.cert_der())
        );
    }

    #[test]
    fn cert_path_accepts_chained_certs() {
        let (root, root_key) = test_root();
        let node_key = NodeKeyPair::generate(SignatureScheme::EcdsaP256Sha256);
        let node_ca = issue(
            CertificateType::NodeCa,
            &root,
            &SubjectName::new("Factory Node CA"),
            &node_key,
            &ValidityWindow::default(),
            None,
        )
        .unwrap();
        let _ = root_key;

        let path = CertPath::build(vec![node_ca.der.clone(), root.cert_der().to_vec()]).unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path.leaf(), node_ca.der.as_slice());
    }

    #[test]
    fn cert_path_rejects_broken_adjacency() {
        let (root_a, _) = test_root();
        let (root_b, _) = test_root();

        let err = CertPath::build(vec![root_a.cert_der().to_vec(), root_b.cert_der().to_vec()]);
        assert!(matches!(err, Err(PkiError::Payload(_))));
    }

    #[test]
    fn cert_path_rejects_empty_input() {
        assert!(CertPath::build(Vec::new()).is_err());
    }
}
