//! Certificate roles and per-type issuance policy.
//!
//! The policy table is pure data: every certificate type maps to a fixed
//! key-usage set, the shared EKU triple, a CA flag, and (for everything
//! below the root) a role tag carried in the reserved platform extension.
//! Chain checks use the tag to bind signed artifacts to the function of
//! their signer.

use rcgen::{ExtendedKeyUsagePurpose, KeyUsagePurpose};
use serde::{Deserialize, Serialize};
use x509_parser::certificate::X509Certificate;
use x509_parser::oid_registry::asn1_rs::{oid, Oid};

use crate::error::PkiError;

/// Reserved extension OID carrying the platform role tag.
pub const ROLE_EXTENSION_OID: Oid<'static> = oid!(1.3.6.1.4.1.57265.1.1);

/// The same OID as the arc sequence rcgen expects when building extensions.
pub(crate) const ROLE_EXTENSION_ARCS: &[u64] = &[1, 3, 6, 1, 4, 1, 57265, 1, 1];

/// Role tag carried inside the role extension.
///
/// The root CA carries no role extension; every other certificate in the
/// hierarchy declares exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertRole {
    IntermediateCa,
    NetworkMap,
    ServiceIdentity,
    NodeCa,
    Tls,
    LegalIdentity,
    ConfidentialLegalIdentity,
}

impl CertRole {
    /// Wire tag of this role. The numbering is part of the platform
    /// protocol and must never change.
    pub fn tag(&self) -> u8 {
        match self {
            Self::IntermediateCa => 1,
            Self::NetworkMap => 2,
            Self::ServiceIdentity => 3,
            Self::NodeCa => 4,
            Self::Tls => 5,
            Self::LegalIdentity => 6,
            Self::ConfidentialLegalIdentity => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::IntermediateCa),
            2 => Some(Self::NetworkMap),
            3 => Some(Self::ServiceIdentity),
            4 => Some(Self::NodeCa),
            5 => Some(Self::Tls),
            6 => Some(Self::LegalIdentity),
            7 => Some(Self::ConfidentialLegalIdentity),
            _ => None,
        }
    }

    /// DER encoding of the extension value: a single ASN.1 INTEGER.
    pub fn to_der_value(&self) -> Vec<u8> {
        vec![0x02, 0x01, self.tag()]
    }

    /// Decode the extension value produced by [`CertRole::to_der_value`].
    pub fn from_der_value(value: &[u8]) -> Result<Self, PkiError> {
        if value.len() != 3 || value[0] != 0x02 || value[1] != 0x01 {
            return Err(PkiError::Payload(
                "role extension is not a single-byte ASN.1 INTEGER".into(),
            ));
        }
        Self::from_tag(value[2])
            .ok_or_else(|| PkiError::Payload(format!("unknown role tag {}", value[2])))
    }
}

/// Extract the platform role from a parsed certificate, if present.
pub fn role_of(cert: &X509Certificate<'_>) -> Result<Option<CertRole>, PkiError> {
    match cert
        .extensions()
        .iter()
        .find(|ext| ext.oid == ROLE_EXTENSION_OID)
    {
        Some(ext) => CertRole::from_der_value(ext.value).map(Some),
        None => Ok(None),
    }
}

/// The certificate types issued across the trust hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateType {
    RootCa,
    IntermediateCa,
    NodeCa,
    LegalIdentity,
    Tls,
    NetworkMap,
    ServiceIdentity,
    ConfidentialLegalIdentity,
}

impl CertificateType {
    /// Key-usage bits this type is issued with.
    pub fn key_usages(&self) -> Vec<KeyUsagePurpose> {
        match self {
            Self::RootCa | Self::IntermediateCa | Self::NodeCa => vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
                KeyUsagePurpose::CrlSign,
            ],
            Self::LegalIdentity => vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyCertSign,
            ],
            Self::Tls => vec![
                KeyUsagePurpose::DigitalSignature,
                KeyUsagePurpose::KeyEncipherment,
                KeyUsagePurpose::KeyAgreement,
            ],
            Self::NetworkMap | Self::ServiceIdentity | Self::ConfidentialLegalIdentity => {
                vec![KeyUsagePurpose::DigitalSignature]
            }
        }
    }

    /// Every type carries the same EKU triple.
    pub fn extended_key_usages(&self) -> Vec<ExtendedKeyUsagePurpose> {
        vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::Any,
        ]
    }

    pub fn is_ca(&self) -> bool {
        matches!(
            self,
            Self::RootCa | Self::IntermediateCa | Self::NodeCa | Self::LegalIdentity
        )
    }

    /// Role tag stamped into issued certificates; the root carries none.
    pub fn role(&self) -> Option<CertRole> {
        match self {
            Self::RootCa => None,
            Self::IntermediateCa => Some(CertRole::IntermediateCa),
            Self::NodeCa => Some(CertRole::NodeCa),
            Self::LegalIdentity => Some(CertRole::LegalIdentity),
            Self::Tls => Some(CertRole::Tls),
            Self::NetworkMap => Some(CertRole::NetworkMap),
            Self::ServiceIdentity => Some(CertRole::ServiceIdentity),
            Self::ConfidentialLegalIdentity => Some(CertRole::ConfidentialLegalIdentity),
        }
    }
}
