//! Certificate issuance: self-signed roots, CA-signed subjects, and CSRs.
//!
//! Issuance goes through `rcgen`; the issued bytes are immediately
//! re-parsed and checked against the post-build invariants (time-valid
//! now, signature verifies under the issuer key) before being handed
//! back. A failed invariant is a bug in the caller or here, never
//! something to paper over.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, CustomExtension,
    DistinguishedName, DnType, DnValue, IsCa, Issuer, KeyPair, NameConstraints, SerialNumber,
};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::PkiError;
use crate::factory;
use crate::keys::NodeKeyPair;
use crate::roles::{CertificateType, ROLE_EXTENSION_ARCS};

/// Default validity runs ten years forward from the midnight anchor.
pub const DEFAULT_VALIDITY_DAYS: i64 = 3650;

/// CSR e-mail attribute OID (pkcs-9 emailAddress).
const EMAIL_ADDRESS_ARCS: &[u64] = &[1, 2, 840, 113549, 1, 9, 1];

/// Relative validity window for an issued certificate.
///
/// The window is anchored at the current day's midnight UTC so that
/// certificates minted in the same day compare equal on validity, then
/// clamped to the parent certificate's own window. Resolving an empty
/// interval fails issuance.
#[derive(Debug, Clone)]
pub struct ValidityWindow {
    /// How far before the anchor the certificate becomes valid.
    pub before: Duration,
    /// How far after the anchor the certificate expires.
    pub after: Duration,
}

impl Default for ValidityWindow {
    fn default() -> Self {
        Self {
            before: Duration::zero(),
            after: Duration::days(DEFAULT_VALIDITY_DAYS),
        }
    }
}

impl ValidityWindow {
    pub fn new(before: Duration, after: Duration) -> Self {
        Self { before, after }
    }

    /// Resolve to a concrete `[not_before, not_after]` interval, clamped
    /// to the parent's interval when one is supplied.
    pub fn resolve(
        &self,
        parent: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), PkiError> {
        let anchor = midnight_utc(Utc::now());
        let mut not_before = anchor - self.before;
        let mut not_after = anchor + self.after;
        if let Some((parent_nb, parent_na)) = parent {
            not_before = not_before.max(parent_nb);
            not_after = not_after.min(parent_na);
        }
        if not_before >= not_after {
            return Err(PkiError::EmptyValidityWindow);
        }
        Ok((not_before, not_after))
    }
}

fn midnight_utc(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time of day")
        .and_utc()
}

/// X.500-style subject naming for issued certificates.
#[derive(Debug, Clone)]
pub struct SubjectName {
    pub common_name: String,
    pub organization: Option<String>,
    pub locality: Option<String>,
    pub country: Option<String>,
}

impl SubjectName {
    pub fn new(common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            organization: None,
            locality: None,
            country: None,
        }
    }

    pub fn organization(mut self, org: &str) -> Self {
        self.organization = Some(org.to_string());
        self
    }

    pub fn locality(mut self, locality: &str) -> Self {
        self.locality = Some(locality.to_string());
        self
    }

    pub fn country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }

    fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(self.common_name.clone()),
        );
        if let Some(org) = &self.organization {
            dn.push(DnType::OrganizationName, DnValue::Utf8String(org.clone()));
        }
        if let Some(locality) = &self.locality {
            dn.push(DnType::LocalityName, DnValue::Utf8String(locality.clone()));
        }
        if let Some(country) = &self.country {
            dn.push(DnType::CountryName, DnValue::Utf8String(country.clone()));
        }
        dn
    }
}

/// A freshly issued certificate in both encodings.
#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub der: Vec<u8>,
    pub pem: String,
}

/// An issuing authority: a CA certificate plus the key that signs with it.
pub struct CertAuthority {
    cert_der: Vec<u8>,
    cert_pem: String,
    key: KeyPair,
}

impl CertAuthority {
    /// Assemble an authority from an existing CA certificate and its key.
    pub fn new(cert_der: Vec<u8>, keypair: &NodeKeyPair) -> Result<Self, PkiError> {
        let cert_pem = factory::encode_pem(&cert_der);
        let key = keypair.to_rcgen()?;
        Ok(Self {
            cert_der,
            cert_pem,
            key,
        })
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }
}

/// Issue a self-signed root CA certificate.
pub fn issue_root(
    subject: &SubjectName,
    keypair: &NodeKeyPair,
    window: &ValidityWindow,
) -> Result<CertAuthority, PkiError> {
    let key = keypair.to_rcgen()?;
    let (not_before, not_after) = window.resolve(None)?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    apply_type_policy(
        &mut params,
        CertificateType::RootCa,
        not_before,
        not_after,
        None,
    );

    let cert = params
        .self_signed(&key)
        .map_err(|e| PkiError::Issuance(e.to_string()))?;
    let der = cert.der().to_vec();
    check_issued(&der, &der)?;

    tracing::info!(
        subject = %subject.common_name,
        fingerprint = %factory::fingerprint_sha256(&der),
        "Issued self-signed root certificate"
    );

    Ok(CertAuthority {
        cert_pem: cert.pem(),
        cert_der: der,
        key,
    })
}

/// Issue a certificate of the given type, signed by `authority`, for a
/// subject whose key pair is held locally. The validity window is clamped
/// to the authority's own.
pub fn issue(
    cert_type: CertificateType,
    authority: &CertAuthority,
    subject: &SubjectName,
    subject_key: &NodeKeyPair,
    window: &ValidityWindow,
    name_constraints: Option<NameConstraints>,
) -> Result<IssuedCert, PkiError> {
    let parent = factory::validity_bounds(&authority.cert_der)?;
    let (not_before, not_after) = window.resolve(Some(parent))?;

    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    apply_type_policy(&mut params, cert_type, not_before, not_after, name_constraints);

    let subject_rcgen = subject_key.to_rcgen()?;
    let issuer = Issuer::from_ca_cert_pem(&authority.cert_pem, &authority.key)
        .map_err(|e| PkiError::Issuance(format!("issuer rejected: {e}")))?;
    let cert = params
        .signed_by(&subject_rcgen, &issuer)
        .map_err(|e| PkiError::Issuance(e.to_string()))?;

    let der = cert.der().to_vec();
    check_issued(&der, &authority.cert_der)?;

    tracing::debug!(
        cert_type = ?cert_type,
        subject = %subject.common_name,
        "Issued certificate"
    );

    Ok(IssuedCert {
        pem: cert.pem(),
        der,
    })
}

/// Issue a certificate from a PKCS#10 signing request. The requester's
/// public key comes out of the CSR; its private key never crosses this
/// boundary. The CSR's subject is kept; type policy, serial, and validity
/// are imposed here.
pub fn issue_from_request(
    cert_type: CertificateType,
    authority: &CertAuthority,
    csr_pem: &str,
    window: &ValidityWindow,
    name_constraints: Option<NameConstraints>,
) -> Result<IssuedCert, PkiError> {
    let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
        .map_err(|e| PkiError::Payload(format!("csr rejected: {e}")))?;

    let parent = factory::validity_bounds(&authority.cert_der)?;
    let (not_before, not_after) = window.resolve(Some(parent))?;
    apply_type_policy(
        &mut csr.params,
        cert_type,
        not_before,
        not_after,
        name_constraints,
    );

    let issuer = Issuer::from_ca_cert_pem(&authority.cert_pem, &authority.key)
        .map_err(|e| PkiError::Issuance(format!("issuer rejected: {e}")))?;
    let cert = csr
        .signed_by(&issuer)
        .map_err(|e| PkiError::Issuance(e.to_string()))?;

    let der = cert.der().to_vec();
    check_issued(&der, &authority.cert_der)?;

    Ok(IssuedCert {
        pem: cert.pem(),
        der,
    })
}

/// Create a PKCS#10 certificate signing request carrying the requester's
/// e-mail as a DN attribute.
pub fn create_signing_request(
    subject: &SubjectName,
    email: &str,
    keypair: &NodeKeyPair,
) -> Result<String, PkiError> {
    let key = keypair.to_rcgen()?;
    let mut params = CertificateParams::default();
    params.distinguished_name = subject.to_distinguished_name();
    params.distinguished_name.push(
        DnType::CustomDnType(EMAIL_ADDRESS_ARCS.to_vec()),
        DnValue::Utf8String(email.to_string()),
    );

    let csr = params
        .serialize_request(&key)
        .map_err(|e| PkiError::Issuance(e.to_string()))?;
    csr.pem().map_err(|e| PkiError::Issuance(e.to_string()))
}

/// Stamp serial, validity, and the per-type extension policy onto params.
fn apply_type_policy(
    params: &mut CertificateParams,
    cert_type: CertificateType,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    name_constraints: Option<NameConstraints>,
) {
    params.serial_number = Some(random_serial());
    params.not_before = to_offset(not_before);
    params.not_after = to_offset(not_after);
    params.is_ca = if cert_type.is_ca() {
        IsCa::Ca(BasicConstraints::Unconstrained)
    } else {
        IsCa::ExplicitNoCa
    };
    params.key_usages = cert_type.key_usages();
    params.extended_key_usages = cert_type.extended_key_usages();
    if let Some(role) = cert_type.role() {
        params.custom_extensions.push(CustomExtension::from_oid_content(
            ROLE_EXTENSION_ARCS,
            role.to_der_value(),
        ));
    }
    if let Some(nc) = name_constraints {
        params.name_constraints = Some(nc);
    }
}

/// Random 63-bit positive serial. The top bit is cleared so the DER
/// INTEGER encoding can never come out negative on a sign-extending
/// consumer.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 8];
    OsRng.fill_bytes(&mut bytes);
    bytes[0] &= 0x7f;
    SerialNumber::from(bytes.to_vec())
}

fn to_offset(at: DateTime<Utc>) -> time::OffsetDateTime {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp())
        .unwrap_or(time::OffsetDateTime::now_utc())
}

/// Post-build invariants: the issued certificate must be valid right now
/// and must verify under the issuer's public key. Either failing means a
/// bug, and the certificate is discarded.
fn check_issued(cert_der: &[u8], issuer_der: &[u8]) -> Result<(), PkiError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| PkiError::Issuance(format!("issued bytes do not parse: {e}")))?;

    let now = Utc::now().timestamp();
    let not_before = cert.validity().not_before.timestamp();
    let not_after = cert.validity().not_after.timestamp();
    if now < not_before || now > not_after {
        return Err(PkiError::Issuance(
            "issued certificate is not valid at issuance time".into(),
        ));
    }

    let (_, issuer) = X509Certificate::from_der(issuer_der)
        .map_err(|e| PkiError::Issuance(format!("issuer bytes do not parse: {e}")))?;
    cert.verify_signature(Some(issuer.public_key()))
        .map_err(|_| {
            PkiError::Issuance("issued certificate does not verify under the issuer key".into())
        })
}
