//! Tern PKI: the X.509 toolkit anchoring the platform's trust model.
//!
//! Issues, validates, and (de)serializes the hierarchical certificates of a
//! compatibility zone: a self-signed root, intermediate and node CAs, and the
//! leaf identities (TLS, legal identity, network map, service identity).
//! Platform roles ride in a reserved non-critical extension so chain checks
//! can be bound to the signer's function, not just its name.

pub mod error;
pub mod factory;
pub mod issuer;
pub mod keys;
pub mod roles;
pub mod signed;
pub mod validate;

pub use error::PkiError;
pub use issuer::{CertAuthority, IssuedCert, SubjectName, ValidityWindow};
pub use keys::{NodeKeyPair, SignatureScheme};
pub use roles::{CertRole, CertificateType};
pub use signed::SignedWith;
