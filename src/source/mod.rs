//! Normalized inbound-credential model.
//!
//! [`AuthSource`] carries the raw artifact only; parsed semantics live in
//! [`ParsedCredential`], which is produced exclusively by validating a
//! source. Both are request-scoped and immutable after construction.

pub mod cert;
pub mod service;

use chrono::{DateTime, Utc};

pub use cert::{CertificateMapper, ClientCertificate};
pub use service::{AuthSourceService, RequestCredentials};

/// A raw inbound credential, extracted from the request but not yet
/// validated.
#[derive(Debug, Clone)]
pub enum AuthSource {
    /// A JWT-bearing token (gateway-issued or legacy-provider-issued).
    Jwt(String),
    /// A verified client certificate handed in by the TLS layer.
    ClientCert(ClientCertificate),
}

impl AuthSource {
    /// Key identifying this credential in the invalidation store: the raw
    /// token for JWTs, the SHA-256 fingerprint for certificates.
    #[must_use]
    pub fn invalidation_key(&self) -> &str {
        match self {
            Self::Jwt(token) => token,
            Self::ClientCert(cert) => cert.fingerprint(),
        }
    }
}

/// Which system issued the inbound credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOrigin {
    /// Issued by the legacy identity provider (z/OSMF).
    LegacyProvider,
    /// Issued by this gateway.
    Gateway,
    /// Derived from a client certificate.
    Certificate,
}

/// Claims parsed out of a validated [`AuthSource`].
///
/// `user_id == None` signals "valid credential, but no mainframe identity
/// could be mapped" — a distinct condition from invalid or expired.
#[derive(Debug, Clone)]
pub struct ParsedCredential {
    /// Mapped mainframe user id, if any.
    pub user_id: Option<String>,
    /// When the credential was issued.
    pub created_at: DateTime<Utc>,
    /// When the credential expires; `None` for credentials without a clock
    /// bound.
    pub expires_at: Option<DateTime<Utc>>,
    /// Which system issued the credential.
    pub origin: CredentialOrigin,
    /// Subject distinguished name, for certificate sources.
    pub distinguished_name: Option<String>,
    /// SHA-256 fingerprint of the raw certificate, for certificate sources.
    pub cert_fingerprint: Option<String>,
}

impl ParsedCredential {
    /// The mapped user id, or [`crate::Error::UserNotMapped`] if none.
    pub fn require_user_id(&self) -> crate::Result<&str> {
        self.user_id.as_deref().ok_or_else(|| crate::Error::UserNotMapped {
            dn: self
                .distinguished_name
                .clone()
                .unwrap_or_else(|| "<no subject>".to_string()),
        })
    }
}
