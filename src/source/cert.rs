//! Client-certificate identity extraction.
//!
//! Parses the DER-encoded certificate the TLS layer hands in and extracts
//! the fields the translation core needs: subject CN and DN, the validity
//! window, and a SHA-256 fingerprint used as the certificate's invalidation
//! key. TLS verification itself happens below this crate.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// A parsed client certificate taken from the inbound request attribute.
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    der: Vec<u8>,
    common_name: Option<String>,
    distinguished_name: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    fingerprint: String,
}

impl ClientCertificate {
    /// Parse a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenNotValid`] if the bytes are not a well-formed
    /// X.509 certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::TokenNotValid(format!("Malformed client certificate: {e}")))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);
        let distinguished_name = cert.subject().to_string();

        let not_before = DateTime::from_timestamp(cert.validity().not_before.timestamp(), 0)
            .ok_or_else(|| Error::TokenNotValid("Certificate notBefore out of range".to_string()))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::TokenNotValid("Certificate notAfter out of range".to_string()))?;

        Ok(Self {
            der: der.to_vec(),
            common_name,
            distinguished_name,
            not_before,
            not_after,
            fingerprint: fingerprint(der),
        })
    }

    /// Subject Common Name, if the certificate carries one.
    #[must_use]
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Full subject distinguished name.
    #[must_use]
    pub fn distinguished_name(&self) -> &str {
        &self.distinguished_name
    }

    /// Start of the validity window.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity window.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// SHA-256 fingerprint of the DER encoding, hex-encoded. Used as the
    /// certificate's key in the invalidation store.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Base64 of the DER encoding, forwarded by the x509 scheme.
    #[must_use]
    pub fn encoded(&self) -> String {
        BASE64.encode(&self.der)
    }
}

/// SHA-256 hex fingerprint of raw DER bytes.
fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}

/// External mapper resolving a certificate to a mainframe user id.
///
/// `Ok(None)` means the certificate is valid but no identity is mapped to
/// it — an expected outcome callers must treat as data, not as an error.
pub trait CertificateMapper: Send + Sync {
    /// Map a certificate to a mainframe user id.
    fn map(&self, cert: &ClientCertificate) -> Result<Option<String>>;
}
