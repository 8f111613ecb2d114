//! Client-certificate scheme — forwards certificate identity headers.
//!
//! Reuses the certificate validation path of the source service; the
//! backend receives the encoded certificate, subject DN and CN as headers
//! and performs its own mapping.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::context::OutboundRequest;
use crate::scheme::{
    Authentication, AuthenticationCommand, AuthenticationScheme, Scheme,
};
use crate::source::{AuthSource, RequestCredentials};
use crate::{Error, Result};

const HEADER_PUBLIC: &str = "x-certificate-public";
const HEADER_DN: &str = "x-certificate-distinguishedname";
const HEADER_CN: &str = "x-certificate-commonname";

/// Command forwarding certificate identity headers.
#[derive(Debug)]
pub struct X509Command {
    encoded: String,
    distinguished_name: String,
    common_name: Option<String>,
    expires_at: DateTime<Utc>,
}

impl AuthenticationCommand for X509Command {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expires_at)
    }

    fn apply(&self, request: &mut OutboundRequest) {
        request.set_header(HEADER_PUBLIC, self.encoded.clone());
        request.set_header(HEADER_DN, self.distinguished_name.clone());
        if let Some(cn) = &self.common_name {
            request.set_header(HEADER_CN, cn.clone());
        }
    }
}

/// The client-certificate scheme implementation.
pub struct X509Scheme;

impl AuthenticationScheme for X509Scheme {
    fn scheme(&self) -> Scheme {
        Scheme::X509
    }

    fn create_command(
        &self,
        _auth: &Authentication,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>> {
        let AuthSource::ClientCert(cert) = credentials.source()? else {
            return Err(Error::SchemeNotSupported(
                "x509 scheme requires a client certificate".to_string(),
            ));
        };
        // Runs the shared validation path (dates, invalidation store).
        credentials.parsed()?;

        Ok(Arc::new(X509Command {
            encoded: cert.encoded(),
            distinguished_name: cert.distinguished_name().to_string(),
            common_name: cert.common_name().map(str::to_string),
            expires_at: cert.not_after(),
        }))
    }
}
