//! Credential extraction, validation and parsing.
//!
//! # Flow
//!
//! 1. [`AuthSourceService::extract_from_request`] picks the highest-priority
//!    credential carrier: gateway cookie, then `Authorization: Bearer`, then
//!    the client-certificate request attribute.
//! 2. [`AuthSourceService::validate`] consults the cluster invalidation
//!    store first, then checks signature and dates.
//! 3. [`AuthSourceService::parse`] decodes claims into a
//!    [`ParsedCredential`] without re-running the checks `validate` already
//!    performed.
//!
//! Personal access tokens carry a dedicated issuer claim and are not
//! translatable to backend credentials; extraction treats them as "no
//! credential present".

use std::cell::OnceCell;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::context::InboundRequest;
use crate::invalidation::InvalidationStore;
use crate::source::{AuthSource, CertificateMapper, CredentialOrigin, ParsedCredential};
use crate::{Error, Result};

/// Claims carried by gateway and legacy-provider tokens.
#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    /// Mainframe user id.
    sub: String,
    /// Issued-at (Unix timestamp).
    iat: i64,
    /// Expiry (Unix timestamp).
    exp: i64,
    /// Issuing system.
    iss: String,
    /// Embedded legacy session token (LTPA), present when the legacy
    /// provider is the active identity source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ltpa: Option<String>,
}

/// Extracts, validates and parses inbound credentials.
pub struct AuthSourceService {
    config: AuthConfig,
    invalidation: Arc<InvalidationStore>,
    mapper: Arc<dyn CertificateMapper>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl AuthSourceService {
    /// Create from configuration plus the invalidation store and the
    /// external certificate mapper.
    #[must_use]
    pub fn new(
        config: AuthConfig,
        invalidation: Arc<InvalidationStore>,
        mapper: Arc<dyn CertificateMapper>,
    ) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
        Self {
            config,
            invalidation,
            mapper,
            encoding_key,
            decoding_key,
        }
    }

    /// Extract the highest-priority credential present on the request.
    ///
    /// Priority: gateway cookie, then bearer header, then client
    /// certificate. A personal access token surfaces as absent.
    #[must_use]
    pub fn extract_from_request(&self, request: &InboundRequest) -> Option<AuthSource> {
        if let Some(token) = request.cookie(&self.config.cookie_name) {
            if !self.is_personal_access_token(token) {
                return Some(AuthSource::Jwt(token.to_string()));
            }
            debug!("Cookie carries a personal access token, not translatable");
        }

        if let Some(token) = request
            .header("authorization")
            .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
        {
            if !self.is_personal_access_token(token) {
                return Some(AuthSource::Jwt(token.to_string()));
            }
            debug!("Bearer header carries a personal access token, not translatable");
        }

        request
            .client_certificate()
            .map(|cert| AuthSource::ClientCert(cert.clone()))
    }

    /// Validate a credential.
    ///
    /// The invalidation store is consulted first: a revoked credential fails
    /// immediately with no further checks. Then signature and dates are
    /// verified, with [`Error::TokenExpired`] for date failures and
    /// [`Error::TokenNotValid`] for everything else.
    pub fn validate(&self, source: &AuthSource) -> Result<()> {
        if self.invalidation.is_invalidated(source.invalidation_key()) {
            return Err(Error::TokenNotValid(
                "Credential has been invalidated".to_string(),
            ));
        }

        match source {
            AuthSource::Jwt(token) => {
                let claims = self.verify_jwt(token)?;
                if claims.iss != self.config.gateway_issuer
                    && claims.iss != self.config.zosmf_issuer
                {
                    return Err(Error::TokenNotValid(format!(
                        "Unknown token issuer: {}",
                        claims.iss
                    )));
                }
                Ok(())
            }
            AuthSource::ClientCert(cert) => {
                let now = Utc::now();
                if now > cert.not_after() {
                    return Err(Error::TokenExpired);
                }
                if now < cert.not_before() {
                    return Err(Error::TokenNotValid(
                        "Certificate is not yet valid".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Parse a credential into normalized claims.
    ///
    /// Decodes without re-verifying what [`validate`](Self::validate)
    /// already checked. For certificate sources the external mapper resolves
    /// the mainframe user id; an unmapped certificate yields
    /// `user_id == None`, not an error.
    pub fn parse(&self, source: &AuthSource) -> Result<ParsedCredential> {
        match source {
            AuthSource::Jwt(token) => {
                let claims = peek_claims(token)?;
                let origin = if claims.iss == self.config.zosmf_issuer {
                    CredentialOrigin::LegacyProvider
                } else if claims.iss == self.config.gateway_issuer {
                    CredentialOrigin::Gateway
                } else {
                    return Err(Error::TokenNotValid(format!(
                        "Unknown token issuer: {}",
                        claims.iss
                    )));
                };
                Ok(ParsedCredential {
                    user_id: Some(claims.sub),
                    created_at: timestamp(claims.iat)?,
                    expires_at: Some(timestamp(claims.exp)?),
                    origin,
                    distinguished_name: None,
                    cert_fingerprint: None,
                })
            }
            AuthSource::ClientCert(cert) => {
                let user_id = self.mapper.map(cert)?;
                if user_id.is_none() {
                    debug!(dn = %cert.distinguished_name(), "Certificate has no mapped mainframe user");
                }
                Ok(ParsedCredential {
                    user_id,
                    created_at: cert.not_before(),
                    expires_at: Some(cert.not_after()),
                    origin: CredentialOrigin::Certificate,
                    distinguished_name: Some(cert.distinguished_name().to_string()),
                    cert_fingerprint: Some(cert.fingerprint().to_string()),
                })
            }
        }
    }

    /// Extract the embedded legacy session token (LTPA) from a token-bearing
    /// source, for backends that only understand the provider's own format.
    pub fn derive_secondary(&self, source: &AuthSource) -> Result<String> {
        let AuthSource::Jwt(token) = source else {
            return Err(Error::TokenNotValid(
                "Certificate sources carry no legacy session token".to_string(),
            ));
        };
        peek_claims(token)?.ltpa.ok_or_else(|| {
            Error::TokenNotValid("Token carries no embedded legacy session token".to_string())
        })
    }

    /// Sign a gateway token for `user_id`, embedding the legacy session
    /// token when the legacy provider issued one at login.
    pub fn issue(&self, user_id: &str, ltpa: Option<String>) -> Result<String> {
        let now = Utc::now();
        let ttl = i64::try_from(self.config.token_ttl_secs)
            .map_err(|_| Error::Config("auth.token_ttl_secs out of range".to_string()))?;
        let claims = TokenClaims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + ttl,
            iss: self.config.gateway_issuer.clone(),
            ltpa,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| Error::TokenNotValid(format!("Failed to sign token: {e}")))
    }

    /// Verify signature and dates of a JWT.
    fn verify_jwt(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.config.leeway_secs;
        validation.validate_aud = false;

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(Error::TokenExpired),
                _ => Err(Error::TokenNotValid(e.to_string())),
            },
        }
    }

    /// True when the token's unverified `iss` claim marks it as a personal
    /// access token.
    fn is_personal_access_token(&self, token: &str) -> bool {
        peek_claims(token).is_ok_and(|claims| claims.iss == self.config.pat_issuer)
    }
}

/// Decode a JWT payload without signature verification.
///
/// Used where `validate` has already run, and for the issuer peek during
/// extraction before any verification is appropriate.
fn peek_claims(token: &str) -> Result<TokenClaims> {
    let parts: Vec<&str> = token.splitn(3, '.').collect();
    if parts.len() != 3 {
        return Err(Error::TokenNotValid("Malformed JWT".to_string()));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| Error::TokenNotValid("Malformed JWT payload".to_string()))?;
    serde_json::from_slice(&payload)
        .map_err(|e| Error::TokenNotValid(format!("Unreadable JWT claims: {e}")))
}

/// Convert a Unix timestamp claim into a UTC datetime.
fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::TokenNotValid("Timestamp claim out of range".to_string()))
}

/// Per-request credential bundle handed to scheme implementations.
///
/// Parsing is lazy: schemes that never look at the credential (bypass) incur
/// no validation work, and schemes that do look see a single validate+parse
/// pass regardless of how often they ask.
pub struct RequestCredentials<'a> {
    service: &'a AuthSourceService,
    source: Option<AuthSource>,
    auth_failure: Option<String>,
    parsed: OnceCell<ParsedCredential>,
}

impl<'a> RequestCredentials<'a> {
    /// Extract credentials and the upstream failure marker from a request.
    #[must_use]
    pub fn from_request(service: &'a AuthSourceService, request: &InboundRequest) -> Self {
        Self {
            service,
            source: service.extract_from_request(request),
            auth_failure: request.auth_failure().map(str::to_string),
            parsed: OnceCell::new(),
        }
    }

    /// Build from an already-extracted source (no failure marker).
    #[must_use]
    pub fn from_source(service: &'a AuthSourceService, source: AuthSource) -> Self {
        Self {
            service,
            source: Some(source),
            auth_failure: None,
            parsed: OnceCell::new(),
        }
    }

    /// Upstream-reported auth failure marker, if the request carried one.
    #[must_use]
    pub fn auth_failure(&self) -> Option<&str> {
        self.auth_failure.as_deref()
    }

    /// The raw source, or [`Error::TokenNotValid`] when the request carried
    /// no credential.
    pub fn source(&self) -> Result<&AuthSource> {
        self.source
            .as_ref()
            .ok_or_else(|| Error::TokenNotValid("No credential present on request".to_string()))
    }

    /// Validate and parse the credential, once per request.
    pub fn parsed(&self) -> Result<ParsedCredential> {
        if let Some(parsed) = self.parsed.get() {
            return Ok(parsed.clone());
        }
        let source = self.source()?;
        self.service.validate(source)?;
        let parsed = self.service.parse(source)?;
        let _ = self.parsed.set(parsed.clone());
        Ok(parsed)
    }

    /// Extract the embedded legacy session token from the credential.
    pub fn derive_secondary(&self) -> Result<String> {
        self.service.derive_secondary(self.source()?)
    }
}
