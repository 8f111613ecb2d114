//! z/OSMF scheme — substitutes the legacy provider's own session cookie.
//!
//! Branches on the credential's origin:
//!
//! - legacy-provider-issued token: forwarded as-is as the provider's JWT
//!   cookie (z/OSMF accepts its own token back),
//! - gateway-issued token: the embedded legacy session token (LTPA) is
//!   extracted and sent as the provider's session cookie,
//! - anything else: degrades into a diagnostic header instead of aborting,
//!   because this scheme is expected to be configured while a different
//!   identity provider is active.
//!
//! An upstream-reported auth failure on the inbound request short-circuits
//! into an immediately-expired failure command so a bad client request is
//! never retried against the backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{AuthConfig, ZosmfConfig};
use crate::context::OutboundRequest;
use crate::scheme::{
    AuthFailureCommand, Authentication, AuthenticationCommand, AuthenticationScheme, Scheme,
};
use crate::source::{CredentialOrigin, RequestCredentials};
use crate::{Error, Result};

/// Cookie name z/OSMF accepts its own JWT back under.
const ZOSMF_JWT_COOKIE: &str = "jwtToken";

/// Command swapping the gateway cookie for a provider cookie.
#[derive(Debug)]
pub struct ZosmfCommand {
    cookie_name: String,
    cookie_value: String,
    gateway_cookie: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AuthenticationCommand for ZosmfCommand {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    fn requires_valid_source(&self) -> bool {
        // The cookie replays the inbound credential; it must not outlive it.
        true
    }

    fn apply(&self, request: &mut OutboundRequest) {
        request.remove_cookie(&self.gateway_cookie);
        request.remove_header("authorization");
        request.set_cookie(self.cookie_name.clone(), self.cookie_value.clone());
    }
}

/// The z/OSMF scheme implementation.
pub struct ZosmfScheme {
    auth: AuthConfig,
    zosmf: ZosmfConfig,
}

impl ZosmfScheme {
    /// Create from configuration.
    #[must_use]
    pub fn new(auth: AuthConfig, zosmf: ZosmfConfig) -> Self {
        Self { auth, zosmf }
    }

    /// Wrap a failure into the degraded (header-carrying) command.
    fn degrade(error: &Error) -> Arc<dyn AuthenticationCommand> {
        debug!(code = error.failure_code(), "z/OSMF scheme degrading to failure header");
        Arc::new(AuthFailureCommand::from_error(error))
    }
}

impl AuthenticationScheme for ZosmfScheme {
    fn scheme(&self) -> Scheme {
        Scheme::Zosmf
    }

    fn create_command(
        &self,
        _auth: &Authentication,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>> {
        if let Some(marker) = credentials.auth_failure() {
            return Ok(Arc::new(AuthFailureCommand::new(marker)));
        }

        if !self.zosmf.active_provider {
            return Ok(Self::degrade(&Error::SchemeNotSupported(
                "z/OSMF is not the active identity provider".to_string(),
            )));
        }

        let parsed = match credentials.parsed() {
            Ok(parsed) => parsed,
            Err(error) => return Ok(Self::degrade(&error)),
        };

        match parsed.origin {
            CredentialOrigin::LegacyProvider => {
                let crate::source::AuthSource::Jwt(token) = credentials.source()? else {
                    return Ok(Self::degrade(&Error::SchemeNotSupported(
                        "Certificate sources cannot be forwarded to z/OSMF".to_string(),
                    )));
                };
                Ok(Arc::new(ZosmfCommand {
                    cookie_name: ZOSMF_JWT_COOKIE.to_string(),
                    cookie_value: token.clone(),
                    gateway_cookie: self.auth.cookie_name.clone(),
                    expires_at: parsed.expires_at,
                }))
            }
            CredentialOrigin::Gateway => match credentials.derive_secondary() {
                Ok(ltpa) => Ok(Arc::new(ZosmfCommand {
                    cookie_name: self.zosmf.session_cookie.clone(),
                    cookie_value: ltpa,
                    gateway_cookie: self.auth.cookie_name.clone(),
                    expires_at: parsed.expires_at,
                })),
                Err(error) => Ok(Self::degrade(&error)),
            },
            CredentialOrigin::Certificate => Ok(Self::degrade(&Error::SchemeNotSupported(
                "z/OSMF scheme does not translate certificate credentials".to_string(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AUTH_FAIL_HEADER, InboundRequest};
    use crate::invalidation::InvalidationStore;
    use crate::source::{AuthSource, AuthSourceService, CertificateMapper, ClientCertificate};

    struct NoMapper;

    impl CertificateMapper for NoMapper {
        fn map(&self, _cert: &ClientCertificate) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "unit-test-secret".to_string(),
            ..AuthConfig::default()
        }
    }

    fn source_service() -> AuthSourceService {
        AuthSourceService::new(
            auth_config(),
            Arc::new(InvalidationStore::new()),
            Arc::new(NoMapper),
        )
    }

    fn scheme() -> ZosmfScheme {
        ZosmfScheme::new(auth_config(), ZosmfConfig::default())
    }

    fn zosmf_issued_token() -> String {
        // Signed with the shared secret but carrying the provider issuer.
        use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
        let now = Utc::now().timestamp();
        encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({
                "sub": "USER01",
                "iat": now,
                "exp": now + 3600,
                "iss": "zOSMF",
            }),
            &EncodingKey::from_secret(b"unit-test-secret"),
        )
        .unwrap()
    }

    #[test]
    fn gateway_token_is_translated_to_session_cookie() {
        let service = source_service();
        let token = service.issue("USER01", Some("ltpa-value".to_string())).unwrap();
        let creds = RequestCredentials::from_source(&service, AuthSource::Jwt(token));

        let command = scheme().create_command(&Authentication::empty(), &creds).unwrap();
        assert!(command.requires_valid_source());

        let mut request = OutboundRequest::new();
        request.set_cookie("apimlAuthenticationToken", "gw");
        request.set_header("authorization", "Bearer gw");
        command.apply(&mut request);

        assert_eq!(request.cookie("LtpaToken2"), Some("ltpa-value"));
        assert_eq!(request.cookie("apimlAuthenticationToken"), None);
        assert_eq!(request.header("authorization"), None);
    }

    #[test]
    fn provider_token_is_forwarded_as_jwt_cookie() {
        let service = source_service();
        let token = zosmf_issued_token();
        let creds =
            RequestCredentials::from_source(&service, AuthSource::Jwt(token.clone()));

        let command = scheme().create_command(&Authentication::empty(), &creds).unwrap();

        let mut request = OutboundRequest::new();
        command.apply(&mut request);
        assert_eq!(request.cookie("jwtToken"), Some(token.as_str()));
    }

    #[test]
    fn gateway_token_without_ltpa_degrades_to_header() {
        let service = source_service();
        let token = service.issue("USER01", None).unwrap();
        let creds = RequestCredentials::from_source(&service, AuthSource::Jwt(token));

        let command = scheme().create_command(&Authentication::empty(), &creds).unwrap();
        assert!(command.is_expired());

        let mut request = OutboundRequest::new();
        command.apply(&mut request);
        assert!(request.header(AUTH_FAIL_HEADER).is_some());
    }

    #[test]
    fn inactive_provider_degrades_instead_of_erroring() {
        let service = source_service();
        let token = service.issue("USER01", Some("ltpa".to_string())).unwrap();
        let creds = RequestCredentials::from_source(&service, AuthSource::Jwt(token));

        let inactive = ZosmfScheme::new(
            auth_config(),
            ZosmfConfig {
                active_provider: false,
                ..ZosmfConfig::default()
            },
        );
        let command = inactive.create_command(&Authentication::empty(), &creds).unwrap();

        let mut request = OutboundRequest::new();
        command.apply(&mut request);
        assert_eq!(request.header(AUTH_FAIL_HEADER), Some("ZWEAG164E"));
    }

    #[test]
    fn upstream_failure_marker_short_circuits() {
        let service = source_service();
        let request = InboundRequest::new().with_header(AUTH_FAIL_HEADER, "ZWEAG102E");
        let creds = RequestCredentials::from_request(&service, &request);

        let command = scheme().create_command(&Authentication::empty(), &creds).unwrap();
        assert!(command.is_expired(), "failure command must never be cached as live");

        let mut outbound = OutboundRequest::new();
        command.apply(&mut outbound);
        assert_eq!(outbound.header(AUTH_FAIL_HEADER), Some("ZWEAG102E"));
    }

    #[test]
    fn invalid_token_degrades_with_its_failure_code() {
        let service = source_service();
        let creds = RequestCredentials::from_source(
            &service,
            AuthSource::Jwt("garbage".to_string()),
        );

        let command = scheme().create_command(&Authentication::empty(), &creds).unwrap();
        let mut request = OutboundRequest::new();
        command.apply(&mut request);
        assert_eq!(request.header(AUTH_FAIL_HEADER), Some("ZWEAG102E"));
    }
}
