//! Protocol implementations for the legacy identity provider.
//!
//! Two variants exist in the field:
//!
//! - [`AuthEndpointProtocol`] (version 27 and later): a dedicated
//!   `/zosmf/services/authenticate` endpoint issues and revokes session
//!   tokens.
//! - [`InfoEndpointProtocol`] (older levels): authentication piggybacks on
//!   `/zosmf/info`, and explicit invalidation does not exist — it is a
//!   logged no-op and the session simply ages out on the provider side.
//!
//! Both return provider cookies (`jwtToken`, `LtpaToken2`) via `Set-Cookie`.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::SET_COOKIE;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Cookie names the provider issues.
const COOKIE_JWT: &str = "jwtToken";
const COOKIE_LTPA: &str = "LtpaToken2";

/// CSRF header every provider call must carry.
const CSRF_HEADER: &str = "X-CSRF-ZOSMF-HEADER";

/// A provider session, as returned by authenticate.
#[derive(Debug, Clone, Default)]
pub struct ZosmfSession {
    /// The provider's JWT cookie, when the level issues one.
    pub jwt: Option<String>,
    /// The LTPA session cookie.
    pub ltpa: Option<String>,
}

impl ZosmfSession {
    /// The cookie pair to present on follow-up calls, preferring the JWT.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if let Some(jwt) = &self.jwt {
            return Some(format!("{COOKIE_JWT}={jwt}"));
        }
        self.ltpa
            .as_ref()
            .map(|ltpa| format!("{COOKIE_LTPA}={ltpa}"))
    }
}

/// One provider protocol variant.
#[async_trait]
pub trait ZosmfProtocol: Send + Sync {
    /// Whether this implementation speaks the protocol of `version`.
    fn is_supported(&self, version: i32) -> bool;

    /// Authenticate with user credentials, returning the provider session.
    async fn authenticate(&self, base_url: &str, user: &str, password: &str)
    -> Result<ZosmfSession>;

    /// Check that a session is still accepted by the provider.
    async fn validate(&self, base_url: &str, session: &ZosmfSession) -> Result<()>;

    /// Revoke a session at the provider.
    async fn invalidate(&self, base_url: &str, session: &ZosmfSession) -> Result<()>;
}

/// Extract a named cookie value from a response's `Set-Cookie` headers.
fn extract_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| parse_set_cookie(raw, name))
}

/// Pull `name=value` out of a raw `Set-Cookie` line.
fn parse_set_cookie(raw: &str, name: &str) -> Option<String> {
    let (cookie_name, rest) = raw.split_once('=')?;
    if cookie_name.trim() != name {
        return None;
    }
    let value = rest.split(';').next()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:{password}")))
}

fn session_from(response: &reqwest::Response) -> ZosmfSession {
    ZosmfSession {
        jwt: extract_cookie(response, COOKIE_JWT),
        ltpa: extract_cookie(response, COOKIE_LTPA),
    }
}

fn check_auth_status(status: StatusCode) -> Result<()> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::TokenNotValid(
            "Provider rejected the session".to_string(),
        ));
    }
    if !status.is_success() {
        return Err(Error::ProviderUnreachable(format!(
            "Provider returned {status}"
        )));
    }
    Ok(())
}

/// Modern protocol: dedicated authenticate endpoint.
pub struct AuthEndpointProtocol {
    http: Client,
}

impl AuthEndpointProtocol {
    /// Version level at which the authenticate endpoint appeared.
    pub const MIN_VERSION: i32 = 27;

    /// Create with a configured HTTP client.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn endpoint(base_url: &str) -> String {
        format!("{}/zosmf/services/authenticate", base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ZosmfProtocol for AuthEndpointProtocol {
    fn is_supported(&self, version: i32) -> bool {
        version >= Self::MIN_VERSION
    }

    async fn authenticate(
        &self,
        base_url: &str,
        user: &str,
        password: &str,
    ) -> Result<ZosmfSession> {
        let response = self
            .http
            .post(Self::endpoint(base_url))
            .header(CSRF_HEADER, "")
            .header("authorization", basic_auth(user, password))
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;
        check_auth_status(response.status())?;
        Ok(session_from(&response))
    }

    async fn validate(&self, base_url: &str, session: &ZosmfSession) -> Result<()> {
        let cookie = session.cookie_header().ok_or_else(|| {
            Error::TokenNotValid("Session carries no provider cookie".to_string())
        })?;
        let response = self
            .http
            .post(Self::endpoint(base_url))
            .header(CSRF_HEADER, "")
            .header("cookie", cookie)
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;
        check_auth_status(response.status())
    }

    async fn invalidate(&self, base_url: &str, session: &ZosmfSession) -> Result<()> {
        let cookie = session.cookie_header().ok_or_else(|| {
            Error::TokenNotValid("Session carries no provider cookie".to_string())
        })?;
        let response = self
            .http
            .delete(Self::endpoint(base_url))
            .header(CSRF_HEADER, "")
            .header("cookie", cookie)
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;
        debug!(status = %response.status(), "Provider session invalidated");
        check_auth_status(response.status())
    }
}

/// Legacy protocol: the info endpoint doubles as the authenticate and
/// validate endpoint. No explicit invalidation exists at this level.
pub struct InfoEndpointProtocol {
    http: Client,
}

impl InfoEndpointProtocol {
    /// Create with a configured HTTP client.
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn endpoint(base_url: &str) -> String {
        format!("{}/zosmf/info", base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ZosmfProtocol for InfoEndpointProtocol {
    fn is_supported(&self, version: i32) -> bool {
        version < AuthEndpointProtocol::MIN_VERSION
    }

    async fn authenticate(
        &self,
        base_url: &str,
        user: &str,
        password: &str,
    ) -> Result<ZosmfSession> {
        let response = self
            .http
            .get(Self::endpoint(base_url))
            .header(CSRF_HEADER, "")
            .header("authorization", basic_auth(user, password))
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;
        check_auth_status(response.status())?;
        Ok(session_from(&response))
    }

    async fn validate(&self, base_url: &str, session: &ZosmfSession) -> Result<()> {
        let cookie = session.cookie_header().ok_or_else(|| {
            Error::TokenNotValid("Session carries no provider cookie".to_string())
        })?;
        let response = self
            .http
            .get(Self::endpoint(base_url))
            .header(CSRF_HEADER, "")
            .header("cookie", cookie)
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;
        check_auth_status(response.status())
    }

    async fn invalidate(&self, _base_url: &str, _session: &ZosmfSession) -> Result<()> {
        // This provider level has no invalidate endpoint; the session ages
        // out on the provider side.
        warn!("Provider level does not support explicit invalidation, skipping");
        Ok(())
    }
}
