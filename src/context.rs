//! Explicit request context objects.
//!
//! The surrounding proxy owns the real HTTP types; the translation core only
//! ever reads a handful of headers/cookies from the inbound request and
//! writes headers/cookies onto the outbound one. Both sides are modeled as
//! plain maps passed by reference through every call that needs them — there
//! is no ambient or thread-local request state in this crate.

use std::collections::HashMap;

use crate::source::cert::ClientCertificate;

/// Header carrying an upstream-reported authentication failure. When present
/// on the inbound request, schemes short-circuit instead of retrying auth
/// against the backend; when a scheme degrades, it sets the same header on
/// the outbound request.
pub const AUTH_FAIL_HEADER: &str = "x-zowe-auth-failure";

/// Read-only view of the inbound request.
///
/// Header names are matched case-insensitively (stored lowercased).
#[derive(Debug, Default, Clone)]
pub struct InboundRequest {
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    client_certificate: Option<ClientCertificate>,
}

impl InboundRequest {
    /// Create an empty inbound request (no credentials attached).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, lowercasing the name.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set a cookie. Cookie names are case-sensitive per RFC 6265.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Attach the verified client certificate the TLS layer handed in.
    #[must_use]
    pub fn with_client_certificate(mut self, cert: ClientCertificate) -> Self {
        self.client_certificate = Some(cert);
        self
    }

    /// Look up a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Look up a cookie value by exact name.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The client certificate attribute, if the TLS layer attached one.
    #[must_use]
    pub fn client_certificate(&self) -> Option<&ClientCertificate> {
        self.client_certificate.as_ref()
    }

    /// Upstream-reported auth failure marker, if present.
    #[must_use]
    pub fn auth_failure(&self) -> Option<&str> {
        self.header(AUTH_FAIL_HEADER)
    }
}

/// Mutable view of the outbound request that commands decorate.
///
/// The proxy layer renders `cookies` into a `Cookie` header after all
/// commands have been applied, so cookie removal here really removes the
/// value from the forwarded request.
#[derive(Debug, Default, Clone)]
pub struct OutboundRequest {
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
}

impl OutboundRequest {
    /// Create an empty outbound request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the inbound request's headers and cookies, the state the
    /// proxy would forward unchanged if no command ran.
    #[must_use]
    pub fn from_inbound(inbound: &InboundRequest) -> Self {
        Self {
            headers: inbound.headers.clone(),
            cookies: inbound.cookies.clone(),
        }
    }

    /// Set (or replace) a header.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Remove a header. No-op if absent.
    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(&name.to_ascii_lowercase());
    }

    /// Set (or replace) a cookie.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Remove a cookie. No-op if absent.
    pub fn remove_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    /// Look up a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Look up a cookie value by exact name.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}
