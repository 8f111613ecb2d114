//! Authentication schemes and the dispatch registry.
//!
//! A scheme turns a target service's declared `{scheme, applid}` tuple plus
//! the request's credentials into an [`AuthenticationCommand`] — the unit of
//! work that decorates the outbound request with the translated credential.
//!
//! The registry is an explicit map populated at process start from a fixed
//! list of implementations. Construction fails fast on a duplicate scheme id
//! or anything other than exactly one implementation flagged as default.

pub mod bypass;
pub mod passticket;
pub mod x509;
pub mod zosmf;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{AUTH_FAIL_HEADER, OutboundRequest};
use crate::source::RequestCredentials;
use crate::{Error, Result};

/// Scheme identifier, matching the string values services declare in their
/// registration metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// No credential translation; forward the request untouched.
    Bypass,
    /// Forward the gateway's own JWT.
    ZoweJwt,
    /// Substitute the legacy provider's session cookie.
    Zosmf,
    /// Substitute a Basic header built from a generated PassTicket.
    HttpBasicPassTicket,
    /// Forward client-certificate identity headers.
    X509,
    /// A metadata value with no registered implementation. Carried by name
    /// so the lookup failure can say what was asked for.
    Unknown(String),
}

impl Scheme {
    /// Parse a metadata value into a scheme identifier.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "bypass" => Self::Bypass,
            "zoweJwt" => Self::ZoweJwt,
            "zosmf" => Self::Zosmf,
            "httpBasicPassTicket" => Self::HttpBasicPassTicket,
            "x509" => Self::X509,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The metadata string value for this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bypass => "bypass",
            Self::ZoweJwt => "zoweJwt",
            Self::Zosmf => "zosmf",
            Self::HttpBasicPassTicket => "httpBasicPassTicket",
            Self::X509 => "x509",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target service's authentication declaration, read from its registration
/// metadata. A `None` scheme resolves to the registry default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authentication {
    /// Declared scheme, if any.
    pub scheme: Option<Scheme>,
    /// Declared applid, if any.
    pub applid: Option<String>,
}

impl Authentication {
    /// Declaration with neither scheme nor applid (registry default).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            scheme: None,
            applid: None,
        }
    }
}

/// The unit of work that decorates an outbound request with the translated
/// credential.
pub trait AuthenticationCommand: Send + Sync + fmt::Debug {
    /// When the command's artifact stops being usable. `None` means the
    /// command never expires by clock, though it may still be evicted.
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Whether the command must not be reused once its originating
    /// credential fails re-validation.
    fn requires_valid_source(&self) -> bool {
        false
    }

    /// Marker for the load-balanced fallback: resolution is deferred until
    /// the routing layer has picked a concrete instance.
    fn is_deferred(&self) -> bool {
        false
    }

    /// Mutate the outbound request's headers/cookies.
    fn apply(&self, request: &mut OutboundRequest);

    /// True iff `expires_at` is non-null and in the past.
    fn is_expired(&self) -> bool {
        self.expires_at().is_some_and(|at| at < Utc::now())
    }
}

/// A scheme implementation.
///
/// Credentials are supplied lazily through [`RequestCredentials`]; schemes
/// that never need them (bypass) trigger no validation work.
pub trait AuthenticationScheme: Send + Sync {
    /// The identifier this implementation serves.
    fn scheme(&self) -> Scheme;

    /// Whether this implementation handles declarations without a scheme.
    fn is_default(&self) -> bool {
        false
    }

    /// Build the command for a declaration and the current request's
    /// credentials.
    fn create_command(
        &self,
        auth: &Authentication,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>>;
}

/// An immediately-expired command that surfaces an auth failure as a
/// diagnostic header on the outbound request instead of aborting the call.
#[derive(Debug)]
pub struct AuthFailureCommand {
    code: String,
    expired_at: DateTime<Utc>,
}

impl AuthFailureCommand {
    /// Wrap a failure code (or an upstream-reported marker) in a command.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            expired_at: Utc::now(),
        }
    }

    /// Build from a typed failure, using its diagnostic code.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::new(error.failure_code())
    }
}

impl AuthenticationCommand for AuthFailureCommand {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expired_at)
    }

    fn apply(&self, request: &mut OutboundRequest) {
        request.set_header(AUTH_FAIL_HEADER, self.code.clone());
    }
}

/// Dispatch table from scheme identifier to implementation.
pub struct SchemeRegistry {
    schemes: HashMap<Scheme, Arc<dyn AuthenticationScheme>>,
    default: Scheme,
}

impl SchemeRegistry {
    /// Build the registry from a fixed list of implementations.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate scheme identifier, on zero implementations
    /// flagged default, or on more than one flagged default.
    pub fn new(implementations: Vec<Arc<dyn AuthenticationScheme>>) -> Result<Self> {
        let mut schemes: HashMap<Scheme, Arc<dyn AuthenticationScheme>> = HashMap::new();
        let mut default: Option<Scheme> = None;

        for implementation in implementations {
            let scheme = implementation.scheme();
            if implementation.is_default() {
                if let Some(existing) = default {
                    return Err(Error::MultipleDefaultSchemes(existing, scheme));
                }
                default = Some(scheme.clone());
            }
            if schemes.insert(scheme.clone(), implementation).is_some() {
                return Err(Error::DuplicateScheme(scheme));
            }
        }

        let default = default.ok_or(Error::NoDefaultScheme)?;
        Ok(Self { schemes, default })
    }

    /// Resolve a declaration to its implementation. A missing scheme uses
    /// the default; an unknown scheme is a named lookup failure, never a
    /// silent fallback.
    pub fn resolve(&self, auth: &Authentication) -> Result<&Arc<dyn AuthenticationScheme>> {
        let scheme = match &auth.scheme {
            None => &self.default,
            Some(Scheme::Unknown(name)) => return Err(Error::UnknownScheme(name.clone())),
            Some(scheme) => scheme,
        };
        self.schemes
            .get(scheme)
            .ok_or_else(|| Error::UnknownScheme(scheme.to_string()))
    }

    /// The identifier of the default implementation.
    #[must_use]
    pub fn default_scheme(&self) -> &Scheme {
        &self.default
    }
}
