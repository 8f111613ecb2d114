//! Error types for the credential-translation core.
//!
//! Expected, frequent outcomes (unmapped certificate, scheme mismatch) are
//! modeled as error-kind values rather than panics; the surrounding gateway
//! translates them into status codes and diagnostic headers.

use thiserror::Error;

use crate::scheme::Scheme;

/// Result type alias for the credential-translation core.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed failures raised while translating credentials.
#[derive(Error, Debug)]
pub enum Error {
    /// The inbound credential is structurally invalid, has a bad signature,
    /// or has been invalidated cluster-wide.
    #[error("Token is not valid: {0}")]
    TokenNotValid(String),

    /// The inbound credential's signature is fine but its expiry has passed.
    #[error("Token has expired")]
    TokenExpired,

    /// A client certificate was valid but no mainframe identity could be
    /// mapped to it. Distinct from an invalid certificate.
    #[error("No mainframe user is mapped to certificate {dn}")]
    UserNotMapped {
        /// Subject distinguished name of the unmapped certificate.
        dn: String,
    },

    /// The requested scheme cannot serve the current configuration, e.g. the
    /// z/OSMF scheme while a different identity provider is active.
    #[error("Authentication scheme is not supported for this configuration: {0}")]
    SchemeNotSupported(String),

    /// The one-time-credential generator failed. Carries user and applid for
    /// diagnostics instead of a raw backend trace.
    #[error("Failed to generate PassTicket for user {user} and applid {applid}: {message}")]
    CredentialGenerationFailed {
        /// Mainframe user id the PassTicket was requested for.
        user: String,
        /// Application id the PassTicket was scoped to.
        applid: String,
        /// Generator-reported reason.
        message: String,
    },

    /// The legacy identity provider could not be reached.
    #[error("Legacy identity provider unreachable: {0}")]
    ProviderUnreachable(String),

    /// The legacy identity provider reported a version no registered protocol
    /// implementation supports.
    #[error("Unknown legacy identity provider version: {version}")]
    ProviderVersionUnknown {
        /// Version reported by the provider's info endpoint.
        version: i32,
    },

    /// A service declared an authentication scheme with no registered
    /// implementation. Never silently falls back to the default.
    #[error("No implementation registered for scheme {0}")]
    UnknownScheme(String),

    /// Registry construction found no implementation flagged as default.
    #[error("Invalid scheme registry: no scheme marked default")]
    NoDefaultScheme,

    /// Registry construction found more than one implementation flagged as
    /// default.
    #[error("Invalid scheme registry: multiple schemes marked default: {0} and {1}")]
    MultipleDefaultSchemes(Scheme, Scheme),

    /// Registry construction found two implementations claiming the same
    /// scheme identifier.
    #[error("Invalid scheme registry: multiple implementations for scheme {0}")]
    DuplicateScheme(Scheme),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error talking to the legacy provider or a peer gateway.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Diagnostic code written into the auth-failure response header when a
    /// scheme degrades instead of aborting the call.
    #[must_use]
    pub fn failure_code(&self) -> &'static str {
        match self {
            Self::TokenExpired => "ZWEAG103E",
            Self::TokenNotValid(_) => "ZWEAG102E",
            Self::UserNotMapped { .. } => "ZWEAG161E",
            Self::SchemeNotSupported(_) => "ZWEAG164E",
            Self::CredentialGenerationFailed { .. } => "ZWEAG141E",
            Self::ProviderUnreachable(_) | Self::ProviderVersionUnknown { .. } => "ZWEAG109E",
            _ => "ZWEAG100E",
        }
    }
}
