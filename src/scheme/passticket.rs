//! PassTicket scheme — one-time Basic credentials for SAF-protected
//! backends.
//!
//! Requires a mapped mainframe user id and a declared applid. The generated
//! `user:ticket` pair travels as a `Basic` Authorization header; the gateway
//! cookie is stripped so the two auth styles never reach the backend
//! together.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use crate::config::AuthConfig;
use crate::context::OutboundRequest;
use crate::scheme::{
    Authentication, AuthenticationCommand, AuthenticationScheme, Scheme,
};
use crate::source::RequestCredentials;
use crate::{Error, Result};

/// External one-time-credential generator (the mainframe security
/// interface, invoked through this narrow contract).
pub trait PassTicketGenerator: Send + Sync {
    /// Generate a PassTicket for `(user_id, applid)`. The error string is a
    /// generator-reported reason, wrapped into a typed failure by the
    /// scheme.
    fn generate(&self, user_id: &str, applid: &str) -> std::result::Result<String, String>;
}

/// Command applying a `Basic user:ticket` Authorization header.
#[derive(Debug)]
pub struct PassTicketCommand {
    authorization: String,
    gateway_cookie: String,
    expires_at: DateTime<Utc>,
}

impl AuthenticationCommand for PassTicketCommand {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        Some(self.expires_at)
    }

    fn apply(&self, request: &mut OutboundRequest) {
        request.set_header("authorization", self.authorization.clone());
        request.remove_cookie(&self.gateway_cookie);
    }
}

/// The PassTicket scheme implementation.
pub struct PassTicketScheme {
    config: AuthConfig,
    generator: Arc<dyn PassTicketGenerator>,
}

impl PassTicketScheme {
    /// Create from configuration and the external generator.
    #[must_use]
    pub fn new(config: AuthConfig, generator: Arc<dyn PassTicketGenerator>) -> Self {
        Self { config, generator }
    }
}

impl AuthenticationScheme for PassTicketScheme {
    fn scheme(&self) -> Scheme {
        Scheme::HttpBasicPassTicket
    }

    fn create_command(
        &self,
        auth: &Authentication,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>> {
        // Always rejects on credential failure; no degraded mode here.
        let parsed = credentials.parsed()?;
        let user_id = parsed.require_user_id()?;

        let applid = auth.applid.as_deref().ok_or_else(|| {
            Error::SchemeNotSupported(
                "PassTicket scheme requires an applid in the service declaration".to_string(),
            )
        })?;

        let ticket = self.generator.generate(user_id, applid).map_err(|message| {
            Error::CredentialGenerationFailed {
                user: user_id.to_string(),
                applid: applid.to_string(),
                message,
            }
        })?;

        let ttl = TimeDelta::seconds(
            i64::try_from(self.config.passticket_ttl_secs)
                .map_err(|_| Error::Config("auth.passticket_ttl_secs out of range".to_string()))?,
        );
        let mut expires_at = Utc::now() + ttl;
        if let Some(credential_expiry) = parsed.expires_at {
            expires_at = expires_at.min(credential_expiry);
        }

        debug!(user = %user_id, applid = %applid, "Generated PassTicket command");
        let encoded = BASE64.encode(format!("{user_id}:{ticket}"));
        Ok(Arc::new(PassTicketCommand {
            authorization: format!("Basic {encoded}"),
            gateway_cookie: self.config.cookie_name.clone(),
            expires_at,
        }))
    }
}
