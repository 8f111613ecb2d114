//! Configuration for the credential-translation core.
//!
//! Loaded from an optional YAML file with `ZAAS_`-prefixed environment
//! overrides, e.g. `ZAAS_AUTH__JWT_SECRET` overrides `auth.jwt_secret`.

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Token and credential-source settings.
    pub auth: AuthConfig,
    /// Legacy identity provider (z/OSMF) settings.
    pub zosmf: ZosmfConfig,
}

/// Token and credential-source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Cookie carrying the gateway token on inbound requests.
    pub cookie_name: String,
    /// Secret used to sign and verify gateway-issued JWTs (HS256).
    pub jwt_secret: String,
    /// `iss` claim of gateway-issued tokens.
    pub gateway_issuer: String,
    /// `iss` claim of tokens issued by the legacy provider.
    pub zosmf_issuer: String,
    /// `iss` claim marking a personal access token. PATs are not translatable
    /// to backend credentials and are treated as "no credential present".
    pub pat_issuer: String,
    /// Validity of a gateway-issued token, in seconds.
    pub token_ttl_secs: u64,
    /// Validity of a generated PassTicket, in seconds. Command expiry is the
    /// earlier of this and the credential's own expiry.
    pub passticket_ttl_secs: u64,
    /// Clock-skew tolerance for token date checks, in seconds.
    pub leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "apimlAuthenticationToken".to_string(),
            jwt_secret: String::new(),
            gateway_issuer: "APIML".to_string(),
            zosmf_issuer: "zOSMF".to_string(),
            pat_issuer: "APIML_PAT".to_string(),
            token_ttl_secs: 8 * 60 * 60,
            passticket_ttl_secs: 540,
            leeway_secs: 60,
        }
    }
}

impl AuthConfig {
    /// PassTicket validity as a [`Duration`].
    #[must_use]
    pub fn passticket_ttl(&self) -> Duration {
        Duration::from_secs(self.passticket_ttl_secs)
    }
}

/// Legacy identity provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZosmfConfig {
    /// Service id the provider is registered under in the service registry.
    pub service_id: String,
    /// Name of the provider's session cookie set on outbound requests.
    pub session_cookie: String,
    /// How long a fetched `{version, realm}` descriptor stays cached, in
    /// seconds. Shorter-lived than the protocol-implementation cache.
    pub info_ttl_secs: u64,
    /// Whether z/OSMF is the active identity provider. The z/OSMF scheme
    /// degrades with a diagnostic header when this is false.
    pub active_provider: bool,
}

impl Default for ZosmfConfig {
    fn default() -> Self {
        Self {
            service_id: "zosmf".to_string(),
            session_cookie: "LtpaToken2".to_string(),
            info_ttl_secs: 3600,
            active_provider: true,
        }
    }
}

impl ZosmfConfig {
    /// Descriptor cache TTL as a [`Duration`].
    #[must_use]
    pub fn info_ttl(&self) -> Duration {
        Duration::from_secs(self.info_ttl_secs)
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus `ZAAS_` env
    /// overrides (`__` separates nesting levels).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("ZAAS_").split("__"))
            .extract()
            .map_err(|e| Error::Config(format!("Failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on settings that would only surface as confusing runtime
    /// auth failures.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(Error::Config("auth.jwt_secret must be set".to_string()));
        }
        if self.auth.gateway_issuer == self.auth.zosmf_issuer {
            return Err(Error::Config(
                "auth.gateway_issuer and auth.zosmf_issuer must differ".to_string(),
            ));
        }
        if self.zosmf.service_id.is_empty() {
            return Err(Error::Config("zosmf.service_id must be set".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            auth: AuthConfig {
                jwt_secret: "test-secret".to_string(),
                ..AuthConfig::default()
            },
            zosmf: ZosmfConfig::default(),
        }
    }

    #[test]
    fn defaults_match_gateway_conventions() {
        let auth = AuthConfig::default();
        assert_eq!(auth.cookie_name, "apimlAuthenticationToken");
        assert_eq!(auth.passticket_ttl_secs, 540);

        let zosmf = ZosmfConfig::default();
        assert_eq!(zosmf.session_cookie, "LtpaToken2");
        assert!(zosmf.active_provider);
    }

    #[test]
    fn validate_rejects_empty_secret() {
        let mut config = valid_config();
        config.auth.jwt_secret.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_colliding_issuers() {
        let mut config = valid_config();
        config.auth.zosmf_issuer = config.auth.gateway_issuer.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_defaults_with_secret() {
        assert!(valid_config().validate().is_ok());
    }
}
