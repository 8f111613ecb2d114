//! Bypass scheme — no credential translation.
//!
//! The default when a service declares no scheme, and the fail-open answer
//! for unknown services: the request is forwarded untouched and the routing
//! layer fails independently if the service truly does not exist.

use std::sync::Arc;

use crate::context::OutboundRequest;
use crate::scheme::{
    Authentication, AuthenticationCommand, AuthenticationScheme, Scheme,
};
use crate::source::RequestCredentials;
use crate::Result;

/// A no-op, never-expiring command.
#[derive(Debug)]
pub struct BypassCommand;

impl AuthenticationCommand for BypassCommand {
    fn apply(&self, _request: &mut OutboundRequest) {}
}

/// The bypass scheme implementation. Marked default.
pub struct BypassScheme;

impl AuthenticationScheme for BypassScheme {
    fn scheme(&self) -> Scheme {
        Scheme::Bypass
    }

    fn is_default(&self) -> bool {
        true
    }

    fn create_command(
        &self,
        _auth: &Authentication,
        _credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>> {
        Ok(Arc::new(BypassCommand))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::invalidation::InvalidationStore;
    use crate::source::{AuthSourceService, CertificateMapper, ClientCertificate};

    struct NoMapper;

    impl CertificateMapper for NoMapper {
        fn map(&self, _cert: &ClientCertificate) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn bypass_command_never_expires_and_mutates_nothing() {
        let config = AuthConfig {
            jwt_secret: "s".to_string(),
            ..AuthConfig::default()
        };
        let service = AuthSourceService::new(
            config,
            Arc::new(InvalidationStore::new()),
            Arc::new(NoMapper),
        );
        // No credential at all: bypass must not care.
        let creds = RequestCredentials::from_request(&service, &crate::context::InboundRequest::new());

        let command = BypassScheme
            .create_command(&Authentication::empty(), &creds)
            .unwrap();
        assert!(!command.is_expired());
        assert!(command.expires_at().is_none());
        assert!(!command.requires_valid_source());

        let mut request = OutboundRequest::new();
        let before = format!("{request:?}");
        command.apply(&mut request);
        assert_eq!(before, format!("{request:?}"));
    }
}
