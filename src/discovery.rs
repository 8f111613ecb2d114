//! Service-registry collaborator seam.
//!
//! Instance discovery, health and metadata storage live outside this crate;
//! the translation core only needs to list the live instances of a service
//! and read two metadata keys off each one. The [`ServiceRegistry`] trait is
//! that narrow view, implemented by the surrounding gateway against its real
//! discovery client and by tests against fixed instance lists.

use std::collections::HashMap;

use crate::scheme::{Authentication, Scheme};

/// Metadata key declaring a service instance's authentication scheme.
/// Absence means "use the registry default scheme".
pub const METADATA_SCHEME: &str = "apiml.authentication.scheme";

/// Metadata key declaring the applid PassTickets for the instance are scoped
/// to.
pub const METADATA_APPLID: &str = "apiml.authentication.applid";

/// A registered instance of a target service.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    /// Unique instance id within the registry.
    pub instance_id: String,
    /// Logical service id this instance belongs to.
    pub service_id: String,
    /// Base URL the instance is reachable at.
    pub base_url: String,
    /// Registration metadata (string-valued).
    pub metadata: HashMap<String, String>,
}

impl ServiceInstance {
    /// Read the instance's declared `{scheme, applid}` tuple from metadata.
    ///
    /// An unrecognized scheme value is carried through as
    /// [`Scheme::Unknown`] so the registry lookup can fail by name instead
    /// of silently falling back to the default.
    #[must_use]
    pub fn authentication(&self) -> Authentication {
        Authentication {
            scheme: self
                .metadata
                .get(METADATA_SCHEME)
                .map(|raw| Scheme::parse(raw)),
            applid: self.metadata.get(METADATA_APPLID).cloned(),
        }
    }
}

/// Read access to the external service registry.
pub trait ServiceRegistry: Send + Sync {
    /// All live instances of a logical service. Empty when unknown.
    fn instances(&self, service_id: &str) -> Vec<ServiceInstance>;

    /// Look up one instance by its registry instance id.
    fn instance(&self, instance_id: &str) -> Option<ServiceInstance>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance_with(metadata: &[(&str, &str)]) -> ServiceInstance {
        ServiceInstance {
            instance_id: "inst-1".to_string(),
            service_id: "svc".to_string(),
            base_url: "https://svc.internal:8443".to_string(),
            metadata: metadata
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    #[test]
    fn authentication_reads_scheme_and_applid() {
        let inst = instance_with(&[
            (METADATA_SCHEME, "httpBasicPassTicket"),
            (METADATA_APPLID, "MVSAPPL"),
        ]);
        let auth = inst.authentication();
        assert_eq!(auth.scheme, Some(Scheme::HttpBasicPassTicket));
        assert_eq!(auth.applid.as_deref(), Some("MVSAPPL"));
    }

    #[test]
    fn missing_scheme_key_means_default() {
        let auth = instance_with(&[]).authentication();
        assert_eq!(auth.scheme, None);
        assert_eq!(auth.applid, None);
    }

    #[test]
    fn unrecognized_scheme_is_preserved_by_name() {
        let auth = instance_with(&[(METADATA_SCHEME, "kerberos")]).authentication();
        assert_eq!(auth.scheme, Some(Scheme::Unknown("kerberos".to_string())));
    }
}
