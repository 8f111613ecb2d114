//! Per-service command resolution and caching.
//!
//! [`ServiceAuthenticationService::get_command`] reduces the declared
//! `{scheme, applid}` tuples across a service's live instances:
//!
//! - no instances: fail open to the bypass command (the routing layer fails
//!   on its own terms),
//! - one distinct tuple: build or reuse a cached command for
//!   `(service_id, scheme, applid)`,
//! - disagreeing tuples (transitional or misconfigured): return the
//!   [`LoadBalancerCommand`] marker; the routing pipeline resolves the
//!   chosen instance later via
//!   [`ServiceAuthenticationService::get_command_for_instance`], fresh each
//!   time and never cached.
//!
//! The cache never serves a stale artifact: an expired entry observed on
//! lookup is evicted and rebuilt synchronously, exactly once — a freshly
//! built command that is still expired (the credential itself ran out) is
//! the final answer. Commands flagged `requires_valid_source` embed the
//! request's own credential and are never cached at all: the cache key is
//! `(service, scheme, applid)`, so a cached entry could hand one user's
//! session material to another, or outlive its credential's invalidation.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::discovery::ServiceRegistry;
use crate::scheme::bypass::BypassCommand;
use crate::scheme::{Authentication, AuthenticationCommand, Scheme, SchemeRegistry};
use crate::source::RequestCredentials;
use crate::zosmf::ZosmfServiceFacade;
use crate::Result;
use crate::context::OutboundRequest;

/// Cache key: the declared tuple a command was built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CommandKey {
    service_id: String,
    scheme: Scheme,
    applid: Option<String>,
}

/// Marker command deferring resolution until the routing layer has picked a
/// concrete instance. Applies nothing itself.
#[derive(Debug)]
pub struct LoadBalancerCommand;

impl AuthenticationCommand for LoadBalancerCommand {
    fn is_deferred(&self) -> bool {
        true
    }

    fn apply(&self, _request: &mut OutboundRequest) {}
}

/// Resolves and caches authentication commands per target service.
pub struct ServiceAuthenticationService {
    schemes: SchemeRegistry,
    discovery: Arc<dyn ServiceRegistry>,
    facade: Arc<ZosmfServiceFacade>,
    cache: DashMap<CommandKey, Arc<dyn AuthenticationCommand>>,
}

impl ServiceAuthenticationService {
    /// Create from the scheme registry, the discovery seam and the provider
    /// facade (evicted together with the command cache).
    #[must_use]
    pub fn new(
        schemes: SchemeRegistry,
        discovery: Arc<dyn ServiceRegistry>,
        facade: Arc<ZosmfServiceFacade>,
    ) -> Self {
        Self {
            schemes,
            discovery,
            facade,
            cache: DashMap::new(),
        }
    }

    /// Resolve the command for a target service and the current request's
    /// credentials.
    pub fn get_command(
        &self,
        service_id: &str,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>> {
        let instances = self.discovery.instances(service_id);
        if instances.is_empty() {
            debug!(service = %service_id, "Unknown service, attaching no credential");
            return Ok(Arc::new(BypassCommand));
        }

        let declared: HashSet<Authentication> = instances
            .iter()
            .map(crate::discovery::ServiceInstance::authentication)
            .collect();

        let mut tuples = declared.into_iter();
        let auth = match (tuples.next(), tuples.next()) {
            (Some(auth), None) => auth,
            _ => {
                debug!(service = %service_id, "Instances disagree on scheme, deferring to routing");
                return Ok(Arc::new(LoadBalancerCommand));
            }
        };
        self.cached_command(service_id, &auth, credentials)
    }

    /// Resolve the command for one concrete instance, once the routing layer
    /// has picked it. Built fresh on every call — the decision is
    /// instance-specific and deliberately uncached.
    pub fn get_command_for_instance(
        &self,
        instance_id: &str,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>> {
        let Some(instance) = self.discovery.instance(instance_id) else {
            debug!(instance = %instance_id, "Unknown instance, attaching no credential");
            return Ok(Arc::new(BypassCommand));
        };
        let auth = instance.authentication();
        let implementation = self.schemes.resolve(&auth)?;
        implementation.create_command(&auth, credentials)
    }

    /// Look up → evict if expired → rebuild once → return.
    ///
    /// Kept as a plain function rather than a caching layer so the
    /// rebuild-on-expiry contract is directly testable. Commands that must
    /// not outlive their originating credential bypass the cache in both
    /// directions: a stray cached entry is evicted, and a fresh one is
    /// never inserted.
    fn cached_command(
        &self,
        service_id: &str,
        auth: &Authentication,
        credentials: &RequestCredentials<'_>,
    ) -> Result<Arc<dyn AuthenticationCommand>> {
        let implementation = self.schemes.resolve(auth)?;
        let key = CommandKey {
            service_id: service_id.to_string(),
            scheme: implementation.scheme(),
            applid: auth.applid.clone(),
        };

        if let Some(entry) = self.cache.get(&key) {
            if !entry.is_expired() && !entry.requires_valid_source() {
                return Ok(Arc::clone(&entry));
            }
            drop(entry);
            self.cache.remove(&key);
        }

        let command = implementation.create_command(auth, credentials)?;
        if !command.requires_valid_source() {
            self.cache.insert(key, Arc::clone(&command));
        }
        Ok(command)
    }

    /// Clear every cached command and the provider facade's caches.
    pub fn evict_all(&self) {
        debug!("Evicting all cached authentication commands");
        self.cache.clear();
        self.facade.evict();
    }

    /// Clear only the entries for one service id.
    pub fn evict_service(&self, service_id: &str) {
        debug!(service = %service_id, "Evicting cached authentication commands");
        self.cache.retain(|key, _| key.service_id != service_id);
    }

    /// Number of live cache entries. Test and diagnostics hook.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}
