//! Cluster-wide token invalidation.
//!
//! The local [`InvalidationStore`] is consulted on every validation; marking
//! is cheap and in-memory. Cross-instance propagation is best-effort and
//! asynchronous: a token may stay briefly valid on a peer that has not yet
//! been told. A provider-side invalidation failure is swallowed only when a
//! peer independently corroborates that the token is already invalid
//! somewhere in the cluster; otherwise the original failure is re-raised.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::discovery::{ServiceInstance, ServiceRegistry};
use crate::source::{AuthSource, AuthSourceService, CredentialOrigin};
use crate::zosmf::{ZosmfServiceFacade, ZosmfSession};
use crate::{Error, Result};

/// One replicated invalidation fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationRecord {
    /// The raw token (or certificate fingerprint).
    pub token: String,
    /// When the invalidation was first recorded.
    pub invalidated_at: DateTime<Utc>,
}

/// Process-wide store of invalidated credentials.
#[derive(Debug, Default)]
pub struct InvalidationStore {
    records: DashMap<String, DateTime<Utc>>,
}

impl InvalidationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a token invalid. Returns `false` if it was already marked.
    pub fn mark(&self, token: &str) -> bool {
        let mut newly = false;
        self.records.entry(token.to_string()).or_insert_with(|| {
            newly = true;
            Utc::now()
        });
        newly
    }

    /// Whether a token (or certificate fingerprint) is marked invalid.
    #[must_use]
    pub fn is_invalidated(&self, token: &str) -> bool {
        self.records.contains_key(token)
    }

    /// Snapshot of all records, for pushing to a rejoining peer.
    #[must_use]
    pub fn records(&self) -> Vec<InvalidationRecord> {
        self.records
            .iter()
            .map(|entry| InvalidationRecord {
                token: entry.key().clone(),
                invalidated_at: *entry.value(),
            })
            .collect()
    }

    /// Merge records pushed by a peer. Idempotent; the earliest timestamp
    /// wins for tokens both sides know about.
    pub fn merge(&self, records: Vec<InvalidationRecord>) {
        for record in records {
            self.records
                .entry(record.token)
                .and_modify(|at| *at = (*at).min(record.invalidated_at))
                .or_insert(record.invalidated_at);
        }
    }
}

/// Transport seam to peer gateway instances.
#[async_trait]
pub trait PeerGatewayClient: Send + Sync {
    /// Ask a peer whether its store has the token marked invalid.
    async fn is_invalidated(&self, peer: &ServiceInstance, token: &str) -> Result<bool>;

    /// Tell a peer to invalidate a token
    /// (`DELETE {peer}/gateway/auth/invalidate/{token}`).
    async fn invalidate(&self, peer: &ServiceInstance, token: &str) -> Result<()>;

    /// Push a batch of local records to a peer (used on cluster rejoin).
    async fn push_records(&self, peer: &ServiceInstance, records: &[InvalidationRecord])
    -> Result<()>;
}

/// reqwest-backed peer client.
pub struct HttpPeerClient {
    http: reqwest::Client,
}

impl HttpPeerClient {
    /// Create with a configured HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn base(peer: &ServiceInstance) -> String {
        peer.base_url.trim_end_matches('/').to_string()
    }
}

#[async_trait]
impl PeerGatewayClient for HttpPeerClient {
    async fn is_invalidated(&self, peer: &ServiceInstance, token: &str) -> Result<bool> {
        let url = format!("{}/gateway/auth/invalidation/{token}", Self::base(peer));
        let response = self.http.get(url).send().await?;
        Ok(response.status().is_success())
    }

    async fn invalidate(&self, peer: &ServiceInstance, token: &str) -> Result<()> {
        let url = format!("{}/gateway/auth/invalidate/{token}", Self::base(peer));
        self.http.delete(url).send().await?.error_for_status()?;
        Ok(())
    }

    async fn push_records(
        &self,
        peer: &ServiceInstance,
        records: &[InvalidationRecord],
    ) -> Result<()> {
        let url = format!("{}/gateway/auth/invalidation", Self::base(peer));
        self.http.post(url).json(records).send().await?.error_for_status()?;
        Ok(())
    }
}

/// Cluster-wide invalidation coordinator.
pub struct DistributedInvalidator {
    store: Arc<InvalidationStore>,
    source_service: Arc<AuthSourceService>,
    registry: Arc<dyn ServiceRegistry>,
    peers: Arc<dyn PeerGatewayClient>,
    facade: Arc<ZosmfServiceFacade>,
    /// Service id this gateway's instances register under.
    gateway_service_id: String,
    /// Our own registry instance id, excluded from peer fan-out.
    own_instance_id: String,
    /// Service id of the legacy identity provider.
    zosmf_service_id: String,
}

impl DistributedInvalidator {
    /// Wire the coordinator. `own_instance_id` keeps the fan-out from
    /// calling back into this instance.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<InvalidationStore>,
        source_service: Arc<AuthSourceService>,
        registry: Arc<dyn ServiceRegistry>,
        peers: Arc<dyn PeerGatewayClient>,
        facade: Arc<ZosmfServiceFacade>,
        gateway_service_id: impl Into<String>,
        own_instance_id: impl Into<String>,
        zosmf_service_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            source_service,
            registry,
            peers,
            facade,
            gateway_service_id: gateway_service_id.into(),
            own_instance_id: own_instance_id.into(),
            zosmf_service_id: zosmf_service_id.into(),
        }
    }

    /// Mark a token invalid, revoke it at the legacy provider when it
    /// originated there, and optionally propagate to every peer instance.
    ///
    /// Returns `true` once the token is confirmed invalid somewhere in the
    /// cluster. The local mark is kept even when provider revocation fails
    /// (fail secure), and a retried call attempts the provider again rather
    /// than short-circuiting on the mark — otherwise a transient provider
    /// outage would permanently lose the upstream revocation.
    pub async fn invalidate(&self, token: &str, propagate: bool) -> Result<bool> {
        if !self.store.mark(token) {
            debug!("Token already marked locally, retrying provider revocation");
        }

        if let Err(error) = self.revoke_at_provider(token).await {
            if self.corroborated_by_peer(token).await {
                warn!(%error, "Provider invalidation failed but a peer corroborates the revocation");
            } else {
                return Err(error);
            }
        }

        if propagate {
            self.fan_out(token).await;
        }
        Ok(true)
    }

    /// Push this instance's accumulated records to one specific peer,
    /// resolved by registry instance id. Used when a peer rejoins the
    /// cluster.
    pub async fn distribute_invalidate(&self, instance_id: &str) -> Result<()> {
        let peer = self.registry.instance(instance_id).ok_or_else(|| {
            Error::ProviderUnreachable(format!(
                "Peer instance {instance_id} not found in the registry"
            ))
        })?;
        let records = self.store.records();
        debug!(peer = %instance_id, count = records.len(), "Pushing invalidation records");
        self.peers.push_records(&peer, &records).await
    }

    /// Revoke the token at the legacy provider if it originated there.
    async fn revoke_at_provider(&self, token: &str) -> Result<()> {
        let source = AuthSource::Jwt(token.to_string());
        let Ok(parsed) = self.source_service.parse(&source) else {
            // Not a readable JWT (e.g. a certificate fingerprint); nothing
            // to revoke upstream.
            return Ok(());
        };
        if parsed.origin != CredentialOrigin::LegacyProvider {
            return Ok(());
        }

        let (_, protocol) = self.facade.implementation(&self.zosmf_service_id).await?;
        let base_url = self
            .registry
            .instances(&self.zosmf_service_id)
            .into_iter()
            .next()
            .map(|instance| instance.base_url)
            .ok_or_else(|| {
                Error::ProviderUnreachable(format!(
                    "No live instance of {}",
                    self.zosmf_service_id
                ))
            })?;

        let session = ZosmfSession {
            jwt: Some(token.to_string()),
            ltpa: self.source_service.derive_secondary(&source).ok(),
        };
        protocol.invalidate(&base_url, &session).await
    }

    /// Ask every peer whether it already has the token marked invalid.
    async fn corroborated_by_peer(&self, token: &str) -> bool {
        for peer in self.peer_instances() {
            match self.peers.is_invalidated(&peer, token).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(error) => {
                    debug!(peer = %peer.instance_id, %error, "Peer invalidation query failed");
                }
            }
        }
        false
    }

    /// Best-effort push of the revocation to every peer.
    async fn fan_out(&self, token: &str) {
        for peer in self.peer_instances() {
            if let Err(error) = self.peers.invalidate(&peer, token).await {
                warn!(peer = %peer.instance_id, %error, "Failed to propagate invalidation");
            }
        }
    }

    fn peer_instances(&self) -> Vec<ServiceInstance> {
        self.registry
            .instances(&self.gateway_service_id)
            .into_iter()
            .filter(|instance| instance.instance_id != self.own_instance_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::TimeDelta;

    use crate::config::AuthConfig;
    use crate::source::{CertificateMapper, ClientCertificate};
    use crate::zosmf::{ZosmfInfo, ZosmfInfoClient, ZosmfProtocol};

    // ── store ────────────────────────────────────────────────────────────

    #[test]
    fn mark_is_idempotent() {
        let store = InvalidationStore::new();
        assert!(store.mark("t1"));
        assert!(!store.mark("t1"));
        assert!(store.is_invalidated("t1"));
        assert!(!store.is_invalidated("t2"));
    }

    #[test]
    fn merge_keeps_the_earliest_timestamp() {
        let store = InvalidationStore::new();
        store.mark("t1");
        let earlier = Utc::now() - TimeDelta::hours(1);
        store.merge(vec![InvalidationRecord {
            token: "t1".to_string(),
            invalidated_at: earlier,
        }]);

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].invalidated_at, earlier);
    }

    #[test]
    fn merge_adds_unknown_tokens() {
        let store = InvalidationStore::new();
        store.merge(vec![InvalidationRecord {
            token: "pushed".to_string(),
            invalidated_at: Utc::now(),
        }]);
        assert!(store.is_invalidated("pushed"));
    }

    // ── invalidator fixtures ─────────────────────────────────────────────

    struct NoMapper;

    impl CertificateMapper for NoMapper {
        fn map(&self, _cert: &ClientCertificate) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingPeerClient {
        invalidated_tokens: Mutex<Vec<String>>,
        pushed_batches: Mutex<Vec<usize>>,
        peer_knows_token: bool,
        fail_invalidate: bool,
    }

    #[async_trait]
    impl PeerGatewayClient for RecordingPeerClient {
        async fn is_invalidated(&self, _peer: &ServiceInstance, _token: &str) -> Result<bool> {
            Ok(self.peer_knows_token)
        }

        async fn invalidate(&self, _peer: &ServiceInstance, token: &str) -> Result<()> {
            if self.fail_invalidate {
                return Err(Error::ProviderUnreachable("peer down".to_string()));
            }
            self.invalidated_tokens.lock().unwrap().push(token.to_string());
            Ok(())
        }

        async fn push_records(
            &self,
            _peer: &ServiceInstance,
            records: &[InvalidationRecord],
        ) -> Result<()> {
            self.pushed_batches.lock().unwrap().push(records.len());
            Ok(())
        }
    }

    struct StubInfoClient;

    #[async_trait]
    impl ZosmfInfoClient for StubInfoClient {
        async fn info(&self, _service_id: &str) -> Result<ZosmfInfo> {
            Ok(ZosmfInfo {
                version: 27,
                realm: "SAFRealm".to_string(),
            })
        }
    }

    struct RecordingProtocol {
        invalidations: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ZosmfProtocol for RecordingProtocol {
        fn is_supported(&self, version: i32) -> bool {
            version >= 27
        }

        async fn authenticate(
            &self,
            _base_url: &str,
            _user: &str,
            _password: &str,
        ) -> Result<ZosmfSession> {
            unimplemented!("not exercised")
        }

        async fn validate(&self, _base_url: &str, _session: &ZosmfSession) -> Result<()> {
            unimplemented!("not exercised")
        }

        async fn invalidate(&self, _base_url: &str, _session: &ZosmfSession) -> Result<()> {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::ProviderUnreachable("zosmf down".to_string()));
            }
            Ok(())
        }
    }

    struct FixedRegistry {
        instances: Vec<ServiceInstance>,
    }

    impl ServiceRegistry for FixedRegistry {
        fn instances(&self, service_id: &str) -> Vec<ServiceInstance> {
            self.instances
                .iter()
                .filter(|i| i.service_id == service_id)
                .cloned()
                .collect()
        }

        fn instance(&self, instance_id: &str) -> Option<ServiceInstance> {
            self.instances
                .iter()
                .find(|i| i.instance_id == instance_id)
                .cloned()
        }
    }

    fn instance(instance_id: &str, service_id: &str) -> ServiceInstance {
        ServiceInstance {
            instance_id: instance_id.to_string(),
            service_id: service_id.to_string(),
            base_url: format!("https://{instance_id}.internal:8443"),
            metadata: HashMap::new(),
        }
    }

    struct Harness {
        invalidator: DistributedInvalidator,
        store: Arc<InvalidationStore>,
        source: Arc<AuthSourceService>,
        peers: Arc<RecordingPeerClient>,
        protocol: Arc<RecordingProtocol>,
    }

    fn harness(peers: RecordingPeerClient, provider_fails: bool) -> Harness {
        let store = Arc::new(InvalidationStore::new());
        let config = AuthConfig {
            jwt_secret: "unit-test-secret".to_string(),
            ..AuthConfig::default()
        };
        let source = Arc::new(AuthSourceService::new(
            config,
            Arc::clone(&store),
            Arc::new(NoMapper),
        ));
        let protocol = Arc::new(RecordingProtocol {
            invalidations: AtomicUsize::new(0),
            fail: AtomicBool::new(provider_fails),
        });
        let facade = Arc::new(ZosmfServiceFacade::new(
            Arc::new(StubInfoClient),
            vec![Arc::clone(&protocol) as Arc<dyn ZosmfProtocol>],
            Duration::from_secs(3600),
        ));
        let registry = Arc::new(FixedRegistry {
            instances: vec![
                instance("gw-self", "gateway"),
                instance("gw-peer", "gateway"),
                instance("zosmf-1", "zosmf"),
            ],
        });
        let peers = Arc::new(peers);
        let invalidator = DistributedInvalidator::new(
            Arc::clone(&store),
            Arc::clone(&source),
            registry,
            Arc::clone(&peers) as Arc<dyn PeerGatewayClient>,
            facade,
            "gateway",
            "gw-self",
            "zosmf",
        );
        Harness {
            invalidator,
            store,
            source,
            peers,
            protocol,
        }
    }

    fn zosmf_token() -> String {
        use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
        let now = Utc::now().timestamp();
        encode(
            &Header::new(Algorithm::HS256),
            &serde_json::json!({
                "sub": "USER01",
                "iat": now,
                "exp": now + 3600,
                "iss": "zOSMF",
                "ltpa": "ltpa-value",
            }),
            &EncodingKey::from_secret(b"unit-test-secret"),
        )
        .unwrap()
    }

    // ── invalidator ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn invalidate_marks_locally_and_fails_subsequent_validation() {
        let h = harness(RecordingPeerClient::default(), false);
        let token = h.source.issue("USER01", None).unwrap();

        assert!(h.invalidator.invalidate(&token, false).await.unwrap());
        assert!(h.store.is_invalidated(&token));
        assert!(h.source.validate(&AuthSource::Jwt(token)).is_err());
    }

    #[tokio::test]
    async fn gateway_origin_token_skips_the_provider() {
        let h = harness(RecordingPeerClient::default(), false);
        let token = h.source.issue("USER01", None).unwrap();

        h.invalidator.invalidate(&token, false).await.unwrap();
        assert_eq!(h.protocol.invalidations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_origin_token_is_revoked_upstream() {
        let h = harness(RecordingPeerClient::default(), false);
        let token = zosmf_token();

        h.invalidator.invalidate(&token, false).await.unwrap();
        assert_eq!(h.protocol.invalidations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_swallowed_when_a_peer_corroborates() {
        let h = harness(
            RecordingPeerClient {
                peer_knows_token: true,
                ..RecordingPeerClient::default()
            },
            true,
        );
        let token = zosmf_token();

        assert!(h.invalidator.invalidate(&token, false).await.unwrap());
    }

    #[tokio::test]
    async fn provider_failure_without_corroboration_is_reraised() {
        let h = harness(RecordingPeerClient::default(), true);
        let token = zosmf_token();

        let result = h.invalidator.invalidate(&token, false).await;
        assert!(matches!(result, Err(Error::ProviderUnreachable(_))));
    }

    #[tokio::test]
    async fn propagate_fans_out_to_peers_only() {
        let h = harness(RecordingPeerClient::default(), false);
        let token = h.source.issue("USER01", None).unwrap();

        h.invalidator.invalidate(&token, true).await.unwrap();
        let pushed = h.peers.invalidated_tokens.lock().unwrap();
        // One peer (gw-peer); our own instance is excluded.
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0], token);
    }

    #[tokio::test]
    async fn peer_push_failure_does_not_fail_the_invalidation() {
        let h = harness(
            RecordingPeerClient {
                fail_invalidate: true,
                ..RecordingPeerClient::default()
            },
            false,
        );
        let token = h.source.issue("USER01", None).unwrap();

        assert!(h.invalidator.invalidate(&token, true).await.unwrap());
    }

    #[tokio::test]
    async fn provider_failure_keeps_the_local_mark_and_the_error() {
        let h = harness(RecordingPeerClient::default(), true);
        let token = zosmf_token();

        assert!(h.invalidator.invalidate(&token, false).await.is_err());
        // Fail secure: the token stays invalid locally even though the
        // upstream revocation did not go through.
        assert!(h.store.is_invalidated(&token));
    }

    #[tokio::test]
    async fn retried_invalidation_reaches_the_recovered_provider() {
        let h = harness(RecordingPeerClient::default(), true);
        let token = zosmf_token();

        assert!(h.invalidator.invalidate(&token, false).await.is_err());

        h.protocol.fail.store(false, Ordering::SeqCst);
        assert!(h.invalidator.invalidate(&token, false).await.unwrap());
        // The local mark must not short-circuit the retry away from the
        // provider.
        assert_eq!(h.protocol.invalidations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distribute_invalidate_pushes_the_full_record_set() {
        let h = harness(RecordingPeerClient::default(), false);
        h.store.mark("t1");
        h.store.mark("t2");

        h.invalidator.distribute_invalidate("gw-peer").await.unwrap();
        assert_eq!(*h.peers.pushed_batches.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn distribute_invalidate_to_unknown_instance_fails() {
        let h = harness(RecordingPeerClient::default(), false);
        assert!(h.invalidator.distribute_invalidate("ghost").await.is_err());
    }
}
