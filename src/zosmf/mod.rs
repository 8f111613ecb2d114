//! Version-aware facade over the legacy identity provider (z/OSMF).
//!
//! The provider's protocol differs across releases: newer levels expose a
//! dedicated authenticate endpoint, older ones piggyback on the info
//! endpoint. The facade fetches the provider's `{version, realm}` descriptor
//! (cached, shorter-lived), selects the first registered protocol
//! implementation supporting that version (cached per version), and evicts
//! both caches on any failure so a transient outage never pins a stale
//! "no implementation" answer.

pub mod protocol;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::{Error, Result};

pub use protocol::{
    AuthEndpointProtocol, InfoEndpointProtocol, ZosmfProtocol, ZosmfSession,
};

/// Provider descriptor returned by the info endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ZosmfInfo {
    /// Provider version level. The wire value is a string ("27").
    #[serde(rename = "zosmf_version", deserialize_with = "version_from_string")]
    pub version: i32,
    /// SAF realm the provider authenticates against.
    #[serde(rename = "zosmf_saf_realm")]
    pub realm: String,
}

/// Accept the version either as a JSON string or a bare number.
fn version_from_string<'de, D>(deserializer: D) -> std::result::Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i32),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Transport seam for the provider's info endpoint.
#[async_trait]
pub trait ZosmfInfoClient: Send + Sync {
    /// Fetch the `{version, realm}` descriptor for the provider registered
    /// under `service_id`.
    async fn info(&self, service_id: &str) -> Result<ZosmfInfo>;
}

struct CachedInfo {
    info: ZosmfInfo,
    fetched_at: Instant,
}

/// The version-aware provider facade.
pub struct ZosmfServiceFacade {
    client: Arc<dyn ZosmfInfoClient>,
    protocols: Vec<Arc<dyn ZosmfProtocol>>,
    info_cache: DashMap<String, CachedInfo>,
    impl_cache: DashMap<i32, Arc<dyn ZosmfProtocol>>,
    info_ttl: Duration,
}

impl ZosmfServiceFacade {
    /// Create from the info-endpoint client and the ordered protocol list.
    /// Selection picks the first implementation whose `is_supported` matches.
    #[must_use]
    pub fn new(
        client: Arc<dyn ZosmfInfoClient>,
        protocols: Vec<Arc<dyn ZosmfProtocol>>,
        info_ttl: Duration,
    ) -> Self {
        Self {
            client,
            protocols,
            info_cache: DashMap::new(),
            impl_cache: DashMap::new(),
            info_ttl,
        }
    }

    /// Resolve the protocol implementation for the provider registered under
    /// `service_id`, caching both the descriptor and the version decision.
    pub async fn implementation(
        &self,
        service_id: &str,
    ) -> Result<(ZosmfInfo, Arc<dyn ZosmfProtocol>)> {
        let info = self.descriptor(service_id).await?;

        if let Some(cached) = self.impl_cache.get(&info.version) {
            return Ok((info, Arc::clone(&cached)));
        }

        match self
            .protocols
            .iter()
            .find(|protocol| protocol.is_supported(info.version))
        {
            Some(protocol) => {
                debug!(version = info.version, "Selected provider protocol implementation");
                self.impl_cache.insert(info.version, Arc::clone(protocol));
                Ok((info, Arc::clone(protocol)))
            }
            None => {
                // A stale "no implementation" answer must not survive.
                self.evict();
                Err(Error::ProviderVersionUnknown {
                    version: info.version,
                })
            }
        }
    }

    /// Fetch or reuse the provider descriptor.
    async fn descriptor(&self, service_id: &str) -> Result<ZosmfInfo> {
        if let Some(cached) = self.info_cache.get(service_id) {
            if cached.fetched_at.elapsed() < self.info_ttl {
                return Ok(cached.info.clone());
            }
        }

        match self.client.info(service_id).await {
            Ok(info) => {
                self.info_cache.insert(
                    service_id.to_string(),
                    CachedInfo {
                        info: info.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(info)
            }
            Err(error) => {
                warn!(service = %service_id, %error, "Provider info fetch failed, evicting caches");
                self.evict();
                Err(error)
            }
        }
    }

    /// Drop both the descriptor cache and the version-decision cache.
    pub fn evict(&self) {
        self.info_cache.clear();
        self.impl_cache.clear();
    }
}

/// reqwest-backed info client, resolving the provider's base URL through the
/// service registry.
pub struct ZosmfHttpInfoClient {
    http: reqwest::Client,
    registry: Arc<dyn crate::discovery::ServiceRegistry>,
}

impl ZosmfHttpInfoClient {
    /// Create with a configured HTTP client and the registry seam.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        registry: Arc<dyn crate::discovery::ServiceRegistry>,
    ) -> Self {
        Self { http, registry }
    }
}

#[async_trait]
impl ZosmfInfoClient for ZosmfHttpInfoClient {
    async fn info(&self, service_id: &str) -> Result<ZosmfInfo> {
        let instance = self
            .registry
            .instances(service_id)
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::ProviderUnreachable(format!("No live instance of {service_id}"))
            })?;

        let url = format!("{}/zosmf/info", instance.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(url)
            .header("X-CSRF-ZOSMF-HEADER", "")
            .send()
            .await
            .map_err(|e| Error::ProviderUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::ProviderUnreachable(format!(
                "Info endpoint returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::ProviderUnreachable(format!("Unreadable info payload: {e}")))
    }
}
