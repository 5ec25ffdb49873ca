//! Endpoint publishing towards the L7 proxy

use anyhow::Result;
use l7lb_api::{BucketMap, ServiceName};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Sink for the filtered backends of a service.
///
/// Every push carries the full endpoint state of the service and replaces
/// whatever was pushed before.
#[async_trait::async_trait]
pub trait EndpointPublisher: Send + Sync {
    async fn push(&self, service: &ServiceName, endpoints: BucketMap) -> Result<()>;

    /// Drop the endpoints of a service no longer routed through the proxy
    async fn withdraw(&self, service: &ServiceName) -> Result<()>;
}

/// In-memory endpoint store keeping the latest push per service
#[derive(Clone, Default)]
pub struct EndpointStore {
    endpoints: Arc<RwLock<HashMap<ServiceName, BucketMap>>>,
}

impl EndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest endpoints pushed for a service
    pub async fn endpoints(&self, service: &ServiceName) -> Option<BucketMap> {
        self.endpoints.read().await.get(service).cloned()
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl EndpointPublisher for EndpointStore {
    async fn push(&self, service: &ServiceName, endpoints: BucketMap) -> Result<()> {
        debug!(
            "Storing endpoints of service {}: {} port buckets",
            service,
            endpoints.len()
        );
        self.endpoints.write().await.insert(service.clone(), endpoints);
        Ok(())
    }

    async fn withdraw(&self, service: &ServiceName) -> Result<()> {
        if self.endpoints.write().await.remove(service).is_some() {
            debug!("Withdrew endpoints of service {}", service);
        }
        Ok(())
    }
}
