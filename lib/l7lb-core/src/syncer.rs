//! Syncing service backends to the L7 proxy as endpoints

use crate::filter::{filter_preferred_backends, filter_service_backends};
use crate::publisher::EndpointPublisher;
use crate::registry::UsageRegistry;
use crate::{CoreError, Result};
use l7lb_api::{L7lbResourceName, PortFilter, Service, ServiceName};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Receives backend changes of services and keeps an L7 proxy in sync
#[async_trait::async_trait]
pub trait BackendSyncer: Send + Sync {
    /// Name of the proxy the backends are synced to
    fn proxy_name(&self) -> &'static str;

    /// Push the current backends of `service` if it is used by an L7LB resource
    async fn sync(&self, service: &Service) -> Result<()>;

    async fn register_service_usage(
        &self,
        service: ServiceName,
        resource: L7lbResourceName,
        frontend_ports: PortFilter,
    );

    /// Returns true if the service is no longer used by any L7LB resource,
    /// in which case its endpoints are withdrawn from the proxy
    async fn deregister_service_usage(
        &self,
        service: &ServiceName,
        resource: &L7lbResourceName,
    ) -> bool;

    async fn service_in_use(&self, service: &ServiceName) -> bool;
}

/// Syncs the backends of services referenced by L7LB resources to Envoy
pub struct EnvoyServiceBackendSyncer {
    publisher: Arc<dyn EndpointPublisher>,
    registry: UsageRegistry,
    /// Orders pushes and withdrawals of the same service. Never held
    /// together with the registry lock.
    publish_locks: Mutex<HashMap<ServiceName, Arc<Mutex<()>>>>,
}

impl EnvoyServiceBackendSyncer {
    pub fn new(publisher: Arc<dyn EndpointPublisher>) -> Self {
        Self {
            publisher,
            registry: UsageRegistry::new(),
            publish_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &UsageRegistry {
        &self.registry
    }

    async fn publish_lock(&self, service: &ServiceName) -> Arc<Mutex<()>> {
        self.publish_locks
            .lock()
            .await
            .entry(service.clone())
            .or_default()
            .clone()
    }
}

#[async_trait::async_trait]
impl BackendSyncer for EnvoyServiceBackendSyncer {
    fn proxy_name(&self) -> &'static str {
        "Envoy"
    }

    async fn sync(&self, service: &Service) -> Result<()> {
        // Registry lock is released here, before publishing
        let Some(frontend_ports) = self.registry.effective_port_filter(&service.name).await else {
            return Ok(());
        };

        let preferred = filter_preferred_backends(&service.backends);
        let endpoints = filter_service_backends(&service.frontend, &preferred, &frontend_ports);

        debug!(
            service = %service.name,
            frontend_ports = ?frontend_ports,
            buckets = ?endpoints.keys().collect::<Vec<_>>(),
            "Upsert envoy endpoints"
        );

        let lock = self.publish_lock(&service.name).await;
        let _guard = lock.lock().await;
        // last user may have gone while filtering or waiting for the lock
        if !self.registry.is_registered(&service.name).await {
            debug!("Service {} no longer in use, dropping push", service.name);
            return Ok(());
        }

        self.publisher
            .push(&service.name, endpoints)
            .await
            .map_err(|source| CoreError::Publish {
                proxy: self.proxy_name(),
                service: service.name.clone(),
                source,
            })
    }

    async fn register_service_usage(
        &self,
        service: ServiceName,
        resource: L7lbResourceName,
        frontend_ports: PortFilter,
    ) {
        self.registry.register(service, resource, frontend_ports).await;
    }

    async fn deregister_service_usage(
        &self,
        service: &ServiceName,
        resource: &L7lbResourceName,
    ) -> bool {
        if !self.registry.deregister(service, resource).await {
            return false;
        }

        let lock = self.publish_lock(service).await;
        let _guard = lock.lock().await;
        // a resource may have picked the service up again meanwhile
        if !self.registry.is_registered(service).await {
            if let Err(e) = self.publisher.withdraw(service).await {
                warn!("Failed to withdraw {} endpoints of service {}: {:#}", self.proxy_name(), service, e);
            }
        }
        true
    }

    async fn service_in_use(&self, service: &ServiceName) -> bool {
        self.registry.is_registered(service).await
    }
}
