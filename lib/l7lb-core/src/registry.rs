//! Registry of services in use by L7LB resources

use l7lb_api::{L7lbResourceName, PortFilter, ServiceName};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// UsageRegistry tracks, per service, the L7LB resources referencing it and
/// the front-end ports each of them asked for.
///
/// A service is present if and only if at least one resource references it.
#[derive(Clone, Default)]
pub struct UsageRegistry {
    services: Arc<RwLock<HashMap<ServiceName, UsageEntry>>>,
}

/// Resources referencing one service
#[derive(Debug, Default)]
struct UsageEntry {
    backend_refs: HashMap<L7lbResourceName, PortFilter>,
}

impl UsageEntry {
    /// Sorted, duplicate-free union of all resources' port filters
    fn all_frontend_ports(&self) -> PortFilter {
        self.backend_refs
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl UsageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `resource` routes to `service` through `ports`.
    /// A later call for the same pair replaces the previous filter.
    pub async fn register(
        &self,
        service: ServiceName,
        resource: L7lbResourceName,
        ports: PortFilter,
    ) {
        let mut services = self.services.write().await;
        debug!("Registering usage of service {} in {}: {:?}", service, resource, ports);
        services
            .entry(service)
            .or_default()
            .backend_refs
            .insert(resource, ports);
    }

    /// Remove the usage of `service` by `resource`.
    ///
    /// Returns true when the service is no longer used by any resource and
    /// has been dropped from the registry.
    pub async fn deregister(&self, service: &ServiceName, resource: &L7lbResourceName) -> bool {
        let mut services = self.services.write().await;
        let Some(entry) = services.get_mut(service) else {
            return false;
        };

        entry.backend_refs.remove(resource);
        if entry.backend_refs.is_empty() {
            services.remove(service);
            debug!("Service {} no longer used by any L7LB resource", service);
            return true;
        }
        false
    }

    /// Union of the port filters of every resource using `service`,
    /// or None if the service is not in use.
    pub async fn effective_port_filter(&self, service: &ServiceName) -> Option<PortFilter> {
        let services = self.services.read().await;
        services.get(service).map(UsageEntry::all_frontend_ports)
    }

    pub async fn is_registered(&self, service: &ServiceName) -> bool {
        self.services.read().await.contains_key(service)
    }

    /// Sorted snapshot of the services currently in use
    pub async fn registered_services(&self) -> Vec<ServiceName> {
        let services = self.services.read().await;
        let mut names: Vec<ServiceName> = services.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn service_count(&self) -> usize {
        self.services.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports(p: &[&str]) -> PortFilter {
        p.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_deregister_last_resource_removes_service() {
        let registry = UsageRegistry::new();
        let svc = ServiceName::new("default", "echo");
        let r1 = L7lbResourceName::new("default", "lb-1");

        registry.register(svc.clone(), r1.clone(), ports(&["80"])).await;
        assert!(registry.is_registered(&svc).await);

        assert!(registry.deregister(&svc, &r1).await);
        assert!(!registry.is_registered(&svc).await);
        assert_eq!(registry.service_count().await, 0);
        assert_eq!(registry.effective_port_filter(&svc).await, None);
    }

    #[tokio::test]
    async fn test_deregister_keeps_service_with_other_users() {
        let registry = UsageRegistry::new();
        let svc = ServiceName::new("default", "echo");
        let r1 = L7lbResourceName::new("default", "lb-1");
        let r2 = L7lbResourceName::new("default", "lb-2");

        registry.register(svc.clone(), r1.clone(), ports(&["80"])).await;
        registry.register(svc.clone(), r2.clone(), ports(&["web"])).await;

        assert!(!registry.deregister(&svc, &r1).await);
        assert!(registry.is_registered(&svc).await);
        assert_eq!(registry.effective_port_filter(&svc).await, Some(ports(&["web"])));

        assert!(registry.deregister(&svc, &r2).await);
    }

    #[tokio::test]
    async fn test_deregister_unknown_service_is_noop() {
        let registry = UsageRegistry::new();
        let svc = ServiceName::new("default", "echo");
        let r1 = L7lbResourceName::new("default", "lb-1");

        assert!(!registry.deregister(&svc, &r1).await);
    }

    #[tokio::test]
    async fn test_deregister_unknown_resource_keeps_service() {
        let registry = UsageRegistry::new();
        let svc = ServiceName::new("default", "echo");
        let r1 = L7lbResourceName::new("default", "lb-1");
        let other = L7lbResourceName::new("default", "other");

        registry.register(svc.clone(), r1, ports(&[])).await;
        assert!(!registry.deregister(&svc, &other).await);
        assert!(registry.is_registered(&svc).await);
    }

    #[tokio::test]
    async fn test_register_overwrites_filter() {
        let registry = UsageRegistry::new();
        let svc = ServiceName::new("default", "echo");
        let r1 = L7lbResourceName::new("default", "lb-1");

        registry.register(svc.clone(), r1.clone(), ports(&["80"])).await;
        registry.register(svc.clone(), r1.clone(), ports(&["web"])).await;

        assert_eq!(registry.effective_port_filter(&svc).await, Some(ports(&["web"])));
        // one association only, so a single deregister drops the service
        assert!(registry.deregister(&svc, &r1).await);
    }

    #[tokio::test]
    async fn test_effective_port_filter_is_sorted_union() {
        let registry = UsageRegistry::new();
        let svc = ServiceName::new("default", "echo");

        registry
            .register(svc.clone(), L7lbResourceName::new("default", "lb-1"), ports(&["80", "web"]))
            .await;
        registry
            .register(svc.clone(), L7lbResourceName::new("default", "lb-2"), ports(&["web", "metrics"]))
            .await;

        assert_eq!(
            registry.effective_port_filter(&svc).await,
            Some(ports(&["80", "metrics", "web"]))
        );
    }

    #[tokio::test]
    async fn test_registered_services_sorted() {
        let registry = UsageRegistry::new();
        let r1 = L7lbResourceName::new("default", "lb-1");

        registry.register(ServiceName::new("ns-b", "svc"), r1.clone(), ports(&[])).await;
        registry.register(ServiceName::new("ns-a", "svc"), r1, ports(&[])).await;

        assert_eq!(
            registry.registered_services().await,
            vec![ServiceName::new("ns-a", "svc"), ServiceName::new("ns-b", "svc")]
        );
    }
}
