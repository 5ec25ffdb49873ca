use crate::loadbalancer::{PortFilter, ServiceName};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// L7LoadBalancer routes traffic through the L7 proxy to a set of
/// backend services. Every referenced service gets its backends synced
/// to the proxy as endpoints.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "l7lb.datum.net",
    version = "v1alpha1",
    kind = "L7LoadBalancer",
    plural = "l7loadbalancers",
    namespaced,
    derive = "Default",
)]
#[serde(rename_all = "camelCase")]
pub struct L7LoadBalancerSpec {
    /// Services whose backends the proxy routes to
    #[serde(default)]
    pub backend_services: Vec<BackendServiceRef>,
}

/// Reference to a backend Service
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[derive(Default)]
pub struct BackendServiceRef {
    /// Name of the Service
    pub name: String,

    /// Namespace of the Service (defaults to the L7LoadBalancer's namespace)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Front-end ports to sync, by number or name. Empty means all backends.
    #[serde(default)]
    pub ports: Vec<String>,
}

impl L7LoadBalancerSpec {
    /// Port filter per referenced service.
    ///
    /// A service listed more than once gets the concatenation of its port lists.
    pub fn service_usage(&self, resource_namespace: &str) -> BTreeMap<ServiceName, PortFilter> {
        let mut usage: BTreeMap<ServiceName, PortFilter> = BTreeMap::new();
        for svc in &self.backend_services {
            let namespace = svc.namespace.as_deref().unwrap_or(resource_namespace);
            usage
                .entry(ServiceName::new(namespace, svc.name.clone()))
                .or_default()
                .extend(svc.ports.iter().cloned());
        }
        usage
    }
}
