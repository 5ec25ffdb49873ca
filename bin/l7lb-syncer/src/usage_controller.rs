//! Usage controller: keeps the service usage registry in line with
//! L7LoadBalancer resources

use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::Event;
use kube_runtime::{watcher, WatchStreamExt};
use l7lb_api::{L7LoadBalancer, L7lbResourceName, PortFilter, ServiceName};
use l7lb_core::BackendSyncer;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct UsageController {
    syncer: Arc<dyn BackendSyncer>,
    resync_tx: mpsc::Sender<ServiceName>,
    /// Services referenced by each resource at its last observed state
    refs: HashMap<L7lbResourceName, BTreeSet<ServiceName>>,
}

impl UsageController {
    pub fn new(
        syncer: Arc<dyn BackendSyncer>,
        resync_tx: mpsc::Sender<ServiceName>,
    ) -> Self {
        Self {
            syncer,
            resync_tx,
            refs: HashMap::new(),
        }
    }

    pub async fn run(mut self, client: Client, namespace: Option<String>) -> anyhow::Result<()> {
        let api: Api<L7LoadBalancer> = match namespace.as_deref() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        info!("Watching L7LoadBalancer resources");

        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut relisted: Option<HashSet<L7lbResourceName>> = None;

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Apply(lb)) => {
                    let (resource, usage) = usage_of(&lb);
                    self.apply(resource, usage).await;
                }
                Ok(Event::Delete(lb)) => {
                    let (resource, _) = usage_of(&lb);
                    self.delete(&resource).await;
                }
                Ok(Event::Init) => relisted = Some(HashSet::new()),
                Ok(Event::InitApply(lb)) => {
                    let (resource, usage) = usage_of(&lb);
                    if let Some(seen) = relisted.as_mut() {
                        seen.insert(resource.clone());
                    }
                    self.apply(resource, usage).await;
                }
                Ok(Event::InitDone) => {
                    if let Some(seen) = relisted.take() {
                        self.forget_missing(&seen).await;
                    }
                }
                Err(e) => warn!("L7LoadBalancer watch error: {}", e),
            }
        }

        error!("L7LoadBalancer watch stream ended");
        Ok(())
    }

    /// Bring the registry in line with the current services of `resource`
    pub async fn apply(
        &mut self,
        resource: L7lbResourceName,
        usage: BTreeMap<ServiceName, PortFilter>,
    ) {
        let current: BTreeSet<ServiceName> = usage.keys().cloned().collect();
        let previous = self.refs.remove(&resource).unwrap_or_default();

        for service in previous.difference(&current) {
            self.release(service, &resource).await;
        }

        for (service, ports) in usage {
            let was_registered = previous.contains(&service);
            debug!("L7LoadBalancer {} uses service {} with ports {:?}", resource, service, ports);
            self.syncer
                .register_service_usage(service.clone(), resource.clone(), ports)
                .await;
            // port filter may have changed too, so resync either way
            self.request_resync(service, was_registered).await;
        }

        if !current.is_empty() {
            self.refs.insert(resource, current);
        }
    }

    /// Drop every usage of a deleted resource
    pub async fn delete(&mut self, resource: &L7lbResourceName) {
        info!("L7LoadBalancer {} deleted", resource);
        if let Some(services) = self.refs.remove(resource) {
            for service in &services {
                self.release(service, resource).await;
            }
        }
    }

    async fn forget_missing(&mut self, seen: &HashSet<L7lbResourceName>) {
        let stale: Vec<L7lbResourceName> = self
            .refs
            .keys()
            .filter(|r| !seen.contains(*r))
            .cloned()
            .collect();
        for resource in stale {
            self.delete(&resource).await;
        }
    }

    async fn release(&self, service: &ServiceName, resource: &L7lbResourceName) {
        if self.syncer.deregister_service_usage(service, resource).await {
            info!(
                "Service {} no longer used by any L7LoadBalancer, {} endpoints withdrawn",
                service,
                self.syncer.proxy_name()
            );
        }
    }

    async fn request_resync(&self, service: ServiceName, was_registered: bool) {
        if !was_registered {
            info!("Service {} now used by an L7LoadBalancer", service);
        }
        if let Err(e) = self.resync_tx.send(service).await {
            warn!("Dropping resync request for {}: backend watcher stopped", e.0);
        }
    }

    #[cfg(test)]
    fn services_of(&self, resource: &L7lbResourceName) -> Option<&BTreeSet<ServiceName>> {
        self.refs.get(resource)
    }
}

fn usage_of(lb: &L7LoadBalancer) -> (L7lbResourceName, BTreeMap<ServiceName, PortFilter>) {
    let namespace = lb.namespace().unwrap_or_default();
    let usage = lb.spec.service_usage(&namespace);
    (L7lbResourceName::new(namespace, lb.name_any()), usage)
}
