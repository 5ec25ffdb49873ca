//! Backend source: turns EndpointSlice and Service changes into backend syncs

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointSlice};
use kube::{Api, Client, ResourceExt};
use kube_runtime::watcher::Event;
use kube_runtime::{watcher, WatchStreamExt};
use l7lb_api::{Backend, Frontend, Service, ServiceName};
use l7lb_core::BackendSyncer;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Label linking an EndpointSlice to its Service
const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

type SlicesByService = HashMap<ServiceName, BTreeMap<String, EndpointSlice>>;
type Frontends = HashMap<ServiceName, Frontend>;

pub struct BackendWatcher {
    client: Client,
    syncer: Arc<dyn BackendSyncer>,
    cache: BackendCache,
}

impl BackendWatcher {
    pub fn new(client: Client, syncer: Arc<dyn BackendSyncer>, zone: Option<String>) -> Self {
        Self {
            client,
            syncer,
            cache: BackendCache::new(zone),
        }
    }

    pub async fn run(
        mut self,
        namespace: Option<String>,
        mut resync_rx: mpsc::Receiver<ServiceName>,
    ) -> anyhow::Result<()> {
        let (slice_api, service_api): (Api<EndpointSlice>, Api<KubeService>) =
            match namespace.as_deref() {
                Some(ns) => (
                    Api::namespaced(self.client.clone(), ns),
                    Api::namespaced(self.client.clone(), ns),
                ),
                None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
            };
        info!(
            "Watching EndpointSlices and Services for {} backend sync",
            self.syncer.proxy_name()
        );

        let slice_config = watcher::Config::default().labels(SERVICE_NAME_LABEL);
        let mut slices = watcher(slice_api, slice_config).default_backoff().boxed();
        let mut services = watcher(service_api, watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut slice_relist: Option<SlicesByService> = None;
        let mut frontend_relist: Option<Frontends> = None;

        loop {
            tokio::select! {
                event = slices.next() => match event {
                    Some(Ok(Event::Apply(slice))) => {
                        if let Some(service) = upsert_slice(&mut self.cache.slices, slice) {
                            self.resync(&service).await;
                        }
                    }
                    Some(Ok(Event::Delete(slice))) => {
                        if let Some(service) = remove_slice(&mut self.cache.slices, &slice) {
                            self.resync(&service).await;
                        }
                    }
                    Some(Ok(Event::Init)) => slice_relist = Some(HashMap::new()),
                    Some(Ok(Event::InitApply(slice))) => {
                        if let Some(relist) = slice_relist.as_mut() {
                            upsert_slice(relist, slice);
                        }
                    }
                    Some(Ok(Event::InitDone)) => {
                        if let Some(relist) = slice_relist.take() {
                            let touched = self.cache.replace_slices(relist);
                            debug!("EndpointSlice relist done, resyncing {} services", touched.len());
                            self.resync_all(&touched).await;
                        }
                    }
                    Some(Err(e)) => warn!("EndpointSlice watch error: {}", e),
                    None => {
                        error!("EndpointSlice watch stream ended");
                        return Ok(());
                    }
                },
                event = services.next() => match event {
                    Some(Ok(Event::Apply(svc))) => {
                        if let Some(service) = self.cache.upsert_frontend(&svc) {
                            self.resync(&service).await;
                        }
                    }
                    Some(Ok(Event::Delete(svc))) => {
                        self.cache.frontends.remove(&service_name(&svc));
                    }
                    Some(Ok(Event::Init)) => frontend_relist = Some(HashMap::new()),
                    Some(Ok(Event::InitApply(svc))) => {
                        if let (Some(relist), Some(frontend)) =
                            (frontend_relist.as_mut(), frontend_from_service(&svc))
                        {
                            relist.insert(service_name(&svc), frontend);
                        }
                    }
                    Some(Ok(Event::InitDone)) => {
                        if let Some(relist) = frontend_relist.take() {
                            let changed = self.cache.replace_frontends(relist);
                            debug!("Service relist done, {} frontends changed", changed.len());
                            self.resync_all(&changed).await;
                        }
                    }
                    Some(Err(e)) => warn!("Service watch error: {}", e),
                    None => {
                        error!("Service watch stream ended");
                        return Ok(());
                    }
                },
                Some(service) = resync_rx.recv() => self.resync(&service).await,
            }
        }
    }

    async fn resync(&self, service: &ServiceName) {
        sync_service(&self.cache, self.syncer.as_ref(), service).await;
    }

    async fn resync_all(&self, services: &BTreeSet<ServiceName>) {
        for service in services {
            self.resync(service).await;
        }
    }
}

/// Latest EndpointSlices and Service frontends seen by the watchers
struct BackendCache {
    zone: Option<String>,
    slices: SlicesByService,
    frontends: Frontends,
}

impl BackendCache {
    fn new(zone: Option<String>) -> Self {
        Self {
            zone,
            slices: HashMap::new(),
            frontends: HashMap::new(),
        }
    }

    /// Returns the service if its frontend changed
    fn upsert_frontend(&mut self, svc: &KubeService) -> Option<ServiceName> {
        let name = service_name(svc);
        let Some(frontend) = frontend_from_service(svc) else {
            self.frontends.remove(&name);
            return None;
        };
        if self.frontends.get(&name) == Some(&frontend) {
            return None;
        }
        debug!("Service {} frontend is now port {}", name, frontend.port);
        self.frontends.insert(name.clone(), frontend);
        Some(name)
    }

    /// Swap in a relisted slice set; returns every service seen before or after
    fn replace_slices(&mut self, slices: SlicesByService) -> BTreeSet<ServiceName> {
        let previous = std::mem::replace(&mut self.slices, slices);
        previous
            .into_keys()
            .chain(self.slices.keys().cloned())
            .collect()
    }

    /// Swap in relisted frontends; returns the services whose frontend changed
    fn replace_frontends(&mut self, frontends: Frontends) -> BTreeSet<ServiceName> {
        let changed = frontends
            .iter()
            .filter(|(name, frontend)| self.frontends.get(*name) != Some(*frontend))
            .map(|(name, _)| name.clone())
            .collect();
        self.frontends = frontends;
        changed
    }

    /// Current view of a service, if its frontend is known
    fn view(&self, service: &ServiceName) -> Option<Service> {
        let frontend = self.frontends.get(service)?.clone();
        let backends = self
            .slices
            .get(service)
            .map(|slices| backends_from_slices(slices.values(), self.zone.as_deref()))
            .unwrap_or_default();
        Some(Service {
            name: service.clone(),
            frontend,
            backends,
        })
    }
}

/// Hand the cached view of `service` to the syncer if an L7LB resource uses it.
/// Failures are logged; the next change retries.
async fn sync_service(cache: &BackendCache, syncer: &dyn BackendSyncer, service: &ServiceName) {
    if !syncer.service_in_use(service).await {
        return;
    }
    let Some(view) = cache.view(service) else {
        debug!("Service {} has no known frontend port, skipping sync", service);
        return;
    };
    if let Err(e) = syncer.sync(&view).await {
        error!("Backend sync of service {} failed: {:#}", service, anyhow::Error::from(e));
    }
}

fn service_name(svc: &KubeService) -> ServiceName {
    ServiceName::new(svc.namespace().unwrap_or_default(), svc.name_any())
}

fn service_of(slice: &EndpointSlice) -> Option<ServiceName> {
    let name = slice.labels().get(SERVICE_NAME_LABEL)?;
    Some(ServiceName::new(slice.namespace().unwrap_or_default(), name.clone()))
}

fn upsert_slice(slices: &mut SlicesByService, slice: EndpointSlice) -> Option<ServiceName> {
    let service = service_of(&slice)?;
    slices
        .entry(service.clone())
        .or_default()
        .insert(slice.name_any(), slice);
    Some(service)
}

fn remove_slice(slices: &mut SlicesByService, slice: &EndpointSlice) -> Option<ServiceName> {
    let service = service_of(slice)?;
    if let Some(by_name) = slices.get_mut(&service) {
        by_name.remove(&slice.name_any());
        if by_name.is_empty() {
            slices.remove(&service);
        }
    }
    Some(service)
}

/// Frontend of a Kubernetes Service: its first declared port
fn frontend_from_service(svc: &KubeService) -> Option<Frontend> {
    let port = svc.spec.as_ref()?.ports.as_ref()?.first()?;
    Some(Frontend {
        port: u16::try_from(port.port).ok()?,
        port_name: port.name.clone(),
    })
}

/// Every ready address of the slices, once per slice port
fn backends_from_slices<'a>(
    slices: impl Iterator<Item = &'a EndpointSlice>,
    zone: Option<&str>,
) -> Vec<Backend> {
    let mut backends = Vec::new();
    for slice in slices {
        let ports = slice.ports.as_deref().unwrap_or_default();
        for endpoint in slice.endpoints.iter().filter(|e| is_ready(e)) {
            let preferred = zone.is_some_and(|z| is_hinted_for_zone(endpoint, z));
            for address in &endpoint.addresses {
                for port in ports {
                    let Some(number) = port.port.and_then(|p| u16::try_from(p).ok()) else {
                        continue;
                    };
                    backends.push(Backend {
                        address: address.clone(),
                        port: number,
                        fe_port_name: port.name.clone().unwrap_or_default(),
                        preferred,
                    });
                }
            }
        }
    }
    backends
}

// unset readiness means ready
fn is_ready(endpoint: &Endpoint) -> bool {
    endpoint
        .conditions
        .as_ref()
        .and_then(|c| c.ready)
        .unwrap_or(true)
}

fn is_hinted_for_zone(endpoint: &Endpoint, zone: &str) -> bool {
    endpoint
        .hints
        .as_ref()
        .and_then(|h| h.for_zones.as_ref())
        .is_some_and(|zones| zones.iter().any(|z| z.name == zone))
}
