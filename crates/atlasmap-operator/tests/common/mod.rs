//! In-memory cluster for end-to-end pipeline tests
//!
//! Behaves like the API server where the operator depends on it: resource
//! versions bump on every write, stale writes conflict, creates of existing
//! objects fail, and status writes only touch the status.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Resource, ResourceExt};

use atlasmap_operator::actions::Pipeline;
use atlasmap_operator::capability::PlatformCapabilities;
use atlasmap_operator::client::{ClusterClient, ClusterError};
use atlasmap_operator::config::OperatorConfig;
use atlasmap_operator::openshift::{ConsoleLink, Route};
use atlasmap_operator::{AtlasMap, AtlasMapSpec};

pub const NAMESPACE: &str = "ns1";
pub const NAME: &str = "demo";

/// A write the operator made
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub verb: &'static str,
    pub kind: &'static str,
    pub name: String,
}

type Key = (String, String);

#[derive(Default)]
struct State {
    resource_version: u64,
    atlasmaps: BTreeMap<Key, AtlasMap>,
    services: BTreeMap<Key, Service>,
    routes: BTreeMap<Key, Route>,
    ingresses: BTreeMap<Key, Ingress>,
    deployments: BTreeMap<Key, Deployment>,
    console_links: BTreeMap<String, ConsoleLink>,
    writes: Vec<Write>,
    conflict_on_next_write: Option<&'static str>,
}

impl State {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn record(&mut self, verb: &'static str, kind: &'static str, name: &str) {
        self.writes.push(Write {
            verb,
            kind,
            name: name.to_string(),
        });
    }

    fn injected_conflict(&mut self, kind: &'static str, name: &str) -> Result<(), ClusterError> {
        if self.conflict_on_next_write == Some(kind) {
            self.conflict_on_next_write = None;
            return Err(conflict(kind, name));
        }
        Ok(())
    }
}

fn conflict(kind: &'static str, name: &str) -> ClusterError {
    ClusterError::Conflict {
        kind,
        name: name.to_string(),
        message: "the object has been modified; please apply your changes to the latest version"
            .to_string(),
    }
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn create_in<K: Resource + Clone>(
    map: &mut BTreeMap<Key, K>,
    version: String,
    kind: &'static str,
    obj: &K,
) -> Result<K, ClusterError> {
    let key = key_of(obj);
    if map.contains_key(&key) {
        return Err(ClusterError::AlreadyExists { kind, name: key.1 });
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(version);
    stored.meta_mut().uid = Some(format!("uid-{}-{}", kind.to_lowercase(), key.1));
    map.insert(key, stored.clone());
    Ok(stored)
}

fn replace_in<K: Resource + Clone>(
    map: &mut BTreeMap<Key, K>,
    version: String,
    kind: &'static str,
    obj: &K,
) -> Result<K, ClusterError> {
    let key = key_of(obj);
    let current = map.get(&key).ok_or_else(|| ClusterError::NotFound {
        kind,
        name: key.1.clone(),
    })?;
    if current.meta().resource_version != obj.meta().resource_version {
        return Err(conflict(kind, &key.1));
    }
    let mut stored = obj.clone();
    stored.meta_mut().resource_version = Some(version);
    map.insert(key, stored.clone());
    Ok(stored)
}

/// In-memory [`ClusterClient`]
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Store an AtlasMap `demo` in `ns1` as a user would create it
    pub fn create_atlasmap(&self, spec: AtlasMapSpec) -> AtlasMap {
        let mut am = AtlasMap::new(NAME, spec);
        am.metadata.namespace = Some(NAMESPACE.to_string());
        let mut state = self.state();
        let version = state.next_version();
        create_in(&mut state.atlasmaps, version, "AtlasMap", &am).unwrap()
    }

    pub fn atlasmap(&self) -> Option<AtlasMap> {
        self.state().atlasmaps.get(&key(NAMESPACE, NAME)).cloned()
    }

    pub fn deployment(&self) -> Option<Deployment> {
        self.state().deployments.get(&key(NAMESPACE, NAME)).cloned()
    }

    pub fn service(&self) -> Option<Service> {
        self.state().services.get(&key(NAMESPACE, NAME)).cloned()
    }

    pub fn route(&self) -> Option<Route> {
        self.state().routes.get(&key(NAMESPACE, NAME)).cloned()
    }

    pub fn ingress(&self) -> Option<Ingress> {
        self.state().ingresses.get(&key(NAMESPACE, NAME)).cloned()
    }

    pub fn console_link(&self, name: &str) -> Option<ConsoleLink> {
        self.state().console_links.get(name).cloned()
    }

    /// Edit the AtlasMap spec from outside the operator
    pub fn edit_atlasmap(&self, edit: impl FnOnce(&mut AtlasMapSpec)) {
        let mut state = self.state();
        let version = state.next_version();
        if let Some(am) = state.atlasmaps.get_mut(&key(NAMESPACE, NAME)) {
            edit(&mut am.spec);
            am.metadata.resource_version = Some(version);
        }
    }

    /// Edit the Deployment from outside the operator
    pub fn edit_deployment(&self, edit: impl FnOnce(&mut Deployment)) {
        let mut state = self.state();
        let version = state.next_version();
        if let Some(deployment) = state.deployments.get_mut(&key(NAMESPACE, NAME)) {
            edit(deployment);
            deployment.metadata.resource_version = Some(version);
        }
    }

    /// Scale the Deployment as an autoscaler would
    pub fn scale_deployment(&self, replicas: i32) {
        self.edit_deployment(|d| {
            if let Some(spec) = d.spec.as_mut() {
                spec.replicas = Some(replicas);
            }
        });
    }

    /// Report `ready` ready pods on the Deployment
    pub fn set_ready_replicas(&self, ready: i32) {
        self.edit_deployment(|d| {
            d.status = Some(DeploymentStatus {
                ready_replicas: Some(ready),
                ..Default::default()
            });
        });
    }

    /// Assign a host to the Route as the OpenShift router would
    pub fn admit_route(&self, host: &str) {
        let mut state = self.state();
        let version = state.next_version();
        if let Some(route) = state.routes.get_mut(&key(NAMESPACE, NAME)) {
            route.spec.host = host.to_string();
            route.metadata.resource_version = Some(version);
        }
    }

    /// Delete the AtlasMap; finalizers keep it around with a deletion marker
    pub fn delete_atlasmap(&self) {
        let mut state = self.state();
        let version = state.next_version();
        let k = key(NAMESPACE, NAME);
        let Some(am) = state.atlasmaps.get(&k).cloned() else {
            return;
        };
        if am.finalizers().is_empty() {
            state.atlasmaps.remove(&k);
            return;
        }
        let mut value = serde_json::to_value(&am).unwrap();
        value["metadata"]["deletionTimestamp"] = "2024-01-01T00:00:00Z".into();
        value["metadata"]["resourceVersion"] = version.into();
        state.atlasmaps.insert(k, serde_json::from_value(value).unwrap());
    }

    /// Fail the next write to `kind` with a conflict
    pub fn conflict_on_next_write(&self, kind: &'static str) {
        self.state().conflict_on_next_write = Some(kind);
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_atlasmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AtlasMap>, ClusterError> {
        Ok(self.state().atlasmaps.get(&key(namespace, name)).cloned())
    }

    async fn update_atlasmap(&self, atlasmap: &AtlasMap) -> Result<AtlasMap, ClusterError> {
        let mut state = self.state();
        let name = atlasmap.name_any();
        state.injected_conflict("AtlasMap", &name)?;
        let k = key_of(atlasmap);
        let current_status = state.atlasmaps.get(&k).and_then(|am| am.status.clone());

        // the main resource ignores status
        let mut incoming = atlasmap.clone();
        incoming.status = current_status;
        let version = state.next_version();
        let stored = replace_in(&mut state.atlasmaps, version, "AtlasMap", &incoming)?;
        state.record("update", "AtlasMap", &name);

        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            state.atlasmaps.remove(&k);
        }
        Ok(stored)
    }

    async fn update_atlasmap_status(&self, atlasmap: &AtlasMap) -> Result<AtlasMap, ClusterError> {
        let mut state = self.state();
        let name = atlasmap.name_any();
        state.injected_conflict("AtlasMap", &name)?;
        let k = key_of(atlasmap);
        let mut stored = state
            .atlasmaps
            .get(&k)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "AtlasMap",
                name: name.clone(),
            })?;
        if stored.metadata.resource_version != atlasmap.metadata.resource_version {
            return Err(conflict("AtlasMap", &name));
        }
        stored.status = atlasmap.status.clone();
        stored.metadata.resource_version = Some(state.next_version());
        state.atlasmaps.insert(k, stored.clone());
        state.record("update-status", "AtlasMap", &name);
        Ok(stored)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        Ok(self.state().services.get(&key(namespace, name)).cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        let mut state = self.state();
        let version = state.next_version();
        let stored = create_in(&mut state.services, version, "Service", service)?;
        state.record("create", "Service", &stored.name_any());
        Ok(stored)
    }

    async fn get_route(&self, namespace: &str, name: &str) -> Result<Option<Route>, ClusterError> {
        Ok(self.state().routes.get(&key(namespace, name)).cloned())
    }

    async fn create_route(&self, route: &Route) -> Result<Route, ClusterError> {
        let mut state = self.state();
        let version = state.next_version();
        let stored = create_in(&mut state.routes, version, "Route", route)?;
        state.record("create", "Route", &stored.name_any());
        Ok(stored)
    }

    async fn update_route(&self, route: &Route) -> Result<Route, ClusterError> {
        let mut state = self.state();
        state.injected_conflict("Route", &route.name_any())?;
        let version = state.next_version();
        let stored = replace_in(&mut state.routes, version, "Route", route)?;
        state.record("update", "Route", &stored.name_any());
        Ok(stored)
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<Option<Ingress>, ClusterError> {
        Ok(self.state().ingresses.get(&key(namespace, name)).cloned())
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, ClusterError> {
        let mut state = self.state();
        let version = state.next_version();
        let stored = create_in(&mut state.ingresses, version, "Ingress", ingress)?;
        state.record("create", "Ingress", &stored.name_any());
        Ok(stored)
    }

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, ClusterError> {
        let mut state = self.state();
        state.injected_conflict("Ingress", &ingress.name_any())?;
        let version = state.next_version();
        let stored = replace_in(&mut state.ingresses, version, "Ingress", ingress)?;
        state.record("update", "Ingress", &stored.name_any());
        Ok(stored)
    }

    async fn get_console_link(&self, name: &str) -> Result<Option<ConsoleLink>, ClusterError> {
        Ok(self.state().console_links.get(name).cloned())
    }

    async fn create_console_link(&self, link: &ConsoleLink) -> Result<ConsoleLink, ClusterError> {
        let mut state = self.state();
        let name = link.name_any();
        if state.console_links.contains_key(&name) {
            return Err(ClusterError::AlreadyExists {
                kind: "ConsoleLink",
                name,
            });
        }
        let mut stored = link.clone();
        stored.metadata.resource_version = Some(state.next_version());
        state.console_links.insert(name.clone(), stored.clone());
        state.record("create", "ConsoleLink", &name);
        Ok(stored)
    }

    async fn update_console_link(&self, link: &ConsoleLink) -> Result<ConsoleLink, ClusterError> {
        let mut state = self.state();
        let name = link.name_any();
        let current = state
            .console_links
            .get(&name)
            .ok_or_else(|| ClusterError::NotFound {
                kind: "ConsoleLink",
                name: name.clone(),
            })?;
        if current.metadata.resource_version != link.metadata.resource_version {
            return Err(conflict("ConsoleLink", &name));
        }
        let mut stored = link.clone();
        stored.metadata.resource_version = Some(state.next_version());
        state.console_links.insert(name.clone(), stored.clone());
        state.record("update", "ConsoleLink", &name);
        Ok(stored)
    }

    async fn delete_console_link(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        state
            .console_links
            .remove(name)
            .ok_or_else(|| ClusterError::NotFound {
                kind: "ConsoleLink",
                name: name.to_string(),
            })?;
        state.record("delete", "ConsoleLink", name);
        Ok(())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError> {
        Ok(self.state().deployments.get(&key(namespace, name)).cloned())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let mut state = self.state();
        let version = state.next_version();
        let stored = create_in(&mut state.deployments, version, "Deployment", deployment)?;
        state.record("create", "Deployment", &stored.name_any());
        Ok(stored)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let mut state = self.state();
        state.injected_conflict("Deployment", &deployment.name_any())?;
        let version = state.next_version();
        let stored = replace_in(&mut state.deployments, version, "Deployment", deployment)?;
        state.record("update", "Deployment", &stored.name_any());
        Ok(stored)
    }

    async fn check_readiness(&self) -> Result<bool, ClusterError> {
        Ok(true)
    }
}

pub fn config() -> OperatorConfig {
    OperatorConfig {
        operator_version: "0.1.0".to_string(),
        ..Default::default()
    }
}

/// Pipeline for plain Kubernetes (Ingress, no ConsoleLink)
pub fn kubernetes_pipeline() -> Pipeline {
    Pipeline::new(PlatformCapabilities::default(), Arc::new(config()))
}

/// Pipeline for OpenShift 4.3 or later (Route and ConsoleLink)
pub fn openshift_pipeline() -> Pipeline {
    Pipeline::new(
        PlatformCapabilities {
            restricted_routing: true,
            dashboard_links: true,
        },
        Arc::new(config()),
    )
}

pub fn deployment_replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|s| s.replicas)
}

pub fn writes_of(writes: &[Write], verb: &str, kind: &str) -> usize {
    writes
        .iter()
        .filter(|w| w.verb == verb && w.kind == kind)
        .count()
}
