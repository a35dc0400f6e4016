//! Kubernetes API client boundary
//!
//! Every cluster call the reconciler makes goes through [`ClusterClient`], so
//! actions can be tested against mocks and an in-memory fake. Absence on
//! lookup is `Ok(None)`, not an error; write failures are mapped onto the
//! NotFound / AlreadyExists / Conflict taxonomy the actions branch on.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::crd::AtlasMap;
use crate::openshift::{ConsoleLink, Route};

/// Trait for the cluster operations the reconciler needs
///
/// `update_*` calls carry the object's `resourceVersion`, so a stale write
/// fails with [`ClusterError::Conflict`]. Writes return the object as stored
/// by the API server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_atlasmap(&self, namespace: &str, name: &str)
        -> Result<Option<AtlasMap>, ClusterError>;

    /// Replace the AtlasMap (spec and metadata)
    async fn update_atlasmap(&self, atlasmap: &AtlasMap) -> Result<AtlasMap, ClusterError>;

    /// Write the AtlasMap status subresource
    async fn update_atlasmap_status(&self, atlasmap: &AtlasMap) -> Result<AtlasMap, ClusterError>;

    async fn get_service(&self, namespace: &str, name: &str)
        -> Result<Option<Service>, ClusterError>;

    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError>;

    async fn get_route(&self, namespace: &str, name: &str) -> Result<Option<Route>, ClusterError>;

    async fn create_route(&self, route: &Route) -> Result<Route, ClusterError>;

    async fn update_route(&self, route: &Route) -> Result<Route, ClusterError>;

    async fn get_ingress(&self, namespace: &str, name: &str)
        -> Result<Option<Ingress>, ClusterError>;

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, ClusterError>;

    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, ClusterError>;

    /// ConsoleLinks are cluster-scoped and looked up by name only
    async fn get_console_link(&self, name: &str) -> Result<Option<ConsoleLink>, ClusterError>;

    async fn create_console_link(&self, link: &ConsoleLink) -> Result<ConsoleLink, ClusterError>;

    async fn update_console_link(&self, link: &ConsoleLink) -> Result<ConsoleLink, ClusterError>;

    /// Delete a ConsoleLink; a missing link yields [`ClusterError::NotFound`]
    async fn delete_console_link(&self, name: &str) -> Result<(), ClusterError>;

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError>;

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError>;

    /// Check API server reachability
    ///
    /// Returns `Ok(true)` when the API server answers its version endpoint.
    async fn check_readiness(&self) -> Result<bool, ClusterError>;
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("Conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },
    #[error("Kubernetes API error for {kind} {name}: {source}")]
    Kube {
        kind: &'static str,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("Failed to serialize {kind}: {source}")]
    Serialize {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{kind} is missing metadata.{field}")]
    MissingMetadata {
        kind: &'static str,
        field: &'static str,
    },
}

impl ClusterError {
    /// Map a kube error onto the cluster error taxonomy
    pub fn from_kube(kind: &'static str, name: &str, err: kube::Error) -> Self {
        let name = name.to_string();
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound { kind, name },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists { kind, name }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind,
                name,
                message: ae.message,
            },
            source => Self::Kube { kind, name, source },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Production client backed by `kube::Api`
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaced_for<K>(&self, kind: &'static str, obj: &K) -> Result<Api<K>, ClusterError>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = obj
            .meta()
            .namespace
            .as_deref()
            .ok_or(ClusterError::MissingMetadata {
                kind,
                field: "namespace",
            })?;
        Ok(self.namespaced(namespace))
    }
}

fn name_of<K: Resource>(kind: &'static str, obj: &K) -> Result<String, ClusterError> {
    obj.meta().name.clone().ok_or(ClusterError::MissingMetadata {
        kind,
        field: "name",
    })
}

async fn get_opt<K>(api: &Api<K>, kind: &'static str, name: &str) -> Result<Option<K>, ClusterError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.get_opt(name)
        .await
        .map_err(|e| ClusterError::from_kube(kind, name, e))
}

async fn create<K>(api: &Api<K>, kind: &'static str, obj: &K) -> Result<K, ClusterError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = name_of(kind, obj)?;
    let created = api
        .create(&PostParams::default(), obj)
        .await
        .map_err(|e| ClusterError::from_kube(kind, &name, e))?;
    debug!(kind, name = %name, "Created object");
    Ok(created)
}

async fn replace<K>(api: &Api<K>, kind: &'static str, obj: &K) -> Result<K, ClusterError>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let name = name_of(kind, obj)?;
    let updated = api
        .replace(&name, &PostParams::default(), obj)
        .await
        .map_err(|e| ClusterError::from_kube(kind, &name, e))?;
    debug!(kind, name = %name, resource_version = ?updated.resource_version(), "Updated object");
    Ok(updated)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    #[instrument(skip(self))]
    async fn get_atlasmap(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AtlasMap>, ClusterError> {
        get_opt(&self.namespaced::<AtlasMap>(namespace), "AtlasMap", name).await
    }

    #[instrument(skip(self, atlasmap), fields(name = %atlasmap.name_any()))]
    async fn update_atlasmap(&self, atlasmap: &AtlasMap) -> Result<AtlasMap, ClusterError> {
        replace(&self.namespaced_for("AtlasMap", atlasmap)?, "AtlasMap", atlasmap).await
    }

    #[instrument(skip(self, atlasmap), fields(name = %atlasmap.name_any()))]
    async fn update_atlasmap_status(&self, atlasmap: &AtlasMap) -> Result<AtlasMap, ClusterError> {
        let api = self.namespaced_for("AtlasMap", atlasmap)?;
        let name = name_of("AtlasMap", atlasmap)?;

        let status = serde_json::to_value(&atlasmap.status).map_err(|source| {
            ClusterError::Serialize {
                kind: "AtlasMap",
                source,
            }
        })?;
        // resourceVersion in a merge patch makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": atlasmap.resource_version() },
            "status": status,
        });

        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube("AtlasMap", &name, e))
    }

    #[instrument(skip(self))]
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Service>, ClusterError> {
        get_opt(&self.namespaced::<Service>(namespace), "Service", name).await
    }

    #[instrument(skip(self, service))]
    async fn create_service(&self, service: &Service) -> Result<Service, ClusterError> {
        create(&self.namespaced_for("Service", service)?, "Service", service).await
    }

    #[instrument(skip(self))]
    async fn get_route(&self, namespace: &str, name: &str) -> Result<Option<Route>, ClusterError> {
        get_opt(&self.namespaced::<Route>(namespace), "Route", name).await
    }

    #[instrument(skip(self, route))]
    async fn create_route(&self, route: &Route) -> Result<Route, ClusterError> {
        create(&self.namespaced_for("Route", route)?, "Route", route).await
    }

    #[instrument(skip(self, route))]
    async fn update_route(&self, route: &Route) -> Result<Route, ClusterError> {
        replace(&self.namespaced_for("Route", route)?, "Route", route).await
    }

    #[instrument(skip(self))]
    async fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Ingress>, ClusterError> {
        get_opt(&self.namespaced::<Ingress>(namespace), "Ingress", name).await
    }

    #[instrument(skip(self, ingress))]
    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, ClusterError> {
        create(&self.namespaced_for("Ingress", ingress)?, "Ingress", ingress).await
    }

    #[instrument(skip(self, ingress))]
    async fn update_ingress(&self, ingress: &Ingress) -> Result<Ingress, ClusterError> {
        replace(&self.namespaced_for("Ingress", ingress)?, "Ingress", ingress).await
    }

    #[instrument(skip(self))]
    async fn get_console_link(&self, name: &str) -> Result<Option<ConsoleLink>, ClusterError> {
        get_opt(&Api::<ConsoleLink>::all(self.client.clone()), "ConsoleLink", name).await
    }

    #[instrument(skip(self, link))]
    async fn create_console_link(&self, link: &ConsoleLink) -> Result<ConsoleLink, ClusterError> {
        create(&Api::all(self.client.clone()), "ConsoleLink", link).await
    }

    #[instrument(skip(self, link))]
    async fn update_console_link(&self, link: &ConsoleLink) -> Result<ConsoleLink, ClusterError> {
        replace(&Api::all(self.client.clone()), "ConsoleLink", link).await
    }

    #[instrument(skip(self))]
    async fn delete_console_link(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<ConsoleLink> = Api::all(self.client.clone());
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ClusterError::from_kube("ConsoleLink", name, e))?;
        debug!(name = %name, "Deleted ConsoleLink");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, ClusterError> {
        get_opt(&self.namespaced::<Deployment>(namespace), "Deployment", name).await
    }

    #[instrument(skip(self, deployment))]
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        create(&self.namespaced_for("Deployment", deployment)?, "Deployment", deployment).await
    }

    #[instrument(skip(self, deployment))]
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        replace(&self.namespaced_for("Deployment", deployment)?, "Deployment", deployment).await
    }

    #[instrument(skip(self))]
    async fn check_readiness(&self) -> Result<bool, ClusterError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| ClusterError::from_kube("APIServer", "version", e))?;
        debug!(version = %info.git_version, "API server readiness check: OK");
        Ok(true)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{canned_client, status_body};
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn test_deployment() -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("demo".to_string()),
                namespace: Some("ns1".to_string()),
                resource_version: Some("7".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_missing_object_is_none() {
        let client = KubeClusterClient::new(canned_client(
            404,
            status_body(404, "NotFound", "services \"demo\" not found"),
        ));

        let result = client.get_service("ns1", "demo").await;
        assert!(matches!(result, Ok(None)), "got {result:?}");
    }

    #[tokio::test]
    async fn test_create_existing_maps_to_already_exists() {
        let client = KubeClusterClient::new(canned_client(
            409,
            status_body(409, "AlreadyExists", "deployments.apps \"demo\" already exists"),
        ));

        let err = client
            .create_deployment(&test_deployment())
            .await
            .unwrap_err();
        assert!(err.is_already_exists(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_stale_update_maps_to_conflict() {
        let client = KubeClusterClient::new(canned_client(
            409,
            status_body(
                409,
                "Conflict",
                "the object has been modified; please apply your changes to the latest version",
            ),
        ));

        let err = client
            .update_deployment(&test_deployment())
            .await
            .unwrap_err();
        assert!(err.is_conflict(), "got {err:?}");
        assert!(err.to_string().contains("Deployment demo"));
    }

    #[tokio::test]
    async fn test_delete_missing_console_link_is_not_found() {
        let client = KubeClusterClient::new(canned_client(
            404,
            status_body(404, "NotFound", "consolelinks \"demo-ns1\" not found"),
        ));

        let err = client.delete_console_link("demo-ns1").await.unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_server_error_is_kube_error() {
        let client = KubeClusterClient::new(canned_client(
            500,
            status_body(500, "InternalError", "etcd unavailable"),
        ));

        let err = client.get_deployment("ns1", "demo").await.unwrap_err();
        assert!(matches!(err, ClusterError::Kube { kind: "Deployment", .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_write_without_namespace_is_rejected() {
        let client = KubeClusterClient::new(canned_client(200, serde_json::json!({})));
        let mut deployment = test_deployment();
        deployment.metadata.namespace = None;

        let err = client.create_deployment(&deployment).await.unwrap_err();
        assert!(matches!(
            err,
            ClusterError::MissingMetadata {
                kind: "Deployment",
                field: "namespace"
            }
        ));
    }

    #[tokio::test]
    async fn test_status_update_returns_stored_object() {
        let client = KubeClusterClient::new(canned_client(
            200,
            serde_json::json!({
                "apiVersion": "atlasmap.io/v1alpha1",
                "kind": "AtlasMap",
                "metadata": { "name": "demo", "namespace": "ns1", "resourceVersion": "8" },
                "spec": { "replicas": 1 },
                "status": { "phase": "Deploying" }
            }),
        ));

        let mut atlasmap = AtlasMap::new("demo", Default::default());
        atlasmap.metadata.namespace = Some("ns1".to_string());
        atlasmap.metadata.resource_version = Some("7".to_string());

        let stored = client
            .update_atlasmap_status(&atlasmap)
            .await
            .expect("status write succeeds");
        assert_eq!(stored.resource_version().as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn test_readiness_reports_api_server_version() {
        let client = KubeClusterClient::new(canned_client(
            200,
            serde_json::json!({
                "major": "1",
                "minor": "30",
                "gitVersion": "v1.30.2",
                "gitCommit": "abc",
                "gitTreeState": "clean",
                "buildDate": "2024-06-01T00:00:00Z",
                "goVersion": "go1.22.4",
                "compiler": "gc",
                "platform": "linux/amd64"
            }),
        ));

        assert!(client.check_readiness().await.expect("readiness succeeds"));
    }

    #[test]
    fn test_error_predicates() {
        let not_found = ClusterError::NotFound {
            kind: "Route",
            name: "demo".to_string(),
        };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
        assert_eq!(not_found.to_string(), "Route demo not found");
    }
}
