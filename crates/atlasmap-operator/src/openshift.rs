//! OpenShift resource types
//!
//! Minimal definitions of the OpenShift kinds the operator touches. Only the
//! fields the operator reads or writes are modeled; everything else is
//! ignored on deserialization.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group/version whose presence identifies an OpenShift cluster
pub const ROUTE_GROUP_VERSION: &str = "route.openshift.io/v1";

/// Name of the singleton ClusterVersion object
pub const CLUSTER_VERSION_NAME: &str = "version";

/// TLS termination at the router
pub const TLS_TERMINATION_EDGE: &str = "edge";

/// ConsoleLink location shown on a namespace's dashboard
pub const NAMESPACE_DASHBOARD: &str = "NamespaceDashboard";

/// Route spec (route.openshift.io/v1)
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    plural = "routes",
    namespaced = true
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    /// External host name; assigned by the router when left empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Service the Route forwards to
    pub to: RouteTargetReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub termination: String,
}

/// ConsoleLink spec (console.openshift.io/v1, cluster-scoped)
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "console.openshift.io",
    version = "v1",
    kind = "ConsoleLink",
    plural = "consolelinks"
)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLinkSpec {
    /// Display text
    pub text: String,
    /// Absolute link target
    pub href: String,
    /// Where the console shows the link
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_dashboard: Option<NamespaceDashboardSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceDashboardSpec {
    #[serde(default)]
    pub namespaces: Vec<String>,
}

/// ClusterVersion spec (config.openshift.io/v1, cluster-scoped)
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "ClusterVersion",
    plural = "clusterversions",
    status = "ClusterVersionStatus"
)]
pub struct ClusterVersionSpec {
    #[serde(rename = "clusterID", default)]
    pub cluster_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ClusterVersionStatus {
    /// Update history, most recent first
    #[serde(default)]
    pub history: Vec<UpdateHistory>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UpdateHistory {
    pub version: String,
    #[serde(default)]
    pub state: String,
}

impl ClusterVersion {
    /// Most recent version in the update history
    pub fn current_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.history.first())
            .map(|h| h.version.as_str())
            .filter(|v| !v.is_empty())
    }
}
