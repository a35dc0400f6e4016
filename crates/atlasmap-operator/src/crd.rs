//! AtlasMap CRD

use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// AtlasMap spec - desired state of one AtlasMap deployment
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "atlasmap.io",
    version = "v1alpha1",
    kind = "AtlasMap",
    plural = "atlasmaps",
    shortname = "am",
    namespaced = true,
    status = "AtlasMapStatus",
    printcolumn = r#"{"name":"URL", "type":"string", "description":"AtlasMap URL", "jsonPath":".status.URL"}"#,
    printcolumn = r#"{"name":"Image", "type":"string", "description":"AtlasMap image", "jsonPath":".status.image"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "description":"AtlasMap phase", "jsonPath":".status.phase"}"#
)]
pub struct AtlasMapSpec {
    /// Desired number of running AtlasMap pods
    #[serde(default)]
    pub replicas: i32,
    /// Host name for the Ingress or Route
    #[serde(
        rename = "routeHostName",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub route_host_name: String,
    /// Tag of the AtlasMap container image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Amount of CPU to request
    #[serde(rename = "requestCPU", default, skip_serializing_if = "String::is_empty")]
    pub request_cpu: String,
    /// Amount of memory to request
    #[serde(
        rename = "requestMemory",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub request_memory: String,
    /// CPU limit
    #[serde(rename = "limitCPU", default, skip_serializing_if = "String::is_empty")]
    pub limit_cpu: String,
    /// Memory limit
    #[serde(
        rename = "limitMemory",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub limit_memory: String,
}

/// AtlasMap status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AtlasMapStatus {
    /// URL where AtlasMap can be reached
    #[serde(rename = "URL", default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Container image AtlasMap is running
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<AtlasMapPhase>,
}

/// Lifecycle phase, derived from the Deployment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AtlasMapPhase {
    Undeployed,
    Deploying,
    Deployed,
}

impl AtlasMapPhase {
    /// Phase for a Deployment with `desired` replicas of which `ready` are ready.
    ///
    /// Anything between fully scaled down and serving (rolling out, draining)
    /// counts as `Deploying`.
    pub fn derive(desired: i32, ready: i32) -> Self {
        match (desired, ready) {
            (0, 0) => Self::Undeployed,
            (d, r) if d > 0 && r > 0 => Self::Deployed,
            _ => Self::Deploying,
        }
    }
}

impl fmt::Display for AtlasMapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undeployed => "Undeployed",
            Self::Deploying => "Deploying",
            Self::Deployed => "Deployed",
        };
        f.write_str(s)
    }
}

impl AtlasMap {
    /// Current resource version, empty if the object was never persisted
    pub fn resource_version_or_default(&self) -> String {
        self.resource_version().unwrap_or_default()
    }

    /// Whether a deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn status_or_default(&self) -> AtlasMapStatus {
        self.status.clone().unwrap_or_default()
    }
}
