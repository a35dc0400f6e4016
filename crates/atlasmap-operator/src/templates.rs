//! Object templates for the children of an AtlasMap

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::actions::ActionError;
use crate::config::{annotations, labels, OperatorConfig};
use crate::crd::AtlasMap;
use crate::naming;
use crate::openshift::{
    ConsoleLink, ConsoleLinkSpec, NamespaceDashboardSpec, Route, RouteSpec, RouteTargetReference,
    TlsConfig, NAMESPACE_DASHBOARD, TLS_TERMINATION_EDGE,
};
use crate::resources;

pub const CONTAINER_NAME: &str = "atlasmap";
pub const PORT_NAME_HTTP: &str = "http";
pub const PORT_HTTP: i32 = 8585;
pub const PORT_JOLOKIA: i32 = 8778;
pub const PORT_PROMETHEUS: i32 = 9779;

const LIVENESS_INITIAL_DELAY_SECS: i32 = 60;
const READINESS_INITIAL_DELAY_SECS: i32 = 15;
const READINESS_FAILURE_THRESHOLD: i32 = 5;

/// Health endpoint of releases before 1.43 (Spring Boot 1)
pub const LEGACY_PROBE_PATH: &str = "/management/health";
/// Health endpoint of current releases (Spring Boot 2 actuator)
pub const PROBE_PATH: &str = "/actuator/health";

/// Tag the AtlasMap should run
pub fn desired_version<'a>(atlasmap: &'a AtlasMap, config: &'a OperatorConfig) -> &'a str {
    if atlasmap.spec.version.is_empty() {
        &config.default_version
    } else {
        &atlasmap.spec.version
    }
}

/// Full image reference the AtlasMap should run
pub fn desired_image(atlasmap: &AtlasMap, config: &OperatorConfig) -> String {
    naming::image_name(&config.image, desired_version(atlasmap, config))
}

/// Health probe path for an AtlasMap version.
///
/// Versions before 1.43 serve the legacy endpoint. An empty version, or one
/// without a minor component, uses the current endpoint. A non-numeric
/// major or minor is an error.
pub fn probe_path(version: &str) -> Result<&'static str, ActionError> {
    let mut parts = version.split('.');
    let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
        return Ok(PROBE_PATH);
    };

    let parse = |part: &str| {
        part.parse::<i64>().map_err(|e| ActionError::InvalidVersion {
            version: version.to_string(),
            reason: e.to_string(),
        })
    };
    let (major, minor) = (parse(major)?, parse(minor)?);

    if major == 1 && minor < 43 {
        Ok(LEGACY_PROBE_PATH)
    } else {
        Ok(PROBE_PATH)
    }
}

/// Labels carried by every child, also used as the pod selector
pub fn labels(atlasmap: &AtlasMap, config: &OperatorConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::NAME.to_string(), atlasmap.name_any()),
        (
            labels::VERSION.to_string(),
            desired_version(atlasmap, config).to_string(),
        ),
        (
            labels::OPERATOR_VERSION.to_string(),
            config.operator_version.clone(),
        ),
    ])
}

/// Metadata for a namespaced child, owned by the AtlasMap
fn child_metadata(atlasmap: &AtlasMap, config: &OperatorConfig) -> Result<ObjectMeta, ActionError> {
    let namespace = atlasmap
        .namespace()
        .ok_or(ActionError::MissingField("metadata.namespace"))?;
    let owner = atlasmap
        .controller_owner_ref(&())
        .ok_or(ActionError::MissingField("metadata.uid"))?;

    Ok(ObjectMeta {
        name: Some(atlasmap.name_any()),
        namespace: Some(namespace),
        labels: Some(labels(atlasmap, config)),
        owner_references: Some(vec![owner]),
        ..Default::default()
    })
}

pub fn service(atlasmap: &AtlasMap, config: &OperatorConfig) -> Result<Service, ActionError> {
    Ok(Service {
        metadata: child_metadata(atlasmap, config)?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels(atlasmap, config)),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME_HTTP.to_string()),
                port: PORT_HTTP,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Route to the AtlasMap Service; the router assigns a host when none is set
pub fn route(atlasmap: &AtlasMap, config: &OperatorConfig) -> Result<Route, ActionError> {
    Ok(Route {
        metadata: child_metadata(atlasmap, config)?,
        spec: RouteSpec {
            host: atlasmap.spec.route_host_name.clone(),
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: atlasmap.name_any(),
            },
            tls: Some(TlsConfig {
                termination: TLS_TERMINATION_EDGE.to_string(),
            }),
        },
    })
}

pub fn ingress(
    atlasmap: &AtlasMap,
    config: &OperatorConfig,
    host: &str,
) -> Result<Ingress, ActionError> {
    Ok(Ingress {
        metadata: child_metadata(atlasmap, config)?,
        spec: Some(IngressSpec {
            default_backend: Some(IngressBackend {
                service: Some(IngressServiceBackend {
                    name: atlasmap.name_any(),
                    port: Some(ServiceBackendPort {
                        number: Some(PORT_HTTP),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
            rules: Some(vec![IngressRule {
                host: Some(host.to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Cluster-scoped ConsoleLink shown on the AtlasMap namespace's dashboard.
///
/// No owner reference: a namespaced owner cannot own a cluster-scoped object.
pub fn console_link(
    atlasmap: &AtlasMap,
    config: &OperatorConfig,
    link_name: &str,
    href: &str,
) -> ConsoleLink {
    let mut link = ConsoleLink::new(
        link_name,
        ConsoleLinkSpec {
            text: naming::console_link_text(&atlasmap.name_any()),
            href: href.to_string(),
            location: NAMESPACE_DASHBOARD.to_string(),
            namespace_dashboard: Some(NamespaceDashboardSpec {
                namespaces: atlasmap.namespace().into_iter().collect(),
            }),
        },
    );
    link.metadata.labels = Some(labels(atlasmap, config));
    link
}

fn http_probe(path: &str) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::String(PORT_NAME_HTTP.to_string()),
            scheme: Some("HTTP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Point both health probes of `container` at `path`
pub fn set_probe_path(container: &mut Container, path: &str) {
    for probe in [
        container.liveness_probe.as_mut(),
        container.readiness_probe.as_mut(),
    ]
    .into_iter()
    .flatten()
    {
        match probe.http_get.as_mut() {
            Some(get) => get.path = Some(path.to_string()),
            None => probe.http_get = http_probe(path).http_get,
        }
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        ..Default::default()
    }
}

/// Deployment running one AtlasMap container.
///
/// The replica annotation is stamped with the AtlasMap's current resource
/// version, since the replica count comes straight from its spec.
pub fn deployment(atlasmap: &AtlasMap, config: &OperatorConfig) -> Result<Deployment, ActionError> {
    let probe_path = probe_path(&atlasmap.spec.version)?;
    let labels = labels(atlasmap, config);

    let mut metadata = child_metadata(atlasmap, config)?;
    metadata.annotations = Some(BTreeMap::from([(
        annotations::LAST_RECONCILED_RESOURCE_VERSION.to_string(),
        atlasmap.resource_version_or_default(),
    )]));

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(desired_image(atlasmap, config)),
        image_pull_policy: Some("Always".to_string()),
        ports: Some(vec![
            container_port(PORT_NAME_HTTP, PORT_HTTP),
            container_port("jolokia", PORT_JOLOKIA),
            container_port("prometheus", PORT_PROMETHEUS),
        ]),
        liveness_probe: Some(Probe {
            initial_delay_seconds: Some(LIVENESS_INITIAL_DELAY_SECS),
            ..http_probe(probe_path)
        }),
        readiness_probe: Some(Probe {
            initial_delay_seconds: Some(READINESS_INITIAL_DELAY_SECS),
            failure_threshold: Some(READINESS_FAILURE_THRESHOLD),
            ..http_probe(probe_path)
        }),
        resources: Some(resources::desired_requirements(&atlasmap.spec)?),
        ..Default::default()
    };

    Ok(Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(atlasmap.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}
