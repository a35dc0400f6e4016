//! Deployment action
//!
//! Creates the Deployment when missing. Otherwise each pass runs, in order:
//! replica sync, phase derivation, image and probe reconciliation, resource
//! reconciliation, and a final re-stamp of the replica annotation.
//!
//! Replica sync direction is decided by the
//! `atlasmap.io/atlasmap.resource.version` annotation. When it matches the
//! AtlasMap's current resource version, nobody has edited the AtlasMap since
//! the operator last pushed replicas, so a differing Deployment replica count
//! came from outside (an autoscaler, `kubectl scale`) and is copied back into
//! the AtlasMap. Otherwise the AtlasMap wins.
//!
//! Every Deployment write stamps the annotation with the resource version of
//! the AtlasMap it was computed from, so a pass that already wrote rarely
//! needs the final re-stamp. The re-stamp re-fetches the AtlasMap and is not
//! atomic with it; a replica edit landing between the two is only picked up
//! on a later pass.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use tracing::{debug, info, warn};

use crate::client::{ClusterClient, ClusterError};
use crate::config::{annotations, OperatorConfig};
use crate::crd::{AtlasMap, AtlasMapPhase};
use crate::resources::{desired_requirements, resources_changed};
use crate::templates;

use super::{object_ref, status_mut, write_status, ActionError};

/// Replica count the API server assumes when `spec.replicas` is unset
const DEFAULT_REPLICAS: i32 = 1;

pub(super) async fn handle(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    atlasmap: &mut AtlasMap,
) -> Result<(), ActionError> {
    let (namespace, name) = object_ref(atlasmap)?;

    let Some(mut deployment) = client.get_deployment(&namespace, &name).await? else {
        let deployment = templates::deployment(atlasmap, config)?;
        client.create_deployment(&deployment).await?;
        info!(name = %name, namespace = %namespace, "Created Deployment");
        return Ok(());
    };

    sync_replicas(client, atlasmap, &mut deployment).await?;

    // Phase is read from a fresh copy, which later steps keep working on
    deployment = client
        .get_deployment(&namespace, &name)
        .await?
        .ok_or_else(|| ClusterError::NotFound {
            kind: "Deployment",
            name: name.clone(),
        })?;
    update_phase(client, atlasmap, &deployment).await;

    reconcile_image(client, config, atlasmap, &mut deployment).await?;
    reconcile_resources(client, atlasmap, &mut deployment).await?;
    restamp(client, &namespace, &name, &mut deployment).await
}

fn stamped_version(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()?
        .get(annotations::LAST_RECONCILED_RESOURCE_VERSION)
        .map(String::as_str)
}

fn stamp(deployment: &mut Deployment, resource_version: String) {
    deployment
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            annotations::LAST_RECONCILED_RESOURCE_VERSION.to_string(),
            resource_version,
        );
}

fn replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(DEFAULT_REPLICAS)
}

fn ready_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

fn first_container_mut(deployment: &mut Deployment) -> Option<&mut Container> {
    deployment
        .spec
        .as_mut()?
        .template
        .spec
        .as_mut()?
        .containers
        .first_mut()
}

fn running_image(deployment: &Deployment) -> String {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default()
}

async fn sync_replicas(
    client: &dyn ClusterClient,
    atlasmap: &mut AtlasMap,
    deployment: &mut Deployment,
) -> Result<(), ActionError> {
    let current_version = atlasmap.resource_version_or_default();
    let live = replicas(deployment);
    let desired = atlasmap.spec.replicas;

    if live == desired {
        debug!(replicas = live, "Replicas in sync");
        return Ok(());
    }

    if stamped_version(deployment) == Some(current_version.as_str()) {
        info!(from = desired, to = live, "Adopting Deployment replicas into AtlasMap");
        atlasmap.spec.replicas = live;
        *atlasmap = client.update_atlasmap(atlasmap).await?;
    } else {
        info!(from = live, to = desired, "Scaling Deployment to AtlasMap replicas");
        stamp(deployment, current_version);
        if let Some(spec) = deployment.spec.as_mut() {
            spec.replicas = Some(desired);
        }
        *deployment = client.update_deployment(deployment).await?;
    }
    Ok(())
}

/// Write the phase when it changed; a failed status write is only logged
async fn update_phase(client: &dyn ClusterClient, atlasmap: &mut AtlasMap, deployment: &Deployment) {
    let phase = AtlasMapPhase::derive(replicas(deployment), ready_replicas(deployment));
    let current = atlasmap.status.as_ref().and_then(|s| s.phase);
    if current == Some(phase) {
        return;
    }

    info!(from = ?current, to = %phase, "AtlasMap phase change");
    status_mut(atlasmap).phase = Some(phase);
    if let Err(e) = write_status(client, atlasmap).await {
        warn!(error = %e, phase = %phase, "Failed to update AtlasMap phase");
    }
}

async fn reconcile_image(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    atlasmap: &mut AtlasMap,
    deployment: &mut Deployment,
) -> Result<(), ActionError> {
    let image = templates::desired_image(atlasmap, config);

    if let Some(container) = first_container_mut(deployment) {
        if container.image.as_deref() != Some(image.as_str()) {
            let probe_path = templates::probe_path(&atlasmap.spec.version)?;
            info!(from = ?container.image, to = %image, "Updating AtlasMap image");
            container.image = Some(image);
            templates::set_probe_path(container, probe_path);
            stamp(deployment, atlasmap.resource_version_or_default());
            *deployment = client.update_deployment(deployment).await?;
        }
    }

    let running = running_image(deployment);
    if atlasmap.status.as_ref().map(|s| s.image.as_str()) != Some(running.as_str()) {
        status_mut(atlasmap).image = running;
        write_status(client, atlasmap).await?;
    }
    Ok(())
}

async fn reconcile_resources(
    client: &dyn ClusterClient,
    atlasmap: &AtlasMap,
    deployment: &mut Deployment,
) -> Result<(), ActionError> {
    let Some(container) = first_container_mut(deployment) else {
        return Ok(());
    };
    if !resources_changed(container.resources.as_ref(), &atlasmap.spec)? {
        return Ok(());
    }

    container.resources = Some(desired_requirements(&atlasmap.spec)?);
    stamp(deployment, atlasmap.resource_version_or_default());
    *deployment = client.update_deployment(deployment).await?;
    info!("Updated AtlasMap resource requests and limits");
    Ok(())
}

/// Stamp the annotation with the AtlasMap's latest resource version
async fn restamp(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    deployment: &mut Deployment,
) -> Result<(), ActionError> {
    let latest = client
        .get_atlasmap(namespace, name)
        .await?
        .ok_or_else(|| ClusterError::NotFound {
            kind: "AtlasMap",
            name: name.to_string(),
        })?;
    let version = latest.resource_version_or_default();

    if stamped_version(deployment) != Some(version.as_str()) {
        debug!(resource_version = %version, "Re-stamping Deployment annotation");
        stamp(deployment, version);
        *deployment = client.update_deployment(deployment).await?;
    }
    Ok(())
}
