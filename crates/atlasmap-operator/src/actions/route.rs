//! Route action (OpenShift)
//!
//! Creates the Route when missing. On an existing Route only the host is
//! reconciled, and only when `spec.routeHostName` is set; an empty field
//! leaves a router-assigned or externally set host in place. `status.URL`
//! follows the Route's host.

use atlasmap_common::validate_hostname;
use tracing::{debug, info, warn};

use crate::client::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::AtlasMap;
use crate::templates;

use super::{object_ref, status_mut, write_status, ActionError};

pub(super) async fn handle(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    atlasmap: &mut AtlasMap,
) -> Result<(), ActionError> {
    let (namespace, name) = object_ref(atlasmap)?;
    let desired_host = atlasmap.spec.route_host_name.clone();
    if !desired_host.is_empty() {
        validate_hostname(&desired_host)?;
    }

    let Some(mut route) = client.get_route(&namespace, &name).await? else {
        let route = templates::route(atlasmap, config)?;
        match client.create_route(&route).await {
            Ok(_) => info!(name = %name, namespace = %namespace, "Created Route"),
            // Route admission can race with itself
            Err(e) if e.is_already_exists() => {
                warn!(name = %name, namespace = %namespace, "Route already exists, continuing")
            }
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    };

    if !desired_host.is_empty() && route.spec.host != desired_host {
        info!(from = %route.spec.host, to = %desired_host, "Updating Route host");
        route.spec.host = desired_host;
        route = client.update_route(&route).await?;
    }

    if route.spec.host.is_empty() {
        debug!("Route has no host yet");
        return Ok(());
    }

    let url = format!("https://{}", route.spec.host);
    if atlasmap.status.as_ref().map(|s| s.url.as_str()) != Some(url.as_str()) {
        info!(url = %url, "Updating AtlasMap URL");
        status_mut(atlasmap).url = url;
        write_status(client, atlasmap).await?;
    }
    Ok(())
}
