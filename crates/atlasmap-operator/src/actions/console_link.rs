//! ConsoleLink action (OpenShift 4.3 and later)
//!
//! The link is cluster-scoped, so it cannot be owned by the AtlasMap and is
//! deleted explicitly once the AtlasMap is being deleted.

use tracing::{debug, info};

use crate::client::{ClusterClient, ClusterError};
use crate::config::OperatorConfig;
use crate::crd::AtlasMap;
use crate::naming;
use crate::templates;

use super::{object_ref, ActionError};

/// Delete the ConsoleLink of AtlasMap `name` in `namespace`.
///
/// Returns whether a link was deleted; a missing link is not an error.
pub async fn remove_console_link(
    client: &dyn ClusterClient,
    name: &str,
    namespace: &str,
) -> Result<bool, ClusterError> {
    let link_name = naming::console_link_name(name, namespace);
    match client.delete_console_link(&link_name).await {
        Ok(()) => {
            info!(link = %link_name, "Deleted ConsoleLink");
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            debug!(link = %link_name, "ConsoleLink already gone");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

pub(super) async fn handle(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    atlasmap: &mut AtlasMap,
) -> Result<(), ActionError> {
    let (namespace, name) = object_ref(atlasmap)?;

    if atlasmap.is_deleting() {
        remove_console_link(client, &name, &namespace).await?;
        return Ok(());
    }

    let host = client
        .get_route(&namespace, &name)
        .await?
        .map(|route| route.spec.host)
        .filter(|host| !host.is_empty());
    let Some(host) = host else {
        debug!("Route has no host yet, skipping ConsoleLink");
        return Ok(());
    };

    let link_name = naming::console_link_name(&name, &namespace);
    let href = format!("https://{host}");
    let text = naming::console_link_text(&name);

    match client.get_console_link(&link_name).await? {
        None => {
            let link = templates::console_link(atlasmap, config, &link_name, &href);
            client.create_console_link(&link).await?;
            info!(link = %link_name, href = %href, "Created ConsoleLink");
        }
        Some(mut link) if link.spec.href != href || link.spec.text != text => {
            link.spec.href = href;
            link.spec.text = text;
            client.update_console_link(&link).await?;
            info!(link = %link_name, "Updated ConsoleLink");
        }
        Some(_) => debug!(link = %link_name, "ConsoleLink unchanged"),
    }
    Ok(())
}
