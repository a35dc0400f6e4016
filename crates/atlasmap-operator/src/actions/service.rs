//! Service action: create-only, never reconciled after creation

use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::config::OperatorConfig;
use crate::crd::AtlasMap;
use crate::templates;

use super::{object_ref, ActionError};

pub(super) async fn handle(
    client: &dyn ClusterClient,
    config: &OperatorConfig,
    atlasmap: &mut AtlasMap,
) -> Result<(), ActionError> {
    let (namespace, name) = object_ref(atlasmap)?;

    if client.get_service(&namespace, &name).await?.is_some() {
        debug!("Service exists");
        return Ok(());
    }

    let service = templates::service(atlasmap, config)?;
    client.create_service(&service).await?;
    info!(name = %name, namespace = %namespace, "Created Service");
    Ok(())
}
