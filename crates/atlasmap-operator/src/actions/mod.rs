//! Ordered reconcile actions for one AtlasMap
//!
//! A [`Pipeline`] is built once from the detected platform capabilities and
//! runs its actions in a fixed order: Service, Route or Ingress, ConsoleLink
//! (only where supported), Deployment. Each action is idempotent, so a pass
//! aborted half way is picked up by the next one without rollback.

mod console_link;
mod deployment;
mod ingress;
mod route;
mod service;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atlasmap_common::{QuantityError, ValidationError};
use kube::ResourceExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capability::PlatformCapabilities;
use crate::client::{ClusterClient, ClusterError};
use crate::config::OperatorConfig;
use crate::crd::{AtlasMap, AtlasMapStatus};

pub use console_link::remove_console_link;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("Invalid resource quantity: {0}")]
    InvalidQuantity(#[from] QuantityError),
    #[error("Invalid AtlasMap version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },
    #[error("Invalid route host name: {0}")]
    InvalidHostname(#[from] ValidationError),
    #[error("AtlasMap has no {0}")]
    MissingField(&'static str),
}

impl ActionError {
    /// Optimistic-concurrency conflict on any write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Cluster(e) if e.is_conflict())
    }
}

/// One step of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    Service,
    Route,
    Ingress,
    ConsoleLink,
    Deployment,
}

impl ResourceAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Route => "route",
            Self::Ingress => "ingress",
            Self::ConsoleLink => "console-link",
            Self::Deployment => "deployment",
        }
    }

    /// Bring this action's object in line with `atlasmap`.
    ///
    /// Writes to the AtlasMap replace `atlasmap` with the stored object, so
    /// later actions see its current resource version.
    pub async fn handle(
        &self,
        client: &dyn ClusterClient,
        config: &OperatorConfig,
        atlasmap: &mut AtlasMap,
    ) -> Result<(), ActionError> {
        match self {
            Self::Service => service::handle(client, config, atlasmap).await,
            Self::Route => route::handle(client, config, atlasmap).await,
            Self::Ingress => ingress::handle(client, config, atlasmap).await,
            Self::ConsoleLink => console_link::handle(client, config, atlasmap).await,
            Self::Deployment => deployment::handle(client, config, atlasmap).await,
        }
    }
}

/// How a pipeline pass ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every action ran
    Converged,
    /// An action hit a write conflict; the remaining actions were skipped
    RetryImmediately { action: &'static str },
    /// Shutdown was requested before `next` could start
    Cancelled { next: &'static str },
}

pub struct Pipeline {
    actions: Vec<ResourceAction>,
    config: Arc<OperatorConfig>,
    shutdown: AtomicBool,
}

impl Pipeline {
    pub fn new(capabilities: PlatformCapabilities, config: Arc<OperatorConfig>) -> Self {
        let mut actions = vec![ResourceAction::Service];
        if capabilities.restricted_routing {
            actions.push(ResourceAction::Route);
        } else {
            actions.push(ResourceAction::Ingress);
        }
        if capabilities.dashboard_links {
            actions.push(ResourceAction::ConsoleLink);
        }
        actions.push(ResourceAction::Deployment);

        Self {
            actions,
            config,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn actions(&self) -> &[ResourceAction] {
        &self.actions
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Whether external access goes through a Route rather than an Ingress
    pub fn uses_routes(&self) -> bool {
        self.actions.contains(&ResourceAction::Route)
    }

    pub fn manages_console_links(&self) -> bool {
        self.actions.contains(&ResourceAction::ConsoleLink)
    }

    /// Stop passes before their next action
    pub fn cancel(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run every action against `atlasmap`, stopping at the first error
    pub async fn run(
        &self,
        client: &dyn ClusterClient,
        atlasmap: &mut AtlasMap,
    ) -> Result<PipelineOutcome, ActionError> {
        for action in &self.actions {
            if self.is_cancelled() {
                info!(next = action.name(), "Shutdown requested, stopping pass");
                return Ok(PipelineOutcome::Cancelled {
                    next: action.name(),
                });
            }

            debug!(action = action.name(), "Running action");
            match action.handle(client, &self.config, atlasmap).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    info!(action = action.name(), error = %e, "Write conflict, retrying pass");
                    return Ok(PipelineOutcome::RetryImmediately {
                        action: action.name(),
                    });
                }
                Err(e) => {
                    warn!(action = action.name(), error = %e, "Action failed");
                    return Err(e);
                }
            }
        }
        Ok(PipelineOutcome::Converged)
    }
}

/// Namespace and name of a persisted AtlasMap
fn object_ref(atlasmap: &AtlasMap) -> Result<(String, String), ActionError> {
    let namespace = atlasmap
        .namespace()
        .ok_or(ActionError::MissingField("metadata.namespace"))?;
    Ok((namespace, atlasmap.name_any()))
}

fn status_mut(atlasmap: &mut AtlasMap) -> &mut AtlasMapStatus {
    atlasmap.status.get_or_insert_with(AtlasMapStatus::default)
}

/// Persist the status and adopt the stored object
async fn write_status(
    client: &dyn ClusterClient,
    atlasmap: &mut AtlasMap,
) -> Result<(), ClusterError> {
    *atlasmap = client.update_atlasmap_status(atlasmap).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::client::ClusterError;

    pub(crate) fn conflict(kind: &'static str) -> ClusterError {
        ClusterError::Conflict {
            kind,
            name: "demo".to_string(),
            message: "the object has been modified".to_string(),
        }
    }

    pub(crate) fn server_error(kind: &'static str) -> ClusterError {
        ClusterError::Kube {
            kind,
            name: "demo".to_string(),
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "etcdserver: request timed out".to_string(),
                reason: "InternalError".to_string(),
                code: 500,
            }),
        }
    }
}
