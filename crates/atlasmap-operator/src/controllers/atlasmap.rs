//! AtlasMap controller
//!
//! Watches AtlasMap resources and the children they own, and runs the
//! action pipeline for each one.
//!
//! ## Deletion
//!
//! Namespaced children carry an owner reference and are garbage-collected by
//! the API server. The ConsoleLink is cluster-scoped and cannot be owned, so
//! while the pipeline manages ConsoleLinks every AtlasMap carries the
//! `atlasmap.io/console-link-cleanup` finalizer. When the deletion marker
//! appears the link is deleted and the finalizer released.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::actions::{remove_console_link, ActionError, Pipeline, PipelineOutcome};
use crate::client::{ClusterClient, ClusterError};
use crate::config::finalizers::CONSOLE_LINK_CLEANUP;
use crate::crd::AtlasMap;
use crate::openshift::Route;

use super::retry::{ErrorKind, RetryPolicy};
use super::ControllerContext;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("AtlasMap has no namespace")]
    MissingNamespace,
}

impl ReconcileError {
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Action(e) => e.is_conflict(),
            Self::Cluster(e) => e.is_conflict(),
            Self::MissingNamespace => false,
        }
    }
}

/// Result of one pass over a single AtlasMap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The AtlasMap no longer exists
    Gone,
    /// The AtlasMap is being deleted and its cleanup is done
    Finalized,
    /// The pipeline ran
    Pipeline(PipelineOutcome),
}

fn has_finalizer(atlasmap: &AtlasMap) -> bool {
    atlasmap.finalizers().iter().any(|f| f == CONSOLE_LINK_CLEANUP)
}

/// Fetch the AtlasMap and drive it one pass towards its desired state
pub async fn reconcile_app(
    client: &dyn ClusterClient,
    pipeline: &Pipeline,
    namespace: &str,
    name: &str,
) -> Result<ReconcileOutcome, ReconcileError> {
    let Some(mut atlasmap) = client.get_atlasmap(namespace, name).await? else {
        if pipeline.manages_console_links() {
            if let Err(e) = remove_console_link(client, name, namespace).await {
                warn!(error = %e, "Failed to delete ConsoleLink of removed AtlasMap");
            }
        }
        debug!("AtlasMap no longer exists");
        return Ok(ReconcileOutcome::Gone);
    };

    if atlasmap.is_deleting() {
        if pipeline.manages_console_links() {
            remove_console_link(client, name, namespace).await?;
        }
        if has_finalizer(&atlasmap) {
            atlasmap.finalizers_mut().retain(|f| f != CONSOLE_LINK_CLEANUP);
            client.update_atlasmap(&atlasmap).await?;
            info!("Released ConsoleLink cleanup finalizer");
        }
        return Ok(ReconcileOutcome::Finalized);
    }

    if pipeline.manages_console_links() && !has_finalizer(&atlasmap) {
        atlasmap.finalizers_mut().push(CONSOLE_LINK_CLEANUP.to_string());
        atlasmap = client.update_atlasmap(&atlasmap).await?;
        debug!("Added ConsoleLink cleanup finalizer");
    }

    let outcome = pipeline.run(client, &mut atlasmap).await?;
    Ok(ReconcileOutcome::Pipeline(outcome))
}

/// Key for the retry tracker
fn retry_key(atlasmap: &AtlasMap) -> String {
    atlasmap.uid().unwrap_or_else(|| {
        format!(
            "{}/{}",
            atlasmap.namespace().unwrap_or_default(),
            atlasmap.name_any()
        )
    })
}

/// Reconcile a single AtlasMap
#[instrument(skip(atlasmap, ctx), fields(
    namespace = %atlasmap.namespace().unwrap_or_default(),
    name = %atlasmap.name_any(),
))]
pub async fn reconcile(
    atlasmap: Arc<AtlasMap>,
    ctx: Arc<ControllerContext>,
) -> Result<Action, ReconcileError> {
    let namespace = atlasmap
        .namespace()
        .ok_or(ReconcileError::MissingNamespace)?;
    let name = atlasmap.name_any();

    let outcome = match reconcile_app(ctx.client.as_ref(), &ctx.pipeline, &namespace, &name).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_conflict() => {
            debug!(error = %e, "Write conflict, requeueing immediately");
            return Ok(Action::requeue(Duration::ZERO));
        }
        Err(e) => return Err(e),
    };

    match outcome {
        ReconcileOutcome::Pipeline(PipelineOutcome::RetryImmediately { .. }) => {
            Ok(Action::requeue(Duration::ZERO))
        }
        ReconcileOutcome::Pipeline(PipelineOutcome::Cancelled { .. }) => Ok(Action::await_change()),
        ReconcileOutcome::Pipeline(PipelineOutcome::Converged) => {
            ctx.retry_tracker.clear(&retry_key(&atlasmap));
            Ok(Action::requeue(ctx.config.resync_interval))
        }
        ReconcileOutcome::Gone | ReconcileOutcome::Finalized => {
            ctx.retry_tracker.clear(&retry_key(&atlasmap));
            Ok(Action::await_change())
        }
    }
}

/// Classify error type for retry behavior
fn classify_error(error: &ReconcileError) -> ErrorKind {
    match error {
        ReconcileError::Action(ActionError::Cluster(e)) | ReconcileError::Cluster(e) => match e {
            // Objects built without name or namespace never become valid
            ClusterError::MissingMetadata { .. } | ClusterError::Serialize { .. } => {
                ErrorKind::Permanent
            }
            _ => ErrorKind::Transient,
        },
        ReconcileError::Action(ActionError::InvalidQuantity(_)) => ErrorKind::Permanent,
        ReconcileError::Action(ActionError::InvalidVersion { .. }) => ErrorKind::Permanent,
        ReconcileError::Action(ActionError::InvalidHostname(_)) => ErrorKind::Permanent,
        ReconcileError::Action(ActionError::MissingField(_)) => ErrorKind::Permanent,
        ReconcileError::MissingNamespace => ErrorKind::Permanent,
    }
}

/// Error policy for the controller with exponential backoff
fn error_policy(
    atlasmap: Arc<AtlasMap>,
    error: &ReconcileError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let kind = classify_error(error);
    let attempt = ctx.retry_tracker.record_failure(&retry_key(&atlasmap));

    warn!(
        name = %atlasmap.name_any(),
        namespace = %atlasmap.namespace().unwrap_or_default(),
        error = %error,
        attempt = attempt,
        error_kind = ?kind,
        "Reconciliation error"
    );

    RetryPolicy::default().action(attempt, kind)
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Run the AtlasMap controller
pub async fn run(client: Client, ctx: Arc<ControllerContext>) {
    let namespace = ctx.config.watch_namespace.clone();
    let namespace = namespace.as_deref();
    let atlasmaps: Api<AtlasMap> = scoped_api(&client, namespace);

    info!(
        namespace = namespace.unwrap_or("*"),
        routes = ctx.pipeline.uses_routes(),
        console_links = ctx.pipeline.manages_console_links(),
        "Starting AtlasMap controller"
    );

    let controller = Controller::new(atlasmaps, WatcherConfig::default())
        .owns(
            scoped_api::<Deployment>(&client, namespace),
            WatcherConfig::default(),
        )
        .owns(
            scoped_api::<Service>(&client, namespace),
            WatcherConfig::default(),
        );
    let controller = if ctx.pipeline.uses_routes() {
        controller.owns(scoped_api::<Route>(&client, namespace), WatcherConfig::default())
    } else {
        controller.owns(scoped_api::<Ingress>(&client, namespace), WatcherConfig::default())
    };

    controller
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(object = %object.name, "Reconciled AtlasMap"),
                Err(e) => error!(error = ?e, "AtlasMap controller stream error"),
            }
        })
        .await;
}
