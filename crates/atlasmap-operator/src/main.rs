use std::future::pending;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use kube::Client;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use atlasmap_operator::actions::Pipeline;
use atlasmap_operator::capability;
use atlasmap_operator::client::KubeClusterClient;
use atlasmap_operator::config::OperatorConfig;
use atlasmap_operator::controllers::retry::RetryTracker;
use atlasmap_operator::controllers::{atlasmap, ControllerContext};
use atlasmap_operator::health::{self, Probes};
use atlasmap_operator::leader::{LeaderElection, LeaderElectionConfig, LeadershipLost};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(EnvFilter::from_default_env())
        .init();
}

/// Block until this replica leads, if leader election is configured
async fn lead(client: &Client) -> Result<Option<JoinHandle<LeadershipLost>>> {
    let Some(config) =
        LeaderElectionConfig::from_env().context("Invalid leader election configuration")?
    else {
        info!("Leader election disabled");
        return Ok(None);
    };

    info!(
        lease = %config.lease_name,
        namespace = %config.namespace,
        holder = %config.holder_id,
        "Leader election enabled"
    );
    let election = LeaderElection::new(client.clone(), &config);
    election.acquire().await;
    Ok(Some(election.spawn_renewal_task()))
}

/// Resolves when leadership ends; never resolves without leader election
async fn leadership_lost(
    renewal: Option<JoinHandle<LeadershipLost>>,
) -> Result<LeadershipLost, JoinError> {
    match renewal {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "atlasmap-operator starting");

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let config = Arc::new(OperatorConfig::from_env());
    info!(
        image = %config.image,
        default_version = %config.default_version,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        resync_secs = config.resync_interval.as_secs(),
        "Loaded configuration"
    );

    let renewal = lead(&client).await?;

    let capabilities = capability::detect(&client)
        .await
        .context("Failed to detect platform capabilities")?;
    let pipeline = Arc::new(Pipeline::new(capabilities, config.clone()));

    let cluster = Arc::new(KubeClusterClient::new(client.clone()));
    let ctx = Arc::new(ControllerContext {
        client: cluster.clone(),
        pipeline: pipeline.clone(),
        config: config.clone(),
        retry_tracker: Arc::new(RetryTracker::new()),
    });

    let health_server = tokio::spawn(health::serve(
        Arc::new(Probes::new(cluster)),
        config.health_port,
    ));

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    let controller = atlasmap::run(client, ctx);
    tokio::pin!(controller);

    let failure = tokio::select! {
        () = &mut controller => Some(anyhow!("AtlasMap controller stopped")),
        result = health_server => Some(health_failure(result)),
        result = leadership_lost(renewal) => Some(match result {
            Ok(lost) => anyhow!("Leadership lost: {lost}"),
            Err(e) => anyhow!("Lease renewal task failed: {e}"),
        }),
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            None
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
            None
        }
    };

    pipeline.cancel();
    if let Some(e) = failure {
        // A non-zero exit lets the Deployment restart the pod
        error!(error = %e, "Stopping operator");
        return Err(e);
    }

    // In-flight passes stop before their next action
    controller.await;
    info!("Shutdown complete");
    Ok(())
}

fn health_failure(result: Result<std::io::Result<()>, JoinError>) -> anyhow::Error {
    match result {
        Ok(Ok(())) => anyhow!("Health server stopped"),
        Ok(Err(e)) => anyhow::Error::new(e).context("Health server failed"),
        Err(e) if e.is_panic() => anyhow!("Health server panicked"),
        Err(e) => anyhow!("Health server task failed: {e}"),
    }
}
