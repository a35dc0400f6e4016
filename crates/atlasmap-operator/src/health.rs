//! Liveness and readiness endpoints for the operator pod
//!
//! `/healthz` answers as long as the process serves HTTP. `/readyz` reports
//! ready once the listener is bound and the API server answers a version
//! request.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::client::ClusterClient;

pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Readiness verdict, rendered as the `/readyz` response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// The probe listener is not bound yet
    Starting,
    ApiServerNotReady,
    ApiServerUnreachable,
}

impl IntoResponse for Readiness {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Ready => (StatusCode::OK, "ok"),
            Self::Starting => (StatusCode::SERVICE_UNAVAILABLE, "starting"),
            Self::ApiServerNotReady => (StatusCode::SERVICE_UNAVAILABLE, "api server not ready"),
            Self::ApiServerUnreachable => {
                (StatusCode::SERVICE_UNAVAILABLE, "api server unreachable")
            }
        };
        (status, body).into_response()
    }
}

/// State behind the probe endpoints
pub struct Probes {
    client: Arc<dyn ClusterClient>,
    listening: AtomicBool,
}

impl Probes {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            listening: AtomicBool::new(false),
        }
    }

    fn mark_listening(&self) {
        self.listening.store(true, Ordering::SeqCst);
    }

    pub async fn readiness(&self) -> Readiness {
        if !self.listening.load(Ordering::SeqCst) {
            return Readiness::Starting;
        }
        match self.client.check_readiness().await {
            Ok(true) => Readiness::Ready,
            Ok(false) => Readiness::ApiServerNotReady,
            Err(e) => {
                warn!(error = %e, "API server unreachable from readiness probe");
                Readiness::ApiServerUnreachable
            }
        }
    }
}

pub fn router(probes: Arc<Probes>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(probes)
}

async fn readyz(State(probes): State<Arc<Probes>>) -> Readiness {
    let readiness = probes.readiness().await;
    debug!(?readiness, "Readiness probe");
    readiness
}

/// Serve the probes on 127.0.0.1 until the server fails
pub async fn serve(probes: Arc<Probes>, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
    info!(port, "Health server listening");
    probes.mark_listening();
    axum::serve(listener, router(probes)).await
}
