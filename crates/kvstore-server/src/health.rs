//! HTTP liveness and readiness endpoints.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use kvstore_core::KvService;

use crate::error::Error;

/// Body returned by both health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

/// Health check routes.
pub fn routes(service: KvService) -> Router {
    Router::new()
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .with_state(service)
}

async fn liveness() -> Json<HealthResponse> {
    Json(HealthResponse::new("alive"))
}

/// Ready until the service begins shutting down.
async fn readiness(State(service): State<KvService>) -> (StatusCode, Json<HealthResponse>) {
    if service.registry().is_shutdown() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse::new("shutting_down")),
        )
    } else {
        (StatusCode::OK, Json(HealthResponse::new("ready")))
    }
}

/// Serve the health endpoints on `listener` until `shutdown` fires.
pub async fn serve_health(
    listener: TcpListener,
    service: KvService,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(address = %addr, "health endpoints listening");
    }

    axum::serve(listener, routes(service))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("health endpoints stopped");
    Ok(())
}
