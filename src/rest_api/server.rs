//! Axum HTTP server: router wiring for the spec §6 REST API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{delete, get, patch, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::identity::JwksValidator;
use crate::ingest::IngestPipeline;
use crate::lifecycle::LifecycleService;
use crate::store::Repositories;
use crate::Result;

use super::handlers;

/// Shared state handed to every handler; cheap to clone (each field is an
/// `Arc` or is itself `Clone` over `Arc`-wrapped internals).
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub ingest: Arc<IngestPipeline>,
    pub lifecycle: Arc<LifecycleService>,
    pub jwks_validator: Option<Arc<JwksValidator>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/api/v1/scans", post(handlers::create_scan).get(handlers::list_scans))
        .route("/api/v1/scans/:id", get(handlers::get_scan))
        .route("/api/v1/scans/:id/sbom", get(handlers::get_scan_sbom))
        .route("/api/v1/scans/:id/diff", get(handlers::get_scan_diff))
        .route(
            "/api/v1/vulnerabilities",
            get(handlers::list_vulnerabilities),
        )
        .route(
            "/api/v1/vulnerabilities/bulk",
            patch(handlers::bulk_patch_vulnerabilities),
        )
        .route(
            "/api/v1/vulnerabilities/:id",
            get(handlers::get_vulnerability_by_cve).patch(handlers::patch_vulnerability),
        )
        .route(
            "/api/v1/vulnerabilities/:id/history",
            get(handlers::get_vulnerability_history),
        )
        .route("/api/v1/images", get(handlers::list_images))
        .route(
            "/api/v1/images/:id/history",
            get(handlers::image_scan_history),
        )
        .route("/api/v1/metrics", get(handlers::dashboard_metrics))
        .route(
            "/api/v1/webhook-configs/:namespace/:name",
            put(handlers::put_webhook_config)
                .get(handlers::get_webhook_config)
                .delete(handlers::delete_webhook_config),
        )
        .merge(prometheus_route())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(feature = "metrics")]
fn prometheus_route() -> Router<AppState> {
    Router::new().route("/metrics", get(handlers::prometheus_metrics))
}

#[cfg(not(feature = "metrics"))]
fn prometheus_route() -> Router<AppState> {
    Router::new()
}

pub async fn run_server(state: AppState, port: u16) -> Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "REST API server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::Error::ConfigError(format!("failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::Error::ConfigError(format!("server error: {e}")))?;

    Ok(())
}
