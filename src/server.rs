//! # Server Configuration
//!
//! This module contains the HTTP server setup for the GitHub Sync service:
//! the webhook endpoint, operational endpoints and OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::db;
use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::webhook::{self, WebhookReconciler};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub reconciler: Arc<WebhookReconciler>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/api/v1/webhook", post(webhook::handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server with the given state until the shutdown token fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// Service information
///
/// Returns the service name and version.
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "service"
)]
async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Overall status of the service
    pub status: String,
}

/// Liveness probe
///
/// Verifies the database connection with a trivial query.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "service"
)]
async fn healthz(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = ?err, "Liveness probe failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "database unreachable",
        )
    })?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(root, healthz, crate::webhook::handle_webhook),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::webhook::WebhookResponse,
            HealthResponse,
        )
    ),
    info(
        title = "GitHub Sync API",
        description = "Repository sync and webhook reconciliation for GitHub App installations",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
