//! HTTP API: sidecar container control, health checks and self metrics

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use collector_lib::{
    error::CollectorError,
    health::{CollectorHealth, Status},
    registry::ContainerRegistry,
    RegisterRequest, RegisteredContainer,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health: CollectorHealth,
    pub registry: Option<Arc<ContainerRegistry>>,
}

impl AppState {
    pub fn new(health: CollectorHealth, registry: Option<Arc<ContainerRegistry>>) -> Self {
        Self { health, registry }
    }

    fn registry(&self) -> Result<&ContainerRegistry, ApiError> {
        self.registry
            .as_deref()
            .ok_or_else(|| ApiError::NotFound("container registry is disabled".to_string()))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        match err {
            CollectorError::Conflict { .. } => ApiError::Conflict(err.to_string()),
            CollectorError::InvalidRequest(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Liveness of the control API itself
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn list_containers(State(state): State<Arc<AppState>>) -> Result<Json<Vec<RegisteredContainer>>, ApiError> {
    Ok(Json(state.registry()?.list()))
}

/// Register a container; an existing registration is returned as is
async fn add_container(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisteredContainer>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let container = state.registry()?.add(request).await.map_err(|e| {
        warn!(error = %e, "Container registration rejected");
        ApiError::from(e)
    })?;
    Ok(Json(container))
}

async fn get_container(
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
) -> Result<Json<RegisteredContainer>, ApiError> {
    state
        .registry()?
        .get(&container_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("container {} is not registered", container_id)))
}

/// Removing an unknown container is not an error
async fn remove_container(
    State(state): State<Arc<AppState>>,
    Path(container_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry()?.remove(&container_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Collector checks; 503 only when the last cycle lost every target
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.health.report().await;

    let status_code = match report.status {
        Status::Healthy | Status::Degraded => StatusCode::OK,
        Status::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(report))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/containers", get(list_containers))
        .route("/container", axum::routing::post(add_container))
        .route("/container/:id", get(get_container).delete(remove_container))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_errors_map_to_statuses() {
        let conflict: ApiError = CollectorError::Conflict {
            port: 8125,
            owner: "abc".to_string(),
        }
        .into();
        assert!(matches!(conflict, ApiError::Conflict(_)));

        let invalid: ApiError = CollectorError::InvalidRequest("empty container id".to_string()).into();
        assert!(matches!(invalid, ApiError::BadRequest(_)));

        let io: ApiError = CollectorError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")).into();
        assert!(matches!(io, ApiError::Internal(_)));
    }
}
