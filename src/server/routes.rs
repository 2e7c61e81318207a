use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use super::server::AppState;
use super::types::{ApiResponse, FleetStartResponse, ScanResponse, SetEnabledRequest, SetTierRequest};
use crate::fleet::ServerHandle;
use crate::orchestrator::{OrchestrationError, QueryRequest, QueryResponse};
use crate::registry::{ModelEntry, RuntimeSettings};

/// Liveness check.
pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::success("triad is running"))
}

/// Runs one query through the orchestrator.
pub async fn submit_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> impl IntoResponse {
    info!(
        "Query endpoint called: mode {}, {} chars, context {}",
        request.mode,
        request.text.chars().count(),
        request.use_context
    );

    match state.orchestrator.execute(request).await {
        Ok(response) => (StatusCode::OK, Json(ApiResponse::success(response))),
        Err(e) => {
            error!("Query failed: {}", e);
            let status = match &e {
                OrchestrationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                OrchestrationError::UnsupportedMode(_) => StatusCode::NOT_IMPLEMENTED,
                OrchestrationError::NoServerForTier(_) => StatusCode::SERVICE_UNAVAILABLE,
                OrchestrationError::StageFailed { .. } => StatusCode::BAD_GATEWAY,
            };
            (status, Json(ApiResponse::<QueryResponse>::error(e.to_string())))
        }
    }
}

/// Lists every model in the registry.
pub async fn list_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.registry.list() {
        Ok(models) => (StatusCode::OK, Json(ApiResponse::success(models))),
        Err(e) => {
            error!("Failed to read model registry: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<Vec<ModelEntry>>::error(e.to_string())),
            )
        }
    }
}

/// Reports every server handle's lifecycle state.
pub async fn fleet_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let handles: Vec<ServerHandle> = state.fleet.status();
    Json(ApiResponse::success(handles))
}

/// Starts servers for enabled models that are not already running. Also
/// the explicit-restart path for handles sitting in the error state.
pub async fn start_fleet(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summary = state.fleet.start_fleet().await;
    Json(ApiResponse::success(FleetStartResponse {
        started: summary.started,
        failed: summary.failed,
        skipped: summary.skipped,
    }))
}

/// Re-runs the discovery scan over the models directory.
pub async fn scan_models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.registry.scan_models(&state.tiers) {
        Ok(summary) => (
            StatusCode::OK,
            Json(ApiResponse::success(ScanResponse {
                new_models: summary.new_models,
                removed_models: summary.removed_models,
                failed_models: summary.failed_models,
            })),
        ),
        Err(e) => {
            error!("Discovery scan failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<ScanResponse>::error(e.to_string())),
            )
        }
    }
}

/// Enables or disables one model. Disabling does not stop a running
/// server; the change takes effect at the next fleet start.
pub async fn set_model_enabled(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
    Json(request): Json<SetEnabledRequest>,
) -> impl IntoResponse {
    info!(
        "Setting model {} to {}",
        model_id,
        if request.enabled { "enabled" } else { "disabled" }
    );

    match state.registry.set_enabled(&model_id, request.enabled) {
        Ok(entry) => (StatusCode::OK, Json(ApiResponse::success(entry))),
        Err(e) => {
            error!("Failed to toggle model {}: {}", model_id, e);
            (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<ModelEntry>::error(e.to_string())),
            )
        }
    }
}

/// Overrides one model's tier assignment. A running server keeps its old
/// tier until the fleet is restarted.
pub async fn set_model_tier(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
    Json(request): Json<SetTierRequest>,
) -> impl IntoResponse {
    info!("Moving model {} to tier {}", model_id, request.tier);

    match state.registry.set_tier(&model_id, request.tier) {
        Ok(entry) => (StatusCode::OK, Json(ApiResponse::success(entry))),
        Err(e) => {
            error!("Failed to move model {}: {}", model_id, e);
            (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<ModelEntry>::error(e.to_string())),
            )
        }
    }
}

/// Replaces one model's subprocess settings. Takes effect at the next
/// server start for that model.
pub async fn set_model_runtime(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
    Json(runtime): Json<RuntimeSettings>,
) -> impl IntoResponse {
    info!("Updating runtime settings for model {}", model_id);

    match state.registry.update_runtime(&model_id, runtime) {
        Ok(entry) => (StatusCode::OK, Json(ApiResponse::success(entry))),
        Err(e) => {
            error!("Failed to update settings for {}: {}", model_id, e);
            (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::<ModelEntry>::error(e.to_string())),
            )
        }
    }
}
