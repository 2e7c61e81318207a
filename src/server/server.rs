use std::error::Error;
use std::sync::Arc;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use super::routes;
use crate::config::TiersConfig;
use crate::fleet::FleetManager;
use crate::orchestrator::Orchestrator;
use crate::registry::ModelRegistry;

/// Shared state handed to every route handler.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ModelRegistry>,
    pub fleet: Arc<FleetManager>,
    pub tiers: TiersConfig,
}

/// HTTP surface of the orchestrator: query submission plus the metadata
/// endpoints (registry listing, fleet state, discovery scan, enable
/// toggle).
pub struct ApiServer {
    state: Arc<AppState>,
    host: String,
    port: u16,
}

impl ApiServer {
    pub fn new(state: AppState, host: String, port: u16) -> Self {
        info!("Creating new API server on {}:{}", host, port);
        Self {
            state: Arc::new(state),
            host,
            port,
        }
    }

    pub async fn start(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let app = Router::new()
            .route("/api/v1/health", get(routes::health))
            .route("/api/v1/query", post(routes::submit_query))
            .route("/api/v1/models", get(routes::list_models))
            .route("/api/v1/models/{id}/enabled", post(routes::set_model_enabled))
            .route("/api/v1/models/{id}/tier", post(routes::set_model_tier))
            .route("/api/v1/models/{id}/runtime", post(routes::set_model_runtime))
            .route("/api/v1/fleet", get(routes::fleet_status))
            .route("/api/v1/fleet/start", post(routes::start_fleet))
            .route("/api/v1/scan", post(routes::scan_models))
            .with_state(Arc::clone(&self.state));

        info!("Starting server on {}:{}", self.host, self.port);
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;

        info!("Server started successfully");
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received");
            })
            .await?;
        Ok(())
    }
}
