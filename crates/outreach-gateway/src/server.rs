//! HTTP server implementation using Axum.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use outreach_core::config::{GatewayConfig, OutreachConfig};
use outreach_core::error::{OutreachError, Result};
use outreach_scheduler::DispatchEngine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server. Handlers are stateless; everything
/// durable lives behind the engine's store.
#[derive(Clone)]
pub struct AppState {
    pub engine: DispatchEngine,
    pub gateway_config: GatewayConfig,
    /// Deadline for one store round trip.
    pub op_timeout: Duration,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: DispatchEngine, config: &OutreachConfig) -> Self {
        Self {
            engine,
            gateway_config: config.gateway.clone(),
            op_timeout: Duration::from_millis(config.store.op_timeout_ms),
            start_time: Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_origin(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(super::routes::health_check))
        // Worker polling contract
        .route("/jobs", get(super::routes::poll_jobs))
        .route("/jobs/{id}/report", post(super::routes::report_job))
        // Campaigns
        .route("/campaigns", post(super::routes::create_campaign))
        .route("/campaigns/{id}", get(super::routes::get_campaign))
        .route("/campaigns/{id}/process", post(super::routes::process_campaign))
        .route("/campaigns/{id}/start", post(super::routes::start_campaign))
        .route("/campaigns/{id}/schedule", post(super::routes::schedule_campaign))
        .route("/campaigns/{id}/pause", post(super::routes::pause_campaign))
        .route("/campaigns/{id}/resume", post(super::routes::resume_campaign))
        .route("/campaigns/{id}/cancel", post(super::routes::cancel_campaign))
        .route("/campaigns/{id}/stats", get(super::routes::campaign_stats))
        .route("/recipients/{id}/reply", post(super::routes::record_reply))
        // Collaborator boundary
        .route("/accounts", post(super::routes::register_account))
        .route("/accounts/{id}/disconnect", post(super::routes::disconnect_account))
        .route("/leads", post(super::routes::upsert_lead))
        .route("/sweep", post(super::routes::sweep))
        .layer(cors)
        .layer(DefaultBodyLimit::max(1_048_576))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.gateway_config.host, state.gateway_config.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| OutreachError::Gateway(format!("Bind error on {addr}: {e}")))?;

    tracing::info!("🌐 Dispatch gateway listening on http://{addr}");

    axum::serve(listener, app)
        .await
        .map_err(|e| OutreachError::Gateway(format!("Server error: {e}")))?;
    Ok(())
}
