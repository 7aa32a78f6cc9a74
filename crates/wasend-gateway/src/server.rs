//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wasend_core::config::GatewayConfig;
use wasend_scheduler::ScheduleEngine;
use wasend_session::SessionManager;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub engine: Arc<ScheduleEngine>,
    pub sessions: Arc<SessionManager>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    Router::new()
        .route("/api/v1/health", get(super::routes::health_check))
        // Campaigns
        .route("/api/v1/campaigns", post(super::routes::submit_campaign))
        .route("/api/v1/campaigns/{id}", get(super::routes::campaign_report))
        .route("/api/v1/campaigns/{id}/cancel", post(super::routes::cancel_campaign))
        // Session lifecycle
        .route("/api/v1/sessions/{client_id}", post(super::routes::create_session))
        .route("/api/v1/sessions/{client_id}", get(super::routes::session_status))
        .route("/api/v1/sessions/{client_id}", delete(super::routes::logout_session))
        .route(
            "/api/v1/sessions/{client_id}/force-close",
            post(super::routes::force_close_session),
        )
        .route("/api/v1/sessions/{client_id}/queue", get(super::routes::session_queue))
        // Automation-host webhook — drives the session state machine
        .route("/api/v1/sessions/{client_id}/events", post(super::routes::host_event))
        // Admin
        .route("/api/v1/admin/reclaim", post(super::routes::force_reclaim))
        // Session event stream for the UI
        .route("/ws", get(super::ws::ws_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve until the process exits.
pub async fn start_server(state: AppState) -> wasend_core::Result<()> {
    let addr = format!("{}:{}", state.gateway_config.host, state.gateway_config.port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| wasend_core::WasendError::Config(format!("Gateway bind {addr}: {e}")))?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, router)
        .await
        .map_err(|e| wasend_core::WasendError::Config(format!("Gateway server: {e}")))?;
    Ok(())
}
