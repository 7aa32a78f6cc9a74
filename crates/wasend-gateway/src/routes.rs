//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use wasend_core::{ClientId, WasendError};
use wasend_scheduler::CampaignSpec;
use wasend_session::HostEvent;

use super::server::AppState;

fn error_body(e: &WasendError) -> Json<serde_json::Value> {
    let kind = match e {
        WasendError::Validation(_) => "validation",
        WasendError::ResourceExhausted(_) => "resource_exhausted",
        WasendError::SessionLost(_) => "session_lost",
        WasendError::NotFound(_) => "not_found",
        _ => "internal",
    };
    Json(serde_json::json!({"ok": false, "error": e.to_string(), "kind": kind}))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wasend-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "live_sessions": state.sessions.live_count().await,
    }))
}

/// Submit a campaign. Body mirrors the campaign-builder payload.
pub async fn submit_campaign(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<CampaignSpec>,
) -> Json<serde_json::Value> {
    match state.engine.submit(spec) {
        Ok(campaign_id) => Json(serde_json::json!({"ok": true, "campaign_id": campaign_id})),
        Err(e) => error_body(&e),
    }
}

/// Per-recipient status report for a campaign.
pub async fn campaign_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.engine.report(&id) {
        Ok(report) => Json(serde_json::json!({"ok": true, "report": report})),
        Err(e) => error_body(&e),
    }
}

/// Cancel not-yet-dispatched steps of a campaign.
pub async fn cancel_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    match state.engine.cancel(&id) {
        Ok(skipped) => Json(serde_json::json!({"ok": true, "skipped": skipped})),
        Err(e) => error_body(&e),
    }
}

/// Create (or resume) the tenant's messaging session.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<serde_json::Value> {
    let client_id = ClientId::new(client_id);
    match state.sessions.create(&client_id).await {
        Ok(status) => Json(serde_json::json!({"ok": true, "status": status})),
        Err(e) => error_body(&e),
    }
}

/// Current session status for a tenant.
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<serde_json::Value> {
    let client_id = ClientId::new(client_id);
    match state.sessions.session(&client_id).await {
        Some(info) => Json(serde_json::json!({"ok": true, "session": info})),
        None => Json(serde_json::json!({
            "ok": true,
            "session": {"client_id": client_id, "status": "UNINITIALIZED"},
        })),
    }
}

/// Tenant logout: tear the session down and forget its credentials.
pub async fn logout_session(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<serde_json::Value> {
    let client_id = ClientId::new(client_id);
    match state.sessions.close(&client_id).await {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => error_body(&e),
    }
}

/// Forced teardown from an external trigger (subscription expiry, admin
/// action); the reason is carried on the emitted closed event.
pub async fn force_close_session(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let client_id = ClientId::new(client_id);
    let reason = body["reason"].as_str().unwrap_or("FORCED");
    match state.sessions.force_close(&client_id, reason).await {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => error_body(&e),
    }
}

/// Pending queue snapshot for one tenant (debug/support surface).
pub async fn session_queue(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
) -> Json<serde_json::Value> {
    let client_id = ClientId::new(client_id);
    match state.engine.pending_for(&client_id) {
        Ok(pending) => Json(serde_json::json!({"ok": true, "pending": pending})),
        Err(e) => error_body(&e),
    }
}

/// Webhook from the automation host reporting auth/lifecycle progress.
pub async fn host_event(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    Json(event): Json<HostEvent>,
) -> Json<serde_json::Value> {
    let client_id = ClientId::new(client_id);
    match state.sessions.apply_host_event(&client_id, event).await {
        Ok(()) => Json(serde_json::json!({"ok": true})),
        Err(e) => error_body(&e),
    }
}

/// Close every session and release all host-pool slots.
pub async fn force_reclaim(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let reclaimed = state.sessions.force_reclaim().await;
    Json(serde_json::json!({"ok": true, "reclaimed": reclaimed}))
}
