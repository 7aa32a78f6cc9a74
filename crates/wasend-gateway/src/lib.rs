//! # Wasend Gateway
//!
//! HTTP/WebSocket surface: campaign submission and status, session
//! lifecycle control, the automation-host webhook, and the session event
//! stream the UI consumes.

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{AppState, build_router, start_server};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wasend_core::config::{GatewayConfig, SchedulerConfig};
    use wasend_core::{ClientId, OutboundMessage, Result};
    use wasend_scheduler::ScheduleEngine;
    use wasend_session::{MessengerHost, SessionManager};
    use wasend_store::{CampaignLedger, PendingRequestQueue, SessionStore, StoreDb};

    struct NullHost;

    #[async_trait::async_trait]
    impl MessengerHost for NullHost {
        async fn start(&self, _client_id: &ClientId) -> Result<()> {
            Ok(())
        }
        async fn send(&self, _client_id: &ClientId, _message: &OutboundMessage) -> Result<String> {
            Ok("msg-1".into())
        }
        async fn stop(&self, _client_id: &ClientId) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn router_builds_with_all_routes() {
        let db = Arc::new(StoreDb::open_in_memory().unwrap());
        let sessions = Arc::new(SessionManager::new(
            Arc::new(NullHost),
            SessionStore::new(db.clone()),
            4,
        ));
        let engine = Arc::new(ScheduleEngine::new(
            PendingRequestQueue::new(db.clone()),
            CampaignLedger::new(db),
            sessions.clone(),
            SchedulerConfig::default(),
        ));
        let state = AppState {
            gateway_config: GatewayConfig::default(),
            engine,
            sessions,
            start_time: std::time::Instant::now(),
        };
        let _router = build_router(state);
    }
}
