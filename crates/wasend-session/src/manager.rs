//! Session lifecycle management. One state machine per tenant:
//! `Uninitialized → AwaitingAuth → Ready → Closed`, driven by host events.
//!
//! The registry is an explicit map keyed by `client_id` — many tenants
//! multiplex inside one process and never collide. Closed is terminal for
//! a session, but `create` afterward starts a fresh machine for the same
//! tenant.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use wasend_core::{
    ClientId, OutboundMessage, Result, SessionEvent, SessionEventKind, SessionStatus, WasendError,
};
use wasend_store::SessionStore;

use crate::host::{HostEvent, MessengerHost};

/// KV key marking tenants whose host has linked credentials; used for
/// boot-time session replay.
const AUTH_MARKER_KEY: &str = "wa.linked";

struct SessionEntry {
    status: SessionStatus,
    created_at: DateTime<Utc>,
    /// Serializes sends for this tenant. Different tenants send in
    /// parallel; one identity must never send concurrently.
    send_lock: Arc<Mutex<()>>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            created_at: Utc::now(),
            send_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// Read-only session snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionInfo {
    pub client_id: ClientId,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

/// Owns every tenant session in the process. Sole writer of session
/// status; collaborators observe through [`SessionManager::status`] and
/// the event stream.
pub struct SessionManager {
    sessions: Mutex<HashMap<ClientId, SessionEntry>>,
    host: Arc<dyn MessengerHost>,
    store: SessionStore,
    events: broadcast::Sender<SessionEvent>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(host: Arc<dyn MessengerHost>, store: SessionStore, max_sessions: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self { sessions: Mutex::new(HashMap::new()), host, store, events, max_sessions }
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create (or resume creating) the tenant's session.
    ///
    /// Idempotent while a session is live: a second call returns the
    /// current status without touching the host. Fails with
    /// `ResourceExhausted` when the live-session cap is reached — callers
    /// retry with backoff; queued work waits in the PendingRequestQueue.
    pub async fn create(&self, client_id: &ClientId) -> Result<SessionStatus> {
        {
            let mut sessions = self.sessions.lock().await;
            if let Some(entry) = sessions.get(client_id)
                && entry.status != SessionStatus::Closed
            {
                return Ok(entry.status);
            }
            let live = sessions
                .values()
                .filter(|e| e.status != SessionStatus::Closed)
                .count();
            if live >= self.max_sessions {
                return Err(WasendError::ResourceExhausted(format!(
                    "session pool full ({live}/{})",
                    self.max_sessions
                )));
            }
            sessions.insert(client_id.clone(), SessionEntry::new());
        }

        self.emit(SessionEvent::new(client_id.clone(), SessionEventKind::Initialize));
        tracing::info!("🟡 Creating session for {client_id}");

        if let Err(e) = self.host.start(client_id).await {
            tracing::warn!("⚠️ Host failed to start session for {client_id}: {e}");
            self.sessions.lock().await.remove(client_id);
            return Err(e);
        }

        {
            let mut sessions = self.sessions.lock().await;
            if let Some(entry) = sessions.get_mut(client_id)
                && entry.status == SessionStatus::Uninitialized
            {
                entry.status = SessionStatus::AwaitingAuth;
            }
        }
        self.emit(SessionEvent::new(client_id.clone(), SessionEventKind::Initialized));
        Ok(SessionStatus::AwaitingAuth)
    }

    /// Advance the tenant's state machine with an event reported by the
    /// automation host (webhook-driven).
    pub async fn apply_host_event(&self, client_id: &ClientId, event: HostEvent) -> Result<()> {
        match event {
            HostEvent::QrGenerated { qr } => {
                tracing::debug!("🔲 QR generated for {client_id}");
                self.emit(
                    SessionEvent::new(client_id.clone(), SessionEventKind::QrGenerated)
                        .with_qr(qr),
                );
                Ok(())
            }
            HostEvent::Authenticated => {
                self.emit(SessionEvent::new(client_id.clone(), SessionEventKind::Authenticated));
                Ok(())
            }
            HostEvent::Ready => {
                {
                    let mut sessions = self.sessions.lock().await;
                    match sessions.get_mut(client_id) {
                        Some(entry) if entry.status != SessionStatus::Closed => {
                            entry.status = SessionStatus::Ready;
                        }
                        // Ready for a session we no longer track (e.g. closed
                        // while authenticating) — ignore, the close wins.
                        _ => return Ok(()),
                    }
                }
                // Remember that this tenant has linked credentials so a
                // process restart re-creates the session.
                self.store.set_string(client_id, AUTH_MARKER_KEY, "1")?;
                tracing::info!("🟢 Session ready for {client_id}");
                self.emit(SessionEvent::new(client_id.clone(), SessionEventKind::Ready));
                Ok(())
            }
            HostEvent::Closed { reason } => {
                let reason = reason.unwrap_or_else(|| "SESSION_LOST".to_string());
                // Host died or logged out on its own; nothing to stop.
                self.mark_closed(client_id, &reason, false).await;
                Ok(())
            }
        }
    }

    /// Current status. Tenants without a session are `Uninitialized`.
    pub async fn status(&self, client_id: &ClientId) -> SessionStatus {
        self.sessions
            .lock()
            .await
            .get(client_id)
            .map(|e| e.status)
            .unwrap_or(SessionStatus::Uninitialized)
    }

    pub async fn session(&self, client_id: &ClientId) -> Option<SessionInfo> {
        self.sessions.lock().await.get(client_id).map(|e| SessionInfo {
            client_id: client_id.clone(),
            status: e.status,
            created_at: e.created_at,
        })
    }

    /// Send one message through the tenant's READY session, serialized
    /// per tenant. A `SessionLost` from the host closes the session.
    pub async fn send(&self, client_id: &ClientId, message: &OutboundMessage) -> Result<String> {
        let send_lock = {
            let sessions = self.sessions.lock().await;
            match sessions.get(client_id) {
                Some(entry) if entry.status == SessionStatus::Ready => entry.send_lock.clone(),
                Some(entry) if entry.status == SessionStatus::Closed => {
                    return Err(WasendError::SessionLost(format!("session for {client_id} is closed")));
                }
                Some(entry) => {
                    return Err(WasendError::send_transient(format!(
                        "session for {client_id} is {}",
                        entry.status
                    )));
                }
                None => {
                    return Err(WasendError::SessionLost(format!("no session for {client_id}")));
                }
            }
        };

        let _guard = send_lock.lock().await;
        match self.host.send(client_id, message).await {
            Ok(message_id) => Ok(message_id),
            Err(e @ WasendError::SessionLost(_)) => {
                self.mark_closed(client_id, "SESSION_LOST", false).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Graceful teardown (tenant logout). Idempotent: closing an
    /// already-closed or unknown session is a no-op. Clears the auth
    /// marker so the session is not replayed on restart.
    pub async fn close(&self, client_id: &ClientId) -> Result<()> {
        self.force_close(client_id, "LOGOUT").await
    }

    /// Teardown triggered by an external collaborator (subscription
    /// expiry, admin action) with the reason carried on the emitted event.
    pub async fn force_close(&self, client_id: &ClientId, reason: &str) -> Result<()> {
        let live = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(client_id)
                .is_some_and(|e| e.status != SessionStatus::Closed)
        };
        if !live {
            return Ok(());
        }
        if let Err(e) = self.host.stop(client_id).await {
            tracing::warn!("⚠️ Host stop failed for {client_id}: {e}");
        }
        self.mark_closed(client_id, reason, true).await;
        Ok(())
    }

    /// Close every live session and release all host slots. Returns the
    /// number of sessions reclaimed.
    pub async fn force_reclaim(&self) -> usize {
        let live: Vec<ClientId> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .filter(|(_, e)| e.status != SessionStatus::Closed)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for client_id in &live {
            if let Err(e) = self.host.stop(client_id).await {
                tracing::warn!("⚠️ Host stop failed for {client_id}: {e}");
            }
            // Credentials stay linked; sessions come back on replay.
            self.mark_closed(client_id, "RECLAIMED", false).await;
        }
        tracing::info!("🧹 Reclaimed {} session(s)", live.len());
        live.len()
    }

    /// Re-create sessions for tenants with linked credentials (process
    /// restart). Pool exhaustion is logged and skipped, not fatal.
    pub async fn replay_persisted(&self) -> Result<usize> {
        let clients = self.store.clients_with_key(AUTH_MARKER_KEY)?;
        let mut replayed = 0;
        for client_id in clients {
            match self.create(&client_id).await {
                Ok(_) => replayed += 1,
                Err(e) => tracing::warn!("⚠️ Replay skipped for {client_id}: {e}"),
            }
        }
        if replayed > 0 {
            tracing::info!("🔁 Replayed {replayed} persisted session(s)");
        }
        Ok(replayed)
    }

    /// Number of live (non-closed) sessions.
    pub async fn live_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|e| e.status != SessionStatus::Closed)
            .count()
    }

    async fn mark_closed(&self, client_id: &ClientId, reason: &str, clear_auth: bool) {
        let was_live = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(client_id) {
                Some(entry) if entry.status != SessionStatus::Closed => {
                    entry.status = SessionStatus::Closed;
                    true
                }
                _ => false,
            }
        };
        if !was_live {
            return;
        }
        if clear_auth && let Err(e) = self.store.delete(client_id, AUTH_MARKER_KEY) {
            tracing::warn!("⚠️ Could not clear auth marker for {client_id}: {e}");
        }
        tracing::info!("🔴 Session closed for {client_id} ({reason})");
        self.emit(
            SessionEvent::new(client_id.clone(), SessionEventKind::Closed).with_reason(reason),
        );
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wasend_store::StoreDb;

    /// In-memory stand-in for the automation host.
    struct FakeHost {
        started: AtomicUsize,
        stopped: AtomicUsize,
        fail_start: bool,
    }

    impl FakeHost {
        fn new() -> Self {
            Self { started: AtomicUsize::new(0), stopped: AtomicUsize::new(0), fail_start: false }
        }
    }

    #[async_trait]
    impl MessengerHost for FakeHost {
        async fn start(&self, _client_id: &ClientId) -> Result<()> {
            if self.fail_start {
                return Err(WasendError::host("boot failure"));
            }
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _client_id: &ClientId, _message: &OutboundMessage) -> Result<String> {
            Ok("msg-1".into())
        }

        async fn stop(&self, _client_id: &ClientId) -> Result<()> {
            self.stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager_with(host: Arc<FakeHost>, max_sessions: usize) -> SessionManager {
        let store = SessionStore::new(Arc::new(StoreDb::open_in_memory().unwrap()));
        SessionManager::new(host, store, max_sessions)
    }

    #[tokio::test]
    async fn happy_path_event_sequence() {
        let host = Arc::new(FakeHost::new());
        let manager = manager_with(host.clone(), 4);
        let mut events = manager.subscribe();
        let client = ClientId::from("t1");

        manager.create(&client).await.unwrap();
        manager
            .apply_host_event(&client, HostEvent::QrGenerated { qr: "2@abc".into() })
            .await
            .unwrap();
        manager.apply_host_event(&client, HostEvent::Authenticated).await.unwrap();
        manager.apply_host_event(&client, HostEvent::Ready).await.unwrap();
        assert_eq!(manager.status(&client).await, SessionStatus::Ready);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(
            kinds,
            vec![
                SessionEventKind::Initialize,
                SessionEventKind::Initialized,
                SessionEventKind::QrGenerated,
                SessionEventKind::Authenticated,
                SessionEventKind::Ready,
            ]
        );
    }

    #[tokio::test]
    async fn create_is_idempotent_while_live() {
        let host = Arc::new(FakeHost::new());
        let manager = manager_with(host.clone(), 4);
        let client = ClientId::from("t1");

        manager.create(&client).await.unwrap();
        manager.create(&client).await.unwrap();
        assert_eq!(host.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pool_cap_is_enforced() {
        let host = Arc::new(FakeHost::new());
        let manager = manager_with(host.clone(), 2);

        manager.create(&ClientId::from("a")).await.unwrap();
        manager.create(&ClientId::from("b")).await.unwrap();
        let err = manager.create(&ClientId::from("c")).await.unwrap_err();
        assert!(matches!(err, WasendError::ResourceExhausted(_)));

        // Closing one frees a slot.
        manager.close(&ClientId::from("a")).await.unwrap();
        manager.create(&ClientId::from("c")).await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let host = Arc::new(FakeHost::new());
        let manager = manager_with(host.clone(), 4);
        let client = ClientId::from("t1");

        manager.create(&client).await.unwrap();
        manager.close(&client).await.unwrap();
        manager.close(&client).await.unwrap();
        manager.close(&ClientId::from("never-created")).await.unwrap();
        assert_eq!(host.stopped.load(Ordering::SeqCst), 1);
        assert_eq!(manager.status(&client).await, SessionStatus::Closed);
    }

    #[tokio::test]
    async fn failed_start_releases_slot() {
        let mut fake = FakeHost::new();
        fake.fail_start = true;
        let manager = manager_with(Arc::new(fake), 1);
        let client = ClientId::from("t1");

        assert!(manager.create(&client).await.is_err());
        assert_eq!(manager.live_count().await, 0);
        assert_eq!(manager.status(&client).await, SessionStatus::Uninitialized);
    }

    #[tokio::test]
    async fn session_can_be_recreated_after_close() {
        let host = Arc::new(FakeHost::new());
        let manager = manager_with(host.clone(), 4);
        let client = ClientId::from("t1");

        manager.create(&client).await.unwrap();
        manager.apply_host_event(&client, HostEvent::Ready).await.unwrap();
        manager
            .apply_host_event(&client, HostEvent::Closed { reason: None })
            .await
            .unwrap();
        assert_eq!(manager.status(&client).await, SessionStatus::Closed);

        let status = manager.create(&client).await.unwrap();
        assert_eq!(status, SessionStatus::AwaitingAuth);
        assert_eq!(host.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn force_reclaim_closes_everything() {
        let host = Arc::new(FakeHost::new());
        let manager = manager_with(host.clone(), 8);
        for id in ["a", "b", "c"] {
            manager.create(&ClientId::from(id)).await.unwrap();
        }
        assert_eq!(manager.force_reclaim().await, 3);
        assert_eq!(manager.live_count().await, 0);
    }

    #[tokio::test]
    async fn replay_recreates_linked_sessions() {
        let store = SessionStore::new(Arc::new(StoreDb::open_in_memory().unwrap()));
        let host = Arc::new(FakeHost::new());
        let manager = SessionManager::new(host.clone(), store.clone(), 8);
        let client = ClientId::from("t1");

        manager.create(&client).await.unwrap();
        manager.apply_host_event(&client, HostEvent::Ready).await.unwrap();

        // Simulate a restart: fresh manager over the same store.
        let manager2 = SessionManager::new(host.clone(), store, 8);
        assert_eq!(manager2.replay_persisted().await.unwrap(), 1);
        assert_eq!(manager2.status(&client).await, SessionStatus::AwaitingAuth);
    }

    #[tokio::test]
    async fn logout_clears_replay_marker() {
        let store = SessionStore::new(Arc::new(StoreDb::open_in_memory().unwrap()));
        let host = Arc::new(FakeHost::new());
        let manager = SessionManager::new(host.clone(), store.clone(), 8);
        let client = ClientId::from("t1");

        manager.create(&client).await.unwrap();
        manager.apply_host_event(&client, HostEvent::Ready).await.unwrap();
        manager.close(&client).await.unwrap();

        let manager2 = SessionManager::new(host, store, 8);
        assert_eq!(manager2.replay_persisted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_requires_ready() {
        let host = Arc::new(FakeHost::new());
        let manager = manager_with(host, 4);
        let client = ClientId::from("t1");
        let message = OutboundMessage {
            to: "84900000001".into(),
            message: Some("hi".into()),
            attachments: vec![],
            shared_contact_cards: vec![],
            polls: vec![],
        };

        assert!(manager.send(&client, &message).await.is_err());
        manager.create(&client).await.unwrap();
        assert!(manager.send(&client, &message).await.is_err());
        manager.apply_host_event(&client, HostEvent::Ready).await.unwrap();
        assert_eq!(manager.send(&client, &message).await.unwrap(), "msg-1");
    }
}
