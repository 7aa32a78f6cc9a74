//! WebSocket fan-out of session lifecycle events.
//!
//! The UI subscribes here to render connection state (QR codes, ready,
//! closed). The core only emits; nothing is rendered server-side.
//!
//! Protocol:
//! ← Server sends: {"type":"connected","version":"..."}
//! ← Server sends: {"client_id":"...","event":"qr-generated","qr":"...","at":"..."}
//! → Client may send: {"type":"ping"} — answered with {"type":"pong"}

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast;

use super::server::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(value.to_string().into())).await
}

/// Handle a WebSocket connection: forward session events until the client
/// goes away.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    tracing::debug!("WebSocket client connected");
    let mut events = state.sessions.subscribe();

    let welcome = serde_json::json!({
        "type": "connected",
        "service": "wasend-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    });
    if send_json(&mut socket, &welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let payload = match serde_json::to_value(&event) {
                            Ok(payload) => payload,
                            Err(e) => {
                                tracing::warn!("⚠️ Unserializable session event: {e}");
                                continue;
                            }
                        };
                        if send_json(&mut socket, &payload).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!("WebSocket client lagged {n} event(s)");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let parsed: serde_json::Value =
                            serde_json::from_str(&text).unwrap_or_default();
                        if parsed["type"].as_str() == Some("ping")
                            && send_json(&mut socket, &serde_json::json!({"type": "pong"}))
                                .await
                                .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
    tracing::debug!("WebSocket client disconnected");
}
