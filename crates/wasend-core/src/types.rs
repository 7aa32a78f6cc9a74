//! Shared value types: tenant identity, session state, lifecycle events,
//! and the outbound message bundle handed to the messenger host.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque tenant key. One messaging identity per `ClientId`; unit of
/// isolation for sessions, queues, and stored state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of one tenant's messaging session.
///
/// Transitions are monotonic: `Uninitialized → AwaitingAuth → Ready →
/// Closed`. `Closed` is terminal for a given session, but a fresh session
/// may be created afterward for the same tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Uninitialized,
    AwaitingAuth,
    Ready,
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "UNINITIALIZED"),
            Self::AwaitingAuth => write!(f, "AWAITING_AUTH"),
            Self::Ready => write!(f, "READY"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Wire names for session lifecycle events, matching what the UI layer
/// subscribes to over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEventKind {
    #[serde(rename = "initialize")]
    Initialize,
    #[serde(rename = "initialized")]
    Initialized,
    #[serde(rename = "qr-generated")]
    QrGenerated,
    #[serde(rename = "whatsapp-authenticated")]
    Authenticated,
    #[serde(rename = "whatsapp-ready")]
    Ready,
    #[serde(rename = "whatsapp-closed")]
    Closed,
}

/// A session lifecycle event emitted by the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub client_id: ClientId,
    #[serde(rename = "event")]
    pub kind: SessionEventKind,
    /// QR payload for `qr-generated`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    /// Reason string on forced closure (`LOGOUT`, `SESSION_LOST`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(client_id: ClientId, kind: SessionEventKind) -> Self {
        Self { client_id, kind, qr: None, reason: None, at: Utc::now() }
    }

    pub fn with_qr(mut self, qr: impl Into<String>) -> Self {
        self.qr = Some(qr.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Reference to an uploaded attachment, resolved by the messenger host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Stored attachment identifier.
    pub id: String,
    /// Optional caption rendered under the media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// Poll definition as composed in the campaign builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub title: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub multiple_answers: bool,
}

/// One unit of outbound content for one recipient, handed to the
/// messenger host as-is. At least one of the content fields is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Recipient address (phone number in the host's expected format).
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_contact_cards: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub polls: Vec<Poll>,
}

impl OutboundMessage {
    /// True if no content field is populated.
    pub fn is_empty(&self) -> bool {
        self.message.as_deref().is_none_or(|m| m.trim().is_empty())
            && self.attachments.is_empty()
            && self.shared_contact_cards.is_empty()
            && self.polls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_wire_names() {
        let kinds = [
            (SessionEventKind::Initialize, "\"initialize\""),
            (SessionEventKind::QrGenerated, "\"qr-generated\""),
            (SessionEventKind::Authenticated, "\"whatsapp-authenticated\""),
            (SessionEventKind::Ready, "\"whatsapp-ready\""),
            (SessionEventKind::Closed, "\"whatsapp-closed\""),
        ];
        for (kind, wire) in kinds {
            assert_eq!(serde_json::to_string(&kind).unwrap(), wire);
        }
    }

    #[test]
    fn outbound_empty_detection() {
        let mut msg = OutboundMessage {
            to: "84900000001".into(),
            message: Some("  ".into()),
            attachments: vec![],
            shared_contact_cards: vec![],
            polls: vec![],
        };
        assert!(msg.is_empty());
        msg.polls.push(Poll {
            title: "Lunch?".into(),
            options: vec!["Yes".into(), "No".into()],
            multiple_answers: false,
        });
        assert!(!msg.is_empty());
    }
}
