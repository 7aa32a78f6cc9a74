//! # Wasend Session
//!
//! Per-tenant messenger session lifecycle: creation, QR/auth handshake,
//! ready/closed transitions, and teardown — many tenants multiplexed in
//! one process behind an explicit registry.
//!
//! The actual WhatsApp client is a supplied capability reached through
//! the [`MessengerHost`] trait; tests inject a fake, production uses the
//! HTTP adapter.

pub mod host;
pub mod manager;

pub use host::{HostEvent, HttpMessengerHost, MessengerHost};
pub use manager::{SessionInfo, SessionManager};
