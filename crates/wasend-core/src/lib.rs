//! # Wasend Core
//!
//! Shared foundation for the Wasend workspace: the error taxonomy, tenant
//! and session value types, lifecycle event definitions, and the TOML
//! configuration system.

pub mod config;
pub mod error;
pub mod types;

pub use config::WasendConfig;
pub use error::{Result, WasendError};
pub use types::{
    Attachment, ClientId, OutboundMessage, Poll, SessionEvent, SessionEventKind, SessionStatus,
};
