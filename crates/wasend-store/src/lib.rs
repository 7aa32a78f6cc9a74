//! # Wasend Store
//!
//! SQLite-backed persistence — survives restarts, one database for all
//! tenants, every row scoped by `client_id`.
//!
//! - [`SessionStore`] — per-tenant key/value state (string or object per
//!   key, mutually exclusive).
//! - [`PendingRequestQueue`] — durable, idempotent work queue decoupling
//!   request submission from session-dependent execution.
//! - [`CampaignLedger`] — submitted campaigns and their per-recipient
//!   send outcomes.

pub mod db;
pub mod kv;
pub mod queue;
pub mod results;

pub use db::StoreDb;
pub use kv::SessionStore;
pub use queue::{PendingRequest, PendingRequestQueue, RequestKind, RequestStatus};
pub use results::{CampaignLedger, CampaignRecord, CampaignTotals, SendResult, SendStatus};
