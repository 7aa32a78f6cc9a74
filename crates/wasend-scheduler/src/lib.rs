//! # Wasend Scheduler
//!
//! Campaign scheduling and dispatch. A submitted campaign becomes one
//! durable, idempotent PendingRequest per recipient per step; a dispatch
//! worker fires the due ones through ready sessions, retries transient
//! failures with backoff, and chains nurturing follow-ups off each
//! successful send.
//!
//! ## Flow
//! ```text
//! submit(campaign)
//!   ├── validate (content, recipients, window)
//!   ├── persist campaign
//!   └── per recipient: jittered instant inside the send window
//!         → enqueue SEND_MESSAGE (campaign:recipient:step)
//!
//! dispatch tick (sleeps to the nearest deadline)
//!   ├── scan due requests, skip tenants whose session is not READY
//!   ├── send via SessionManager (serialized per tenant)
//!   ├── record SendResult, finalize the request
//!   └── on SENT: enqueue next nurturing step at sent_at + after,
//!       re-clamped into that step's window
//! ```

pub mod campaign;
pub mod engine;
pub mod window;

pub use campaign::{CampaignSpec, NurturingStep};
pub use engine::{CampaignReport, DispatchStats, ScheduleEngine, run_dispatcher};
pub use window::{ClockTime, SendWindow};
