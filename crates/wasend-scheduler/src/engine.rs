//! Schedule engine — turns a campaign into time-gated, per-recipient
//! sends and drives them through ready sessions.
//!
//! Submission enqueues one durable PendingRequest per recipient per step,
//! keyed `campaign:recipient:step` so crash/restart re-submission never
//! double-sends. A dispatch tick scans due requests, sends through the
//! session manager, records immutable SendResults, and chains nurturing
//! follow-ups off each successful send.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use wasend_core::config::SchedulerConfig;
use wasend_core::{ClientId, Result, SessionStatus, WasendError};
use wasend_session::SessionManager;
use wasend_store::{
    CampaignLedger, CampaignTotals, PendingRequest, PendingRequestQueue, RequestKind, SendResult,
    SendStatus,
};

use crate::campaign::CampaignSpec;

/// Counters for one dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Due requests examined.
    pub scanned: usize,
    pub sent: usize,
    pub failed: usize,
    /// Pushed back for a later retry.
    pub retried: usize,
    /// Left pending because the tenant's session is not ready.
    pub waiting: usize,
}

/// Per-campaign status report for the campaign owner.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub campaign_id: String,
    pub client_id: ClientId,
    pub status: String,
    pub totals: CampaignTotals,
    pub results: Vec<SendResult>,
}

/// The schedule engine. Sole creator of SendResults; reads session state
/// through the manager's accessor, never mutating it.
pub struct ScheduleEngine {
    queue: PendingRequestQueue,
    ledger: CampaignLedger,
    sessions: Arc<SessionManager>,
    config: SchedulerConfig,
    rng: Mutex<StdRng>,
}

impl ScheduleEngine {
    pub fn new(
        queue: PendingRequestQueue,
        ledger: CampaignLedger,
        sessions: Arc<SessionManager>,
        config: SchedulerConfig,
    ) -> Self {
        Self { queue, ledger, sessions, config, rng: Mutex::new(StdRng::from_entropy()) }
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Validate and persist a campaign, then enqueue the first step for
    /// every recipient. Idempotent per campaign id. Returns the id.
    pub fn submit(&self, spec: CampaignSpec) -> Result<String> {
        self.submit_at(spec, Utc::now())
    }

    pub fn submit_at(&self, mut spec: CampaignSpec, now: DateTime<Utc>) -> Result<String> {
        spec.validate()?;
        let campaign_id = spec
            .campaign_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        spec.campaign_id = Some(campaign_id.clone());

        let definition = serde_json::to_value(&spec)
            .map_err(|e| WasendError::validation(format!("unserializable campaign: {e}")))?;
        let created = self.ledger.upsert_campaign(&campaign_id, &spec.client_id, &definition)?;
        if !created {
            tracing::debug!("📋 Campaign {campaign_id} re-submitted; steps stay idempotent");
        }

        let window = spec.window()?;
        for recipient in &spec.recipients {
            let scheduled = {
                let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
                let mut instant = window.next_send_instant(now, &mut *rng);
                if spec.delay_max_secs > 0 {
                    let gap = rand::Rng::gen_range(
                        &mut *rng,
                        spec.delay_min_secs..=spec.delay_max_secs,
                    );
                    instant = window.clamp_into(instant + Duration::seconds(gap as i64), &mut *rng);
                }
                instant
            };
            self.enqueue_step(&spec.client_id, &campaign_id, recipient, 0, scheduled)?;
        }
        tracing::info!(
            "📤 Campaign {campaign_id} submitted: {} recipient(s), window {window}",
            spec.recipients.len()
        );
        Ok(campaign_id)
    }

    fn enqueue_step(
        &self,
        client_id: &ClientId,
        campaign_id: &str,
        recipient: &str,
        step_index: u32,
        scheduled: DateTime<Utc>,
    ) -> Result<()> {
        let key = step_key(campaign_id, recipient, step_index);
        let data = serde_json::json!({
            "campaign_id": campaign_id,
            "recipient": recipient,
            "step_index": step_index,
            "scheduled_at": scheduled.to_rfc3339(),
        });
        self.queue
            .enqueue(client_id, &key, RequestKind::SendMessage, data, Some(scheduled))?;
        Ok(())
    }

    /// One dispatch pass over every due SEND_MESSAGE request.
    pub async fn tick(&self) -> DispatchStats {
        self.tick_at(Utc::now()).await
    }

    /// Dispatch pass with an explicit clock. A failure on one request or
    /// one tenant never aborts the pass.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let due = match self.queue.list_due(RequestKind::SendMessage, now) {
            Ok(due) => due,
            Err(e) => {
                tracing::warn!("⚠️ Dispatch scan failed: {e}");
                return stats;
            }
        };

        let mut specs: HashMap<String, Option<CampaignSpec>> = HashMap::new();
        for request in due {
            stats.scanned += 1;
            if let Err(e) = self.dispatch_one(&request, now, &mut specs, &mut stats).await {
                // Isolate: log, move on to the next request.
                tracing::warn!(
                    "⚠️ Dispatch error for {}/{}: {e}",
                    request.client_id,
                    request.key
                );
            }
        }
        stats
    }

    async fn dispatch_one(
        &self,
        request: &PendingRequest,
        now: DateTime<Utc>,
        specs: &mut HashMap<String, Option<CampaignSpec>>,
        stats: &mut DispatchStats,
    ) -> Result<()> {
        let Some(step) = StepRef::from_payload(&request.data) else {
            self.queue.mark_failed(
                &request.client_id,
                &request.key,
                "unreadable step payload",
                "BAD_PAYLOAD",
            )?;
            stats.failed += 1;
            return Ok(());
        };

        let spec = specs
            .entry(step.campaign_id.clone())
            .or_insert_with(|| self.load_spec(&step.campaign_id));
        let Some(spec) = spec.as_ref() else {
            self.queue.mark_failed(
                &request.client_id,
                &request.key,
                "campaign record missing",
                "CAMPAIGN_MISSING",
            )?;
            self.ledger.record(&step.result(SendStatus::Failed, Some("CAMPAIGN_MISSING"), None))?;
            stats.failed += 1;
            return Ok(());
        };

        // Work queues until the tenant's session is ready; the session-loss
        // sweep handles closed sessions.
        if self.sessions.status(&request.client_id).await != SessionStatus::Ready {
            stats.waiting += 1;
            return Ok(());
        }

        let outbound = spec.outbound_for(&step.recipient, step.step_index);
        match self.sessions.send(&request.client_id, &outbound).await {
            Ok(message_id) => {
                tracing::debug!(
                    "✉️ {} step {} → {} ({message_id})",
                    step.campaign_id,
                    step.step_index,
                    step.recipient
                );
                self.ledger.record(&step.result(SendStatus::Sent, None, Some(now)))?;
                self.queue.mark_success(&request.client_id, &request.key)?;
                stats.sent += 1;
                self.schedule_next_step(&request.client_id, spec, &step, now)?;
            }
            Err(e) => self.handle_send_error(request, &step, e, now, stats)?,
        }
        Ok(())
    }

    fn handle_send_error(
        &self,
        request: &PendingRequest,
        step: &StepRef,
        error: WasendError,
        now: DateTime<Utc>,
        stats: &mut DispatchStats,
    ) -> Result<()> {
        let attempt = request.attempts + 1;
        if error.is_transient() && attempt < self.config.max_send_attempts {
            let backoff = self.config.retry_base_secs.saturating_mul(1 << request.attempts);
            let next = now + Duration::seconds(backoff as i64);
            self.queue.record_attempt(&request.client_id, &request.key, next)?;
            stats.retried += 1;
            tracing::debug!(
                "🔁 Retry {attempt}/{} for {} in {backoff}s: {error}",
                self.config.max_send_attempts,
                request.key
            );
            return Ok(());
        }

        let reason = match &error {
            WasendError::SessionLost(_) => "SESSION_LOST",
            _ => "SEND_FAILED",
        };
        self.ledger.record(&step.result(SendStatus::Failed, Some(reason), None))?;
        self.queue.mark_failed(&request.client_id, &request.key, &error.to_string(), reason)?;
        stats.failed += 1;
        tracing::info!(
            "❌ {} step {} → {} failed after {attempt} attempt(s): {error}",
            step.campaign_id,
            step.step_index,
            step.recipient
        );
        Ok(())
    }

    /// Enqueue the following nurturing step, exactly once, triggered off
    /// this step's send time and re-clamped into the next step's window.
    fn schedule_next_step(
        &self,
        client_id: &ClientId,
        spec: &CampaignSpec,
        step: &StepRef,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let next_index = step.step_index + 1;
        if next_index >= spec.step_count() {
            return Ok(());
        }
        let Some(after) = spec.step_after(next_index) else {
            return Ok(());
        };
        let window = spec.step_window(next_index)?;
        let trigger = sent_at + Duration::seconds(after as i64);
        let scheduled = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            window.clamp_into(trigger, &mut *rng)
        };
        self.enqueue_step(client_id, &step.campaign_id, &step.recipient, next_index, scheduled)
    }

    /// Fail every pending request of a tenant whose session closed, and
    /// record matching FAILED results for send steps. Invoked by the
    /// dispatch worker on a `whatsapp-closed` event.
    pub fn handle_session_closed(&self, client_id: &ClientId) -> Result<usize> {
        let swept = self.queue.fail_all_pending(client_id, "session closed", "SESSION_LOST")?;
        for request in &swept {
            if request.kind != RequestKind::SendMessage {
                continue;
            }
            if let Some(step) = StepRef::from_payload(&request.data) {
                self.ledger.record(&step.result(SendStatus::Failed, Some("SESSION_LOST"), None))?;
            }
        }
        if !swept.is_empty() {
            tracing::info!("🧹 Failed {} pending request(s) for {client_id} (session lost)", swept.len());
        }
        Ok(swept.len())
    }

    /// Mark every not-yet-dispatched step of a campaign SKIPPED.
    /// Already-sent steps keep their results.
    pub fn cancel(&self, campaign_id: &str) -> Result<usize> {
        let client_id = self.ledger.campaign_client(campaign_id)?;
        let prefix = format!("{campaign_id}:");
        let mut cancelled = 0;
        for request in self.queue.list_pending(&client_id, Some(RequestKind::SendMessage))? {
            if !request.key.starts_with(&prefix) {
                continue;
            }
            self.queue
                .mark_failed(&client_id, &request.key, "campaign cancelled", "CANCELLED")?;
            if let Some(step) = StepRef::from_payload(&request.data) {
                self.ledger.record(&step.result(SendStatus::Skipped, Some("CANCELLED"), None))?;
            }
            cancelled += 1;
        }
        self.ledger.set_campaign_status(campaign_id, "cancelled")?;
        tracing::info!("🚫 Campaign {campaign_id} cancelled ({cancelled} step(s) skipped)");
        Ok(cancelled)
    }

    /// Per-recipient status report for the campaign owner.
    pub fn report(&self, campaign_id: &str) -> Result<CampaignReport> {
        let record = self
            .ledger
            .campaign(campaign_id)?
            .ok_or_else(|| WasendError::not_found(format!("campaign {campaign_id}")))?;
        Ok(CampaignReport {
            campaign_id: record.id,
            client_id: record.client_id,
            status: record.status,
            totals: self.ledger.totals(campaign_id)?,
            results: self.ledger.results(campaign_id)?,
        })
    }

    /// Earliest pending dispatch instant, so the worker can sleep instead
    /// of polling.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.queue.next_deadline(RequestKind::SendMessage).ok().flatten()
    }

    /// Pending-queue snapshot for one tenant (support surface).
    pub fn pending_for(&self, client_id: &ClientId) -> Result<Vec<PendingRequest>> {
        self.queue.list_pending(client_id, None)
    }

    fn load_spec(&self, campaign_id: &str) -> Option<CampaignSpec> {
        let record = self.ledger.campaign(campaign_id).ok().flatten()?;
        serde_json::from_value(record.definition).ok()
    }
}

fn step_key(campaign_id: &str, recipient: &str, step_index: u32) -> String {
    format!("{campaign_id}:{recipient}:{step_index}")
}

/// Identity of one step extracted from a queued payload.
struct StepRef {
    campaign_id: String,
    recipient: String,
    step_index: u32,
}

impl StepRef {
    fn from_payload(data: &serde_json::Value) -> Option<Self> {
        Some(Self {
            campaign_id: data["campaign_id"].as_str()?.to_string(),
            recipient: data["recipient"].as_str()?.to_string(),
            step_index: data["step_index"].as_u64()? as u32,
        })
    }

    fn result(
        &self,
        status: SendStatus,
        reason: Option<&str>,
        sent_at: Option<DateTime<Utc>>,
    ) -> SendResult {
        SendResult {
            campaign_id: self.campaign_id.clone(),
            recipient: self.recipient.clone(),
            step_index: self.step_index,
            status,
            error_reason: reason.map(str::to_string),
            sent_at,
        }
    }
}

/// Long-lived dispatch worker: sleeps to the nearest pending deadline
/// (bounded by the configured tick interval) and sweeps tenant queues
/// when a session closes. Never terminates on per-tenant errors.
pub async fn run_dispatcher(engine: Arc<ScheduleEngine>) {
    let max_tick = std::time::Duration::from_secs(engine.config.tick_secs.max(1));
    let mut events = engine.sessions().subscribe();
    tracing::info!("⏰ Dispatch worker started (tick ≤ {}s)", engine.config.tick_secs);

    loop {
        let sleep_for = match engine.next_deadline() {
            Some(deadline) => {
                let until = (deadline - Utc::now()).num_milliseconds().max(0) as u64;
                std::time::Duration::from_millis(until).min(max_tick)
            }
            None => max_tick,
        };

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {
                let stats = engine.tick().await;
                if stats.scanned > 0 {
                    tracing::debug!(
                        "📊 Tick: {} scanned, {} sent, {} failed, {} retried, {} waiting",
                        stats.scanned, stats.sent, stats.failed, stats.retried, stats.waiting
                    );
                }
            }
            event = events.recv() => {
                match event {
                    Ok(ev) if ev.kind == wasend_core::SessionEventKind::Closed => {
                        if let Err(e) = engine.handle_session_closed(&ev.client_id) {
                            tracing::warn!("⚠️ Session-loss sweep failed for {}: {e}", ev.client_id);
                        }
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("⚠️ Dispatch worker lagged {n} session event(s)");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        // Manager is gone; keep ticking on the timer alone.
                        tokio::time::sleep(max_tick).await;
                    }
                }
            }
        }
    }
}
