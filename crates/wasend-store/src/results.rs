//! Campaign records and per-recipient send outcomes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wasend_core::{ClientId, Result, WasendError};

use crate::db::StoreDb;

/// Outcome of one send attempt for one recipient at one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Sent,
    Failed,
    Skipped,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "SENT" => Self::Sent,
            "SKIPPED" => Self::Skipped,
            _ => Self::Failed,
        }
    }
}

/// Immutable per-recipient, per-step outcome record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub campaign_id: String,
    pub recipient: String,
    pub step_index: u32,
    pub status: SendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

/// Stored campaign row.
#[derive(Debug, Clone)]
pub struct CampaignRecord {
    pub id: String,
    pub client_id: ClientId,
    pub definition: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts for a campaign status report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignTotals {
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
}

/// Campaigns plus their send results. Results are write-once.
#[derive(Clone)]
pub struct CampaignLedger {
    db: Arc<StoreDb>,
}

impl CampaignLedger {
    pub fn new(db: Arc<StoreDb>) -> Self {
        Self { db }
    }

    /// Insert the campaign if it is new. Returns `true` when a row was
    /// created; an existing campaign is left untouched so re-submission
    /// stays idempotent.
    pub fn upsert_campaign(
        &self,
        id: &str,
        client_id: &ClientId,
        definition: &serde_json::Value,
    ) -> Result<bool> {
        let id = id.to_string();
        let client = client_id.to_string();
        let definition = definition.to_string();
        self.db.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO campaigns (id, client_id, definition, status, created_at)
                 VALUES (?1, ?2, ?3, 'active', ?4)
                 ON CONFLICT(id) DO NOTHING",
                rusqlite::params![id, client, definition, Utc::now().to_rfc3339()],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn campaign(&self, id: &str) -> Result<Option<CampaignRecord>> {
        let id = id.to_string();
        self.db.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, client_id, definition, status, created_at
                     FROM campaigns WHERE id = ?1",
                    [&id],
                    |row| {
                        let definition: String = row.get(2)?;
                        let created_at: String = row.get(4)?;
                        Ok(CampaignRecord {
                            id: row.get(0)?,
                            client_id: ClientId::new(row.get::<_, String>(1)?),
                            definition: serde_json::from_str(&definition).unwrap_or_default(),
                            status: row.get(3)?,
                            created_at: DateTime::parse_from_rfc3339(&created_at)
                                .map(|d| d.with_timezone(&Utc))
                                .unwrap_or_else(|_| Utc::now()),
                        })
                    },
                )
                .map(Some);
            match row {
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                other => other,
            }
        })
    }

    pub fn set_campaign_status(&self, id: &str, status: &str) -> Result<()> {
        let id = id.to_string();
        let status = status.to_string();
        self.db.with_conn(move |conn| {
            conn.execute(
                "UPDATE campaigns SET status = ?1 WHERE id = ?2",
                rusqlite::params![status, id],
            )?;
            Ok(())
        })
    }

    /// Record an outcome. First write wins: an existing result for the
    /// same `(campaign, recipient, step)` is never overwritten.
    pub fn record(&self, result: &SendResult) -> Result<bool> {
        let result = result.clone();
        self.db.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO send_results
                     (campaign_id, recipient, step_index, status, error_reason, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(campaign_id, recipient, step_index) DO NOTHING",
                rusqlite::params![
                    result.campaign_id,
                    result.recipient,
                    result.step_index,
                    result.status.as_str(),
                    result.error_reason,
                    result.sent_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn result(
        &self,
        campaign_id: &str,
        recipient: &str,
        step_index: u32,
    ) -> Result<Option<SendResult>> {
        let results = self.results(campaign_id)?;
        Ok(results
            .into_iter()
            .find(|r| r.recipient == recipient && r.step_index == step_index))
    }

    /// All outcomes for one campaign, ordered by recipient then step.
    pub fn results(&self, campaign_id: &str) -> Result<Vec<SendResult>> {
        let campaign = campaign_id.to_string();
        self.db.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT campaign_id, recipient, step_index, status, error_reason, sent_at
                 FROM send_results WHERE campaign_id = ?1
                 ORDER BY recipient, step_index",
            )?;
            let rows = stmt.query_map([&campaign], |row| {
                let status: String = row.get(3)?;
                let sent_at: Option<String> = row.get(5)?;
                Ok(SendResult {
                    campaign_id: row.get(0)?,
                    recipient: row.get(1)?,
                    step_index: row.get(2)?,
                    status: SendStatus::from_str(&status),
                    error_reason: row.get(4)?,
                    sent_at: sent_at
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|d| d.with_timezone(&Utc)),
                })
            })?;
            rows.collect()
        })
    }

    pub fn totals(&self, campaign_id: &str) -> Result<CampaignTotals> {
        let mut totals = CampaignTotals::default();
        for result in self.results(campaign_id)? {
            match result.status {
                SendStatus::Sent => totals.sent += 1,
                SendStatus::Failed => totals.failed += 1,
                SendStatus::Skipped => totals.skipped += 1,
            }
        }
        Ok(totals)
    }

    /// The campaign's tenant, or `NotFound`.
    pub fn campaign_client(&self, id: &str) -> Result<ClientId> {
        self.campaign(id)?
            .map(|c| c.client_id)
            .ok_or_else(|| WasendError::not_found(format!("campaign {id}")))
    }
}
