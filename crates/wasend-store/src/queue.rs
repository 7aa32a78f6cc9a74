//! Durable, at-most-once work queue. Records are keyed `(client_id, key)`
//! so re-submission is idempotent; status only moves
//! PENDING -> SUCCESS | FAILED and finalized records are immutable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wasend_core::{ClientId, Result, WasendError};

use crate::db::StoreDb;

/// Kind of asynchronous work a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestKind {
    SavedContacts,
    NonSavedContacts,
    SendMessage,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SavedContacts => "SAVED_CONTACTS",
            Self::NonSavedContacts => "NON_SAVED_CONTACTS",
            Self::SendMessage => "SEND_MESSAGE",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "SAVED_CONTACTS" => Self::SavedContacts,
            "NON_SAVED_CONTACTS" => Self::NonSavedContacts,
            _ => Self::SendMessage,
        }
    }
}

/// Request lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Success,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "SUCCESS" => Self::Success,
            "FAILED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One durable unit of asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequest {
    pub client_id: ClientId,
    pub key: String,
    pub kind: RequestKind,
    pub data: serde_json::Value,
    pub status: RequestStatus,
    pub error: Option<String>,
    pub reason: Option<String>,
    pub attempts: u32,
    /// Earliest instant a worker may dispatch this request.
    pub not_before: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

const SELECT_COLS: &str = "client_id, key, kind, data, status, error, reason, \
                           attempts, not_before, created_at, completed_at";

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingRequest> {
    let client_id: String = row.get(0)?;
    let kind: String = row.get(2)?;
    let data: String = row.get(3)?;
    let status: String = row.get(4)?;
    let not_before: Option<String> = row.get(8)?;
    let created_at: String = row.get(9)?;
    let completed_at: Option<String> = row.get(10)?;
    Ok(PendingRequest {
        client_id: ClientId::new(client_id),
        key: row.get(1)?,
        kind: RequestKind::from_str(&kind),
        data: serde_json::from_str(&data).unwrap_or_default(),
        status: RequestStatus::from_str(&status),
        error: row.get(5)?,
        reason: row.get(6)?,
        attempts: row.get(7)?,
        not_before: parse_ts_opt(not_before),
        created_at: parse_ts(&created_at),
        completed_at: parse_ts_opt(completed_at),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_ts_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Durable work queue shared by all tenants; every operation is scoped by
/// `client_id`.
#[derive(Clone)]
pub struct PendingRequestQueue {
    db: Arc<StoreDb>,
}

impl PendingRequestQueue {
    pub fn new(db: Arc<StoreDb>) -> Self {
        Self { db }
    }

    /// Idempotent enqueue: if `(client_id, key)` already exists the stored
    /// record is returned unchanged — status and data are never reset.
    pub fn enqueue(
        &self,
        client_id: &ClientId,
        key: &str,
        kind: RequestKind,
        data: serde_json::Value,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<PendingRequest> {
        let client = client_id.to_string();
        let key_owned = key.to_string();
        self.db.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO pending_requests
                     (client_id, key, kind, data, status, attempts, not_before, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'PENDING', 0, ?5, ?6)
                 ON CONFLICT(client_id, key) DO NOTHING",
                rusqlite::params![
                    client,
                    key_owned,
                    kind.as_str(),
                    data.to_string(),
                    not_before.map(|t| t.to_rfc3339()),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            conn.query_row(
                &format!(
                    "SELECT {SELECT_COLS} FROM pending_requests
                     WHERE client_id = ?1 AND key = ?2"
                ),
                rusqlite::params![client, key_owned],
                row_to_request,
            )
        })
    }

    /// Fetch one request, if it exists.
    pub fn get(&self, client_id: &ClientId, key: &str) -> Result<Option<PendingRequest>> {
        let client = client_id.to_string();
        let key_owned = key.to_string();
        self.db.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLS} FROM pending_requests
                         WHERE client_id = ?1 AND key = ?2"
                    ),
                    rusqlite::params![client, key_owned],
                    row_to_request,
                )
                .map(Some);
            match row {
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                other => other,
            }
        })
    }

    /// Finalize a PENDING request as SUCCESS. Returns `false` if the record
    /// exists but is already finalized (no-op); `NotFound` if it is unknown.
    pub fn mark_success(&self, client_id: &ClientId, key: &str) -> Result<bool> {
        self.finalize(client_id, key, RequestStatus::Success, None, None)
    }

    /// Finalize a PENDING request as FAILED with an error and reason.
    pub fn mark_failed(
        &self,
        client_id: &ClientId,
        key: &str,
        error: &str,
        reason: &str,
    ) -> Result<bool> {
        self.finalize(
            client_id,
            key,
            RequestStatus::Failed,
            Some(error.to_string()),
            Some(reason.to_string()),
        )
    }

    fn finalize(
        &self,
        client_id: &ClientId,
        key: &str,
        status: RequestStatus,
        error: Option<String>,
        reason: Option<String>,
    ) -> Result<bool> {
        let client = client_id.to_string();
        let key_owned = key.to_string();
        let updated = self.db.with_conn(move |conn| {
            conn.execute(
                "UPDATE pending_requests
                 SET status = ?1, error = ?2, reason = ?3, completed_at = ?4
                 WHERE client_id = ?5 AND key = ?6 AND status = 'PENDING'",
                rusqlite::params![
                    status.as_str(),
                    error,
                    reason,
                    Utc::now().to_rfc3339(),
                    client,
                    key_owned,
                ],
            )
        })?;
        if updated > 0 {
            return Ok(true);
        }
        match self.get(client_id, key)? {
            Some(_) => Ok(false),
            None => Err(WasendError::not_found(format!("request {client_id}/{key}"))),
        }
    }

    /// Record a failed attempt on a still-PENDING request and push back its
    /// dispatch time. Returns the new attempt count.
    pub fn record_attempt(
        &self,
        client_id: &ClientId,
        key: &str,
        next_not_before: DateTime<Utc>,
    ) -> Result<u32> {
        let client = client_id.to_string();
        let key_owned = key.to_string();
        let updated = self.db.with_conn(move |conn| {
            conn.execute(
                "UPDATE pending_requests
                 SET attempts = attempts + 1, not_before = ?1
                 WHERE client_id = ?2 AND key = ?3 AND status = 'PENDING'",
                rusqlite::params![next_not_before.to_rfc3339(), client, key_owned],
            )
        })?;
        if updated == 0 {
            return Err(WasendError::not_found(format!("request {client_id}/{key}")));
        }
        Ok(self
            .get(client_id, key)?
            .map(|r| r.attempts)
            .unwrap_or_default())
    }

    /// PENDING requests for one tenant, FIFO by insertion order.
    pub fn list_pending(
        &self,
        client_id: &ClientId,
        kind: Option<RequestKind>,
    ) -> Result<Vec<PendingRequest>> {
        let client = client_id.to_string();
        self.db.with_conn(move |conn| {
            let sql = match kind {
                Some(_) => format!(
                    "SELECT {SELECT_COLS} FROM pending_requests
                     WHERE client_id = ?1 AND status = 'PENDING' AND kind = ?2
                     ORDER BY rowid"
                ),
                None => format!(
                    "SELECT {SELECT_COLS} FROM pending_requests
                     WHERE client_id = ?1 AND status = 'PENDING'
                     ORDER BY rowid"
                ),
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = match kind {
                Some(k) => stmt.query_map(rusqlite::params![client, k.as_str()], row_to_request)?,
                None => stmt.query_map(rusqlite::params![client], row_to_request)?,
            };
            rows.collect()
        })
    }

    /// Cross-tenant scan of PENDING requests of `kind` whose `not_before`
    /// has arrived, FIFO by insertion order.
    pub fn list_due(&self, kind: RequestKind, now: DateTime<Utc>) -> Result<Vec<PendingRequest>> {
        self.db.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM pending_requests
                 WHERE kind = ?1 AND status = 'PENDING'
                   AND (not_before IS NULL OR not_before <= ?2)
                 ORDER BY rowid"
            ))?;
            let rows =
                stmt.query_map(rusqlite::params![kind.as_str(), now.to_rfc3339()], row_to_request)?;
            rows.collect()
        })
    }

    /// Finalize every PENDING request of one tenant as FAILED (session
    /// loss, forced teardown). Returns the affected records as they were
    /// while still pending.
    pub fn fail_all_pending(
        &self,
        client_id: &ClientId,
        error: &str,
        reason: &str,
    ) -> Result<Vec<PendingRequest>> {
        let client = client_id.to_string();
        let error = error.to_string();
        let reason = reason.to_string();
        self.db.with_conn_mut(move |conn| {
            let tx = conn.transaction()?;
            let pending = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {SELECT_COLS} FROM pending_requests
                     WHERE client_id = ?1 AND status = 'PENDING'
                     ORDER BY rowid"
                ))?;
                let rows = stmt.query_map([&client], row_to_request)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            tx.execute(
                "UPDATE pending_requests
                 SET status = 'FAILED', error = ?1, reason = ?2, completed_at = ?3
                 WHERE client_id = ?4 AND status = 'PENDING'",
                rusqlite::params![error, reason, Utc::now().to_rfc3339(), client],
            )?;
            tx.commit()?;
            Ok(pending)
        })
    }

    /// Smallest `not_before` among PENDING requests of `kind`, so the
    /// dispatch worker can sleep to the nearest deadline instead of
    /// polling.
    pub fn next_deadline(&self, kind: RequestKind) -> Result<Option<DateTime<Utc>>> {
        self.db.with_conn(move |conn| {
            let row: Option<Option<String>> = conn
                .query_row(
                    "SELECT MIN(not_before) FROM pending_requests
                     WHERE kind = ?1 AND status = 'PENDING'",
                    [kind.as_str()],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            Ok(row.flatten().as_deref().map(parse_ts))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> PendingRequestQueue {
        PendingRequestQueue::new(Arc::new(StoreDb::open_in_memory().unwrap()))
    }

    fn client() -> ClientId {
        ClientId::from("tenant-1")
    }

    #[test]
    fn enqueue_is_idempotent() {
        let q = queue();
        let first = q
            .enqueue(&client(), "c1:r1:0", RequestKind::SendMessage,
                serde_json::json!({"n": 1}), None)
            .unwrap();
        let second = q
            .enqueue(&client(), "c1:r1:0", RequestKind::SendMessage,
                serde_json::json!({"n": 2}), None)
            .unwrap();
        assert_eq!(first.data, second.data, "second enqueue must not overwrite data");
        assert_eq!(second.status, RequestStatus::Pending);
    }

    #[test]
    fn enqueue_does_not_resurrect_finalized() {
        let q = queue();
        q.enqueue(&client(), "k", RequestKind::SendMessage, serde_json::json!({}), None)
            .unwrap();
        assert!(q.mark_success(&client(), "k").unwrap());

        let again = q
            .enqueue(&client(), "k", RequestKind::SendMessage, serde_json::json!({}), None)
            .unwrap();
        assert_eq!(again.status, RequestStatus::Success);
    }

    #[test]
    fn finalized_requests_are_immutable() {
        let q = queue();
        q.enqueue(&client(), "k", RequestKind::SendMessage, serde_json::json!({}), None)
            .unwrap();
        assert!(q.mark_failed(&client(), "k", "boom", "SEND_FAILED").unwrap());
        // Second finalize is a no-op, not an error.
        assert!(!q.mark_success(&client(), "k").unwrap());

        let record = q.get(&client(), "k").unwrap().unwrap();
        assert_eq!(record.status, RequestStatus::Failed);
        assert_eq!(record.reason.as_deref(), Some("SEND_FAILED"));
    }

    #[test]
    fn mark_unknown_is_not_found() {
        let q = queue();
        let err = q.mark_success(&client(), "ghost").unwrap_err();
        assert!(matches!(err, WasendError::NotFound(_)));
    }

    #[test]
    fn list_pending_is_fifo() {
        let q = queue();
        for i in 0..5 {
            q.enqueue(&client(), &format!("k{i}"), RequestKind::SendMessage,
                serde_json::json!({"i": i}), None)
                .unwrap();
        }
        q.mark_success(&client(), "k2").unwrap();

        let pending = q.list_pending(&client(), Some(RequestKind::SendMessage)).unwrap();
        let keys: Vec<&str> = pending.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k0", "k1", "k3", "k4"]);
    }

    #[test]
    fn list_due_respects_not_before() {
        let q = queue();
        let now = Utc::now();
        q.enqueue(&client(), "due", RequestKind::SendMessage, serde_json::json!({}),
            Some(now - chrono::Duration::seconds(10)))
            .unwrap();
        q.enqueue(&client(), "later", RequestKind::SendMessage, serde_json::json!({}),
            Some(now + chrono::Duration::hours(1)))
            .unwrap();

        let due = q.list_due(RequestKind::SendMessage, now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, "due");

        let deadline = q.next_deadline(RequestKind::SendMessage).unwrap().unwrap();
        assert!(deadline <= now, "nearest deadline is the overdue request");
    }

    #[test]
    fn fail_all_pending_leaves_nothing_pending() {
        let q = queue();
        for i in 0..4 {
            q.enqueue(&client(), &format!("k{i}"), RequestKind::SendMessage,
                serde_json::json!({}), None)
                .unwrap();
        }
        q.mark_success(&client(), "k0").unwrap();

        let swept = q.fail_all_pending(&client(), "session closed", "SESSION_LOST").unwrap();
        assert_eq!(swept.len(), 3);
        assert!(q.list_pending(&client(), None).unwrap().is_empty());

        // The already-successful request is untouched.
        let done = q.get(&client(), "k0").unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Success);
        let failed = q.get(&client(), "k1").unwrap().unwrap();
        assert_eq!(failed.reason.as_deref(), Some("SESSION_LOST"));
    }

    #[test]
    fn record_attempt_pushes_back() {
        let q = queue();
        let now = Utc::now();
        q.enqueue(&client(), "k", RequestKind::SendMessage, serde_json::json!({}), Some(now))
            .unwrap();

        let attempts = q
            .record_attempt(&client(), "k", now + chrono::Duration::seconds(60))
            .unwrap();
        assert_eq!(attempts, 1);
        assert!(q.list_due(RequestKind::SendMessage, now).unwrap().is_empty());
    }
}
