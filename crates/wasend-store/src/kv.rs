//! Per-tenant key/value store for session state, tokens, and small
//! serialized blobs. A key holds either a string or a structured object,
//! never both; writing one kind clears the other.

use std::sync::Arc;

use chrono::Utc;
use wasend_core::{ClientId, Result, WasendError};

use crate::db::StoreDb;

const KIND_STRING: &str = "string";
const KIND_OBJECT: &str = "object";

/// Tenant-scoped KV storage. Last write wins on concurrent writers.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<StoreDb>,
}

impl SessionStore {
    pub fn new(db: Arc<StoreDb>) -> Self {
        Self { db }
    }

    pub fn get_string(&self, client_id: &ClientId, key: &str) -> Result<String> {
        let row = self.get_raw(client_id, key)?;
        match row {
            Some((kind, value)) if kind == KIND_STRING => Ok(value),
            _ => Err(WasendError::not_found(format!("{client_id}/{key}"))),
        }
    }

    pub fn set_string(&self, client_id: &ClientId, key: &str, value: &str) -> Result<()> {
        self.set_raw(client_id, key, KIND_STRING, value)
    }

    pub fn get_object(&self, client_id: &ClientId, key: &str) -> Result<serde_json::Value> {
        let row = self.get_raw(client_id, key)?;
        match row {
            Some((kind, value)) if kind == KIND_OBJECT => serde_json::from_str(&value)
                .map_err(|e| WasendError::storage(format!("corrupt object at {client_id}/{key}: {e}"))),
            _ => Err(WasendError::not_found(format!("{client_id}/{key}"))),
        }
    }

    pub fn set_object(
        &self,
        client_id: &ClientId,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<()> {
        self.set_raw(client_id, key, KIND_OBJECT, &value.to_string())
    }

    pub fn delete(&self, client_id: &ClientId, key: &str) -> Result<()> {
        let client = client_id.to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM session_store WHERE client_id = ?1 AND key = ?2",
                rusqlite::params![client, key],
            )?;
            Ok(())
        })
    }

    /// Tenants that currently have a value under `key`. Used for boot-time
    /// session replay.
    pub fn clients_with_key(&self, key: &str) -> Result<Vec<ClientId>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT client_id FROM session_store WHERE key = ?1 ORDER BY client_id",
            )?;
            let rows = stmt.query_map([key], |row| row.get::<_, String>(0))?;
            rows.map(|r| r.map(ClientId::new)).collect()
        })
    }

    fn get_raw(&self, client_id: &ClientId, key: &str) -> Result<Option<(String, String)>> {
        let client = client_id.to_string();
        self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT kind, value FROM session_store WHERE client_id = ?1 AND key = ?2",
                    rusqlite::params![client, key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some);
            match row {
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                other => other,
            }
        })
    }

    fn set_raw(&self, client_id: &ClientId, key: &str, kind: &str, value: &str) -> Result<()> {
        let client = client_id.to_string();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session_store (client_id, key, kind, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![client, key, kind, value, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(StoreDb::open_in_memory().unwrap()))
    }

    #[test]
    fn string_round_trip() {
        let store = store();
        let client = ClientId::from("t1");
        store.set_string(&client, "token", "abc123").unwrap();
        assert_eq!(store.get_string(&client, "token").unwrap(), "abc123");
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = store();
        let err = store.get_string(&ClientId::from("t1"), "nope").unwrap_err();
        assert!(matches!(err, WasendError::NotFound(_)));
    }

    #[test]
    fn kinds_are_mutually_exclusive() {
        let store = store();
        let client = ClientId::from("t1");
        store.set_string(&client, "state", "plain").unwrap();
        store
            .set_object(&client, "state", &serde_json::json!({"linked": true}))
            .unwrap();

        // The object write cleared the string.
        assert!(matches!(
            store.get_string(&client, "state"),
            Err(WasendError::NotFound(_))
        ));
        assert_eq!(
            store.get_object(&client, "state").unwrap()["linked"],
            serde_json::json!(true)
        );

        // And back again.
        store.set_string(&client, "state", "plain2").unwrap();
        assert!(matches!(
            store.get_object(&client, "state"),
            Err(WasendError::NotFound(_))
        ));
    }

    #[test]
    fn tenants_do_not_collide() {
        let store = store();
        store.set_string(&ClientId::from("a"), "k", "va").unwrap();
        store.set_string(&ClientId::from("b"), "k", "vb").unwrap();
        assert_eq!(store.get_string(&ClientId::from("a"), "k").unwrap(), "va");
        assert_eq!(store.get_string(&ClientId::from("b"), "k").unwrap(), "vb");

        let clients = store.clients_with_key("k").unwrap();
        assert_eq!(clients.len(), 2);
    }
}
