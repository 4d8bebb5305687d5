//! Relational metadata behind the engine: bearer tokens, projects, webhook
//! subscriptions, the delivery ledger and scheduled emits. A single SQLite
//! connection serves the whole process; every call hops onto the blocking
//! pool so the async loops never touch the database directly.

mod ledger;
mod schedules;
mod tokens;
mod webhooks;

use std::path::Path;
use std::sync::{Arc, Mutex};

use fanout_core::{Error, Result};
use rusqlite::Connection;

pub use ledger::StatusCount;
pub use schedules::{ScheduleStatus, ScheduledEmit};
pub use tokens::{Project, TokenRecord};
pub use webhooks::WebhookSubscription;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tokens (
    token TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS projects (
    org_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (org_id, project_id)
);
CREATE TABLE IF NOT EXISTS webhook_subscriptions (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    url TEXT NOT NULL,
    topics TEXT NOT NULL,
    secret TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_webhooks_org ON webhook_subscriptions (org_id, active);
CREATE TABLE IF NOT EXISTS delivery_attempts (
    event_id TEXT NOT NULL,
    org_id TEXT NOT NULL,
    receiver_type TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    status TEXT NOT NULL,
    error TEXT,
    created_at TEXT NOT NULL,
    acked_at TEXT,
    PRIMARY KEY (event_id, receiver_type, receiver_id, attempt)
);
CREATE INDEX IF NOT EXISTS idx_attempts_event ON delivery_attempts (event_id);
CREATE INDEX IF NOT EXISTS idx_attempts_org ON delivery_attempts (org_id, created_at);
CREATE TABLE IF NOT EXISTS schedules (
    id TEXT PRIMARY KEY,
    org_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    payload TEXT NOT NULL,
    fire_at_unix INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    last_error TEXT,
    event_id TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules (status, fire_at_unix);
"#;

#[derive(Clone)]
pub struct Metastore {
    conn: Arc<Mutex<Connection>>,
}

impl Metastore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::upstream)?;
        Self::with_connection(conn)
    }

    /// In-memory store, used by tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::upstream)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL).map_err(Error::upstream)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) async fn with_conn<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("metastore mutex poisoned");
            func(&guard)
        })
        .await
        .map_err(Error::upstream)?
        .map_err(Error::upstream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");

        {
            let store = Metastore::open(&path).unwrap();
            store.insert_token("tok_a", "acme", "web").await.unwrap();
        }

        let store = Metastore::open(&path).unwrap();
        let record = store.resolve_token("tok_a").await.unwrap().unwrap();
        assert_eq!(record.org_id, "acme");
    }
}
