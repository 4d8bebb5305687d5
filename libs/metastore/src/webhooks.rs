use fanout_core::{Error, Result, now_rfc3339};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Metastore;

/// One outbound webhook endpoint. Lifecycle is owned here; the engine
/// materializes one durable consumer per active row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookSubscription {
    pub id: String,
    pub org_id: String,
    pub project_id: String,
    pub url: String,
    pub topics: Vec<String>,
    pub secret: String,
    pub active: bool,
    pub created_at: String,
}

impl WebhookSubscription {
    pub fn new(
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        url: impl Into<String>,
        topics: Vec<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("whs_{}", Uuid::new_v4().simple()),
            org_id: org_id.into(),
            project_id: project_id.into(),
            url: url.into(),
            topics,
            secret: secret.into(),
            active: true,
            created_at: now_rfc3339(),
        }
    }
}

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookSubscription> {
    let topics_json: String = row.get(4)?;
    Ok(WebhookSubscription {
        id: row.get(0)?,
        org_id: row.get(1)?,
        project_id: row.get(2)?,
        url: row.get(3)?,
        topics: serde_json::from_str(&topics_json).unwrap_or_default(),
        secret: row.get(5)?,
        active: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
    })
}

const SELECT_COLS: &str =
    "id, org_id, project_id, url, topics, secret, active, created_at";

impl Metastore {
    pub async fn insert_webhook(&self, sub: &WebhookSubscription) -> Result<()> {
        let sub = sub.clone();
        self.with_conn(move |conn| {
            let topics = serde_json::to_string(&sub.topics).unwrap_or_else(|_| "[]".into());
            conn.execute(
                "INSERT OR REPLACE INTO webhook_subscriptions \
                 (id, org_id, project_id, url, topics, secret, active, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    sub.id,
                    sub.org_id,
                    sub.project_id,
                    sub.url,
                    topics,
                    sub.secret,
                    sub.active as i64,
                    sub.created_at
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn get_webhook(&self, org_id: &str, id: &str) -> Result<Option<WebhookSubscription>> {
        let (org_id, id) = (org_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {SELECT_COLS} FROM webhook_subscriptions \
                     WHERE org_id = ?1 AND id = ?2"
                ),
                params![org_id, id],
                row_to_subscription,
            )
            .optional()
        })
        .await
    }

    /// Active rows for one tenant, the worker's boot and reconcile read.
    pub async fn list_webhooks(
        &self,
        org_id: &str,
        only_active: bool,
    ) -> Result<Vec<WebhookSubscription>> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let sql = if only_active {
                format!(
                    "SELECT {SELECT_COLS} FROM webhook_subscriptions \
                     WHERE org_id = ?1 AND active = 1 ORDER BY created_at"
                )
            } else {
                format!(
                    "SELECT {SELECT_COLS} FROM webhook_subscriptions \
                     WHERE org_id = ?1 ORDER BY created_at"
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![org_id], row_to_subscription)?;
            rows.collect()
        })
        .await
    }

    /// Tenants that need a webhook worker at boot.
    pub async fn orgs_with_active_webhooks(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT org_id FROM webhook_subscriptions WHERE active = 1",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }

    pub async fn set_webhook_active(&self, org_id: &str, id: &str, active: bool) -> Result<()> {
        let (org_id, id) = (org_id.to_string(), id.to_string());
        let affected = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE webhook_subscriptions SET active = ?3 \
                     WHERE org_id = ?1 AND id = ?2",
                    params![org_id, id, active as i64],
                )
            })
            .await?;
        if affected == 0 {
            return Err(Error::not_found("webhook subscription"));
        }
        Ok(())
    }

    pub async fn delete_webhook(&self, org_id: &str, id: &str) -> Result<()> {
        let (org_id, id) = (org_id.to_string(), id.to_string());
        let affected = self
            .with_conn(move |conn| {
                conn.execute(
                    "DELETE FROM webhook_subscriptions WHERE org_id = ?1 AND id = ?2",
                    params![org_id, id],
                )
            })
            .await?;
        if affected == 0 {
            return Err(Error::not_found("webhook subscription"));
        }
        Ok(())
    }
}
