use fanout_core::{Error, Result, now_rfc3339};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::Metastore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Cancelled => "cancelled",
            ScheduleStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ScheduleStatus::Pending),
            "completed" => Some(ScheduleStatus::Completed),
            "cancelled" => Some(ScheduleStatus::Cancelled),
            "failed" => Some(ScheduleStatus::Failed),
            _ => None,
        }
    }
}

/// A future-dated emit. Becomes an event exactly once, when the scheduler
/// hands it to the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEmit {
    pub id: String,
    pub org_id: String,
    pub project_id: String,
    pub topic: String,
    pub payload: Value,
    pub fire_at_unix: i64,
    pub status: ScheduleStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    pub created_at: String,
}

impl ScheduledEmit {
    pub fn new(
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        topic: impl Into<String>,
        payload: Value,
        fire_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: format!("sch_{}", Uuid::new_v4().simple()),
            org_id: org_id.into(),
            project_id: project_id.into(),
            topic: topic.into(),
            payload,
            fire_at_unix: fire_at.unix_timestamp(),
            status: ScheduleStatus::Pending,
            last_error: None,
            event_id: None,
            created_at: now_rfc3339(),
        }
    }

    pub fn fire_at_rfc3339(&self) -> String {
        OffsetDateTime::from_unix_timestamp(self.fire_at_unix)
            .ok()
            .and_then(|t| t.format(&Rfc3339).ok())
            .unwrap_or_else(|| "1970-01-01T00:00:00Z".into())
    }
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledEmit> {
    let payload_json: String = row.get(4)?;
    let status: String = row.get(6)?;
    Ok(ScheduledEmit {
        id: row.get(0)?,
        org_id: row.get(1)?,
        project_id: row.get(2)?,
        topic: row.get(3)?,
        payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
        fire_at_unix: row.get(5)?,
        status: ScheduleStatus::parse(&status).unwrap_or(ScheduleStatus::Pending),
        last_error: row.get(7)?,
        event_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

const SELECT_COLS: &str =
    "id, org_id, project_id, topic, payload, fire_at_unix, status, last_error, event_id, created_at";

impl Metastore {
    pub async fn insert_schedule(&self, schedule: &ScheduledEmit) -> Result<()> {
        let row = schedule.clone();
        self.with_conn(move |conn| {
            let payload = serde_json::to_string(&row.payload).unwrap_or_else(|_| "null".into());
            conn.execute(
                "INSERT INTO schedules \
                 (id, org_id, project_id, topic, payload, fire_at_unix, status, last_error, event_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    row.id,
                    row.org_id,
                    row.project_id,
                    row.topic,
                    payload,
                    row.fire_at_unix,
                    row.status.as_str(),
                    row.last_error,
                    row.event_id,
                    row.created_at
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn get_schedule(&self, org_id: &str, id: &str) -> Result<Option<ScheduledEmit>> {
        let (org_id, id) = (org_id.to_string(), id.to_string());
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLS} FROM schedules WHERE org_id = ?1 AND id = ?2"),
                params![org_id, id],
                row_to_schedule,
            )
            .optional()
        })
        .await
    }

    pub async fn list_schedules(&self, org_id: &str) -> Result<Vec<ScheduledEmit>> {
        let org_id = org_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM schedules WHERE org_id = ?1 ORDER BY fire_at_unix"
            ))?;
            let rows = stmt.query_map(params![org_id], row_to_schedule)?;
            rows.collect()
        })
        .await
    }

    /// Pending rows due at or before `now`, across all tenants: the
    /// scheduler's poll read.
    pub async fn due_schedules(&self, now_unix: i64, limit: usize) -> Result<Vec<ScheduledEmit>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLS} FROM schedules \
                 WHERE status = 'pending' AND fire_at_unix <= ?1 \
                 ORDER BY fire_at_unix LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now_unix, limit as i64], row_to_schedule)?;
            rows.collect()
        })
        .await
    }

    /// pending → completed, recording the produced event id. The status
    /// guard makes the fire path race-safe against cancel.
    pub async fn mark_schedule_completed(&self, id: &str, event_id: &str) -> Result<bool> {
        let (id, event_id) = (id.to_string(), event_id.to_string());
        let affected = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE schedules SET status = 'completed', event_id = ?2 \
                     WHERE id = ?1 AND status = 'pending'",
                    params![id, event_id],
                )
            })
            .await?;
        Ok(affected > 0)
    }

    pub async fn mark_schedule_failed(&self, id: &str, error: &str) -> Result<bool> {
        let (id, error) = (id.to_string(), error.to_string());
        let affected = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE schedules SET status = 'failed', last_error = ?2 \
                     WHERE id = ?1 AND status = 'pending'",
                    params![id, error],
                )
            })
            .await?;
        Ok(affected > 0)
    }

    /// pending → cancelled under the row guard; a row in any other state
    /// surfaces `Conflict`, a missing row `NotFound`.
    pub async fn cancel_schedule(&self, org_id: &str, id: &str) -> Result<()> {
        {
            let (org_id, id) = (org_id.to_string(), id.to_string());
            let affected = self
                .with_conn(move |conn| {
                    conn.execute(
                        "UPDATE schedules SET status = 'cancelled' \
                         WHERE org_id = ?1 AND id = ?2 AND status = 'pending'",
                        params![org_id, id],
                    )
                })
                .await?;
            if affected > 0 {
                return Ok(());
            }
        }
        match self.get_schedule(org_id, id).await? {
            Some(row) => Err(Error::conflict(format!(
                "schedule is {}, not pending",
                row.status.as_str()
            ))),
            None => Err(Error::not_found("schedule")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(org: &str, fire_at: OffsetDateTime) -> ScheduledEmit {
        ScheduledEmit::new(org, "web", "promo.now", json!({"pct": 10}), fire_at)
    }

    #[tokio::test]
    async fn due_query_only_returns_ripe_pending_rows() {
        let store = Metastore::open_in_memory().unwrap();
        let now = OffsetDateTime::now_utc();
        let ripe = sample("acme", now - time::Duration::seconds(5));
        let future = sample("acme", now + time::Duration::hours(1));
        store.insert_schedule(&ripe).await.unwrap();
        store.insert_schedule(&future).await.unwrap();

        let due = store
            .due_schedules(now.unix_timestamp(), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, ripe.id);
    }

    #[tokio::test]
    async fn completion_is_guarded_by_pending() {
        let store = Metastore::open_in_memory().unwrap();
        let row = sample("acme", OffsetDateTime::now_utc());
        store.insert_schedule(&row).await.unwrap();

        assert!(
            store
                .mark_schedule_completed(&row.id, "evt_1")
                .await
                .unwrap()
        );
        // A second completion (or a late failure) loses the race.
        assert!(
            !store
                .mark_schedule_completed(&row.id, "evt_2")
                .await
                .unwrap()
        );
        assert!(!store.mark_schedule_failed(&row.id, "late").await.unwrap());

        let fetched = store.get_schedule("acme", &row.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ScheduleStatus::Completed);
        assert_eq!(fetched.event_id.as_deref(), Some("evt_1"));
    }

    #[tokio::test]
    async fn cancel_transitions_and_conflicts() {
        let store = Metastore::open_in_memory().unwrap();
        let row = sample("acme", OffsetDateTime::now_utc());
        store.insert_schedule(&row).await.unwrap();

        store.cancel_schedule("acme", &row.id).await.unwrap();
        let err = store.cancel_schedule("acme", &row.id).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
        let err = store.cancel_schedule("acme", "sch_nope").await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn foreign_tenant_cannot_see_or_cancel() {
        let store = Metastore::open_in_memory().unwrap();
        let row = sample("acme", OffsetDateTime::now_utc());
        store.insert_schedule(&row).await.unwrap();
        assert!(store.get_schedule("rival", &row.id).await.unwrap().is_none());
        let err = store.cancel_schedule("rival", &row.id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn fire_at_renders_rfc3339() {
        let at = OffsetDateTime::from_unix_timestamp(1_764_000_000).unwrap();
        let row = sample("acme", at);
        assert!(row.fire_at_rfc3339().ends_with('Z'));
    }
}
