//! The delivery ledger: one row per attempted delivery, flipped exactly
//! once to a terminal status. This table is the source of truth for "did
//! this event get delivered", so writes are never dropped; the engine
//! back-pressures instead (see the ledger writer task in fanoutd).

use fanout_core::{DeliveryAttempt, DeliveryStatus, ReceiverType, Result, now_rfc3339};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::Metastore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: DeliveryStatus,
    pub count: u64,
}

impl Metastore {
    /// Appends one attempt row. Re-recording the same (event, receiver,
    /// attempt) overwrites in place, which keeps redelivered fetches from
    /// piling up duplicate rows.
    pub async fn record_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
        let row = attempt.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO delivery_attempts \
                 (event_id, org_id, receiver_type, receiver_id, attempt, status, error, created_at, acked_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.event_id,
                    row.org_id,
                    row.receiver_type.as_str(),
                    row.receiver_id,
                    row.attempt,
                    row.status.as_str(),
                    row.error,
                    row.created_at,
                    row.acked_at
                ],
            )
            .map(|_| ())
        })
        .await
    }

    /// Flips the status of an existing attempt row. `acked_at` is stamped
    /// when the row reaches `acked`.
    pub async fn update_attempt_status(
        &self,
        event_id: &str,
        receiver_type: ReceiverType,
        receiver_id: &str,
        attempt: u32,
        status: DeliveryStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let (event_id, receiver_id) = (event_id.to_string(), receiver_id.to_string());
        let acked_at = matches!(status, DeliveryStatus::Acked).then(now_rfc3339);
        let affected = self
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE delivery_attempts \
                     SET status = ?5, error = COALESCE(?6, error), acked_at = COALESCE(?7, acked_at) \
                     WHERE event_id = ?1 AND receiver_type = ?2 AND receiver_id = ?3 AND attempt = ?4",
                    params![
                        event_id,
                        receiver_type.as_str(),
                        receiver_id,
                        attempt,
                        status.as_str(),
                        error,
                        acked_at
                    ],
                )
            })
            .await?;
        Ok(affected > 0)
    }

    pub async fn list_attempts(&self, event_id: &str) -> Result<Vec<DeliveryAttempt>> {
        let event_id = event_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT event_id, org_id, receiver_type, receiver_id, attempt, status, error, created_at, acked_at \
                 FROM delivery_attempts WHERE event_id = ?1 \
                 ORDER BY receiver_type, receiver_id, attempt",
            )?;
            let rows = stmt.query_map(params![event_id], |row| {
                let receiver_type: String = row.get(2)?;
                let status: String = row.get(5)?;
                Ok(DeliveryAttempt {
                    event_id: row.get(0)?,
                    org_id: row.get(1)?,
                    receiver_type: ReceiverType::parse(&receiver_type)
                        .unwrap_or(ReceiverType::Websocket),
                    receiver_id: row.get(3)?,
                    attempt: row.get(4)?,
                    status: DeliveryStatus::parse(&status).unwrap_or(DeliveryStatus::Delivered),
                    error: row.get(6)?,
                    created_at: row.get(7)?,
                    acked_at: row.get(8)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Attempt counts per status for one tenant since a lower bound
    /// (Rfc3339 ordering is lexicographic for UTC timestamps).
    pub async fn count_attempts_by_status(
        &self,
        org_id: &str,
        since: &str,
    ) -> Result<Vec<StatusCount>> {
        let (org_id, since) = (org_id.to_string(), since.to_string());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM delivery_attempts \
                 WHERE org_id = ?1 AND created_at >= ?2 GROUP BY status",
            )?;
            let rows = stmt.query_map(params![org_id, since], |row| {
                let status: String = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((status, count))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (status, count) = row?;
                if let Some(status) = DeliveryStatus::parse(&status) {
                    out.push(StatusCount {
                        status,
                        count: count.max(0) as u64,
                    });
                }
            }
            Ok(out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn attempt_lifecycle() {
        let store = Metastore::open_in_memory().unwrap();
        let row = DeliveryAttempt::delivered("evt_1", "acme", ReceiverType::Websocket, "sess-1", 1);
        store.record_attempt(&row).await.unwrap();

        let updated = store
            .update_attempt_status(
                "evt_1",
                ReceiverType::Websocket,
                "sess-1",
                1,
                DeliveryStatus::Acked,
                None,
            )
            .await
            .unwrap();
        assert!(updated);

        let attempts = store.list_attempts("evt_1").await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, DeliveryStatus::Acked);
        assert!(attempts[0].acked_at.is_some());
    }

    #[tokio::test]
    async fn update_of_missing_row_reports_false() {
        let store = Metastore::open_in_memory().unwrap();
        let updated = store
            .update_attempt_status(
                "evt_missing",
                ReceiverType::Webhook,
                "wh-1",
                1,
                DeliveryStatus::Acked,
                None,
            )
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn rerecorded_attempt_does_not_duplicate() {
        let store = Metastore::open_in_memory().unwrap();
        let row = DeliveryAttempt::delivered("evt_1", "acme", ReceiverType::Webhook, "wh-1", 2);
        store.record_attempt(&row).await.unwrap();
        store.record_attempt(&row).await.unwrap();
        assert_eq!(store.list_attempts("evt_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn counts_group_by_status_per_tenant() {
        let store = Metastore::open_in_memory().unwrap();
        for (event, org, status) in [
            ("evt_1", "acme", DeliveryStatus::Acked),
            ("evt_2", "acme", DeliveryStatus::Acked),
            ("evt_3", "acme", DeliveryStatus::Dlq),
            ("evt_4", "globex", DeliveryStatus::Acked),
        ] {
            let mut row =
                DeliveryAttempt::delivered(event, org, ReceiverType::Webhook, "wh-1", 1);
            row.status = status;
            store.record_attempt(&row).await.unwrap();
        }
        let mut counts = store
            .count_attempts_by_status("acme", "1970-01-01T00:00:00Z")
            .await
            .unwrap();
        counts.sort_by_key(|c| c.status.as_str());
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].status, DeliveryStatus::Acked);
        assert_eq!(counts[0].count, 2);
        assert_eq!(counts[1].status, DeliveryStatus::Dlq);
        assert_eq!(counts[1].count, 1);
    }
}
