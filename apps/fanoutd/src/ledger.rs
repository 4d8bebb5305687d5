//! The ledger write path. Session loops and webhook workers never touch
//! the metastore directly; they enqueue onto a bounded channel drained by
//! one writer task. A full queue blocks the producer: the ledger is the
//! source of truth for delivery, so slowing down beats dropping rows.

use fanout_core::{DeliveryAttempt, DeliveryStatus, ReceiverType};
use fanout_metastore::Metastore;
use fanout_telemetry::{TelemetryLabels, record_counter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
enum LedgerOp {
    Record(DeliveryAttempt),
    UpdateStatus {
        event_id: String,
        receiver_type: ReceiverType,
        receiver_id: String,
        attempt: u32,
        status: DeliveryStatus,
        error: Option<String>,
    },
}

/// Cheap clonable sender handed to every producer.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerOp>,
}

impl LedgerHandle {
    pub async fn record(&self, attempt: DeliveryAttempt) {
        let org = attempt.org_id.clone();
        if self.tx.send(LedgerOp::Record(attempt)).await.is_err() {
            warn!(org, "ledger writer gone, attempt row lost");
        }
    }

    pub async fn update_status(
        &self,
        event_id: &str,
        receiver_type: ReceiverType,
        receiver_id: &str,
        attempt: u32,
        status: DeliveryStatus,
        error: Option<String>,
    ) {
        let op = LedgerOp::UpdateStatus {
            event_id: event_id.to_string(),
            receiver_type,
            receiver_id: receiver_id.to_string(),
            attempt,
            status,
            error,
        };
        if self.tx.send(op).await.is_err() {
            warn!(event_id, "ledger writer gone, status update lost");
        }
    }
}

/// Spawns the single writer task. The returned handle back-pressures
/// producers once `capacity` ops are queued.
pub fn spawn_ledger_writer(meta: Metastore, capacity: usize) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel(capacity);
    let task = tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            match op {
                LedgerOp::Record(attempt) => {
                    let labels = TelemetryLabels::tenant(attempt.org_id.clone())
                        .push("receiver", attempt.receiver_type.as_str());
                    if let Err(err) = meta.record_attempt(&attempt).await {
                        error!(
                            event_id = %attempt.event_id,
                            error = %err,
                            "failed to record delivery attempt"
                        );
                    } else {
                        record_counter("ledger_attempts_recorded", 1, &labels);
                    }
                }
                LedgerOp::UpdateStatus {
                    event_id,
                    receiver_type,
                    receiver_id,
                    attempt,
                    status,
                    error,
                } => {
                    match meta
                        .update_attempt_status(
                            &event_id,
                            receiver_type,
                            &receiver_id,
                            attempt,
                            status,
                            error,
                        )
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            event_id,
                            attempt, "status update matched no ledger row"
                        ),
                        Err(err) => error!(
                            event_id,
                            error = %err,
                            "failed to update delivery status"
                        ),
                    }
                }
            }
        }
    });
    (LedgerHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_core::DeliveryAttempt;

    #[tokio::test]
    async fn writer_drains_records_and_updates() {
        let meta = Metastore::open_in_memory().unwrap();
        let (handle, task) = spawn_ledger_writer(meta.clone(), 8);

        handle
            .record(DeliveryAttempt::delivered(
                "evt_1",
                "acme",
                ReceiverType::Websocket,
                "sess-1",
                1,
            ))
            .await;
        handle
            .update_status(
                "evt_1",
                ReceiverType::Websocket,
                "sess-1",
                1,
                DeliveryStatus::Acked,
                None,
            )
            .await;

        drop(handle);
        task.await.unwrap();

        let rows = meta.list_attempts("evt_1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, DeliveryStatus::Acked);
    }

    #[tokio::test]
    async fn update_for_unknown_row_is_not_fatal() {
        let meta = Metastore::open_in_memory().unwrap();
        let (handle, task) = spawn_ledger_writer(meta.clone(), 8);
        handle
            .update_status(
                "evt_ghost",
                ReceiverType::Webhook,
                "wh-1",
                1,
                DeliveryStatus::Acked,
                None,
            )
            .await;
        drop(handle);
        task.await.unwrap();
        assert!(meta.list_attempts("evt_ghost").await.unwrap().is_empty());
    }
}
