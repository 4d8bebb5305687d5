//! Dead-letter bookkeeping. A record lands here only after a delivery chain
//! exhausts its retry budget; the embedded payload stays byte-identical to
//! the original emit so a replay reconstructs the event exactly.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy, pull::Config as PullConfig};
use fanout_core::{Error, Event, Result, now_rfc3339, subjects};
use fanout_stream::{EmittedEvent, Publisher, registry::StreamRegistry};
use futures::TryStreamExt;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

const LIST_BATCH: usize = 256;
const FETCH_EXPIRES: Duration = Duration::from_secs(1);

/// Payload stored for each dead-lettered event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DlqRecord {
    pub id: String,
    pub org_id: String,
    pub project_id: String,
    pub original_topic: String,
    pub data: Value,
    pub timestamp: String,
    pub failed_at: String,
    pub attempts: u32,
    pub last_error: String,
    #[serde(default)]
    pub consumer_group: Option<String>,
}

impl DlqRecord {
    /// Wraps a failed event with its failure context.
    pub fn from_failure(
        event: &Event,
        attempts: u32,
        last_error: impl Into<String>,
        consumer_group: Option<String>,
    ) -> Self {
        Self {
            id: event.id.clone(),
            org_id: event.org_id.clone(),
            project_id: event.project_id.clone(),
            original_topic: event.topic.clone(),
            data: event.data.clone(),
            timestamp: event.timestamp.clone(),
            failed_at: now_rfc3339(),
            attempts,
            last_error: last_error.into(),
            consumer_group,
        }
    }

    /// Reconstructs the original event with the attempt counter reset, the
    /// shape a replay re-enters the publish path with.
    pub fn to_event(&self) -> Event {
        Event {
            id: self.id.clone(),
            org_id: self.org_id.clone(),
            project_id: self.project_id.clone(),
            topic: self.original_topic.clone(),
            data: self.data.clone(),
            timestamp: self.timestamp.clone(),
            attempt: 1,
        }
    }
}

/// A record read back from the DLQ stream with its sequence.
#[derive(Debug, Clone)]
pub struct DlqEntry {
    pub record: DlqRecord,
    pub sequence: u64,
}

pub struct DlqStore {
    registry: Arc<StreamRegistry>,
}

impl DlqStore {
    pub fn new(registry: Arc<StreamRegistry>) -> Self {
        Self { registry }
    }

    /// Synchronously appends one record to the tenant's DLQ log.
    pub async fn publish(&self, record: &DlqRecord) -> Result<u64> {
        self.registry.ensure(&record.org_id).await?;
        let subject = subjects::dlq_subject(
            &record.org_id,
            &record.project_id,
            &record.original_topic,
        );
        let payload = serde_json::to_vec(record)
            .map_err(|err| Error::invalid(format!("dlq record not serializable: {err}")))?;
        let ack = self
            .registry
            .context()
            .publish(subject.clone(), payload.into())
            .await
            .map_err(Error::upstream)?
            .await
            .map_err(Error::upstream)?;
        info!(
            org = %record.org_id,
            topic = %record.original_topic,
            id = %record.id,
            attempts = record.attempts,
            sequence = ack.sequence,
            "dlq entry published"
        );
        Ok(ack.sequence)
    }

    /// Drains up to `limit` records through a throwaway ack-none consumer.
    pub async fn list(
        &self,
        org: &str,
        project: Option<&str>,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DlqEntry>> {
        let filter = match project {
            Some(project) => subjects::dlq_project_filter(org, project, topic),
            None => subjects::dlq_filter(org),
        };
        let stream = self.registry.dlq_stream(org).await?;
        let consumer = stream
            .create_consumer(PullConfig {
                name: Some(format!("dlq-list-{}", nanoid!(6))),
                deliver_policy: DeliverPolicy::All,
                ack_policy: AckPolicy::None,
                filter_subject: filter,
                inactive_threshold: Duration::from_secs(30),
                ..Default::default()
            })
            .await
            .map_err(Error::upstream)?;

        let mut messages = consumer
            .fetch()
            .max_messages(limit)
            .expires(FETCH_EXPIRES)
            .messages()
            .await
            .map_err(Error::upstream)?;
        let mut out = Vec::new();
        while let Some(msg) = messages.try_next().await.map_err(Error::upstream)? {
            let sequence = msg.info().map(|info| info.stream_sequence).unwrap_or(0);
            match serde_json::from_slice::<DlqRecord>(&msg.payload) {
                Ok(record) => out.push(DlqEntry { record, sequence }),
                Err(err) => warn!(org, sequence, error = %err, "skipping unparseable dlq record"),
            }
        }
        Ok(out)
    }

    /// Direct indexed fetch of one record.
    pub async fn get(&self, org: &str, sequence: u64) -> Result<DlqEntry> {
        let stream = self.registry.dlq_stream(org).await?;
        let message = stream
            .direct_get(sequence)
            .await
            .map_err(|_| Error::not_found(format!("dlq entry {sequence}")))?;
        let record = serde_json::from_slice::<DlqRecord>(&message.payload)
            .map_err(|_| Error::not_found(format!("dlq entry {sequence}")))?;
        Ok(DlqEntry { record, sequence })
    }

    /// Unconditionally drops one record.
    pub async fn delete(&self, org: &str, sequence: u64) -> Result<()> {
        let stream = self.registry.dlq_stream(org).await?;
        match stream.delete_message(sequence).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::not_found(format!("dlq entry {sequence}"))),
            Err(_) => Err(Error::not_found(format!("dlq entry {sequence}"))),
        }
    }

    /// Re-emits the original event through the Publisher (attempt reset to
    /// one) and deletes the DLQ entry iff the re-emit succeeded.
    pub async fn replay(
        &self,
        org: &str,
        sequence: u64,
        publisher: &Publisher,
    ) -> Result<EmittedEvent> {
        let entry = self.get(org, sequence).await?;
        let event = entry.record.to_event();
        let emitted = publisher.replay(&event).await?;
        self.delete(org, sequence).await?;
        info!(
            org,
            id = %emitted.id,
            from_sequence = sequence,
            to_sequence = emitted.sequence,
            "dlq entry replayed"
        );
        Ok(emitted)
    }

    /// Replays every record for the tenant; returns how many were re-emitted.
    pub async fn replay_all(&self, org: &str, publisher: &Publisher) -> Result<u64> {
        let mut replayed = 0u64;
        loop {
            let entries = self.list(org, None, None, LIST_BATCH).await?;
            if entries.is_empty() {
                return Ok(replayed);
            }
            for entry in entries {
                self.replay(org, entry.sequence, publisher).await?;
                replayed += 1;
            }
        }
    }

    /// Deletes all records for the tenant (optionally one project) by
    /// subject filter.
    pub async fn purge(&self, org: &str, project: Option<&str>) -> Result<u64> {
        let filter = match project {
            Some(project) => subjects::dlq_project_filter(org, project, None),
            None => subjects::dlq_filter(org),
        };
        let stream = self.registry.dlq_stream(org).await?;
        let response = stream
            .purge()
            .filter(filter)
            .await
            .map_err(Error::upstream)?;
        Ok(response.purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> Event {
        Event {
            id: "evt_1".into(),
            org_id: "acme".into(),
            project_id: "web".into(),
            topic: "orders.created".into(),
            data: json!({"amount": 42}),
            timestamp: "2026-01-01T00:00:00Z".into(),
            attempt: 6,
        }
    }

    #[test]
    fn from_failure_copies_payload_untouched() {
        let event = sample_event();
        let record = DlqRecord::from_failure(&event, 6, "http 500", Some("billing".into()));
        assert_eq!(record.data, event.data);
        assert_eq!(record.original_topic, "orders.created");
        assert_eq!(record.attempts, 6);
        assert_eq!(record.last_error, "http 500");
        assert_eq!(record.consumer_group.as_deref(), Some("billing"));
    }

    #[test]
    fn to_event_resets_the_attempt_counter() {
        let event = sample_event();
        let record = DlqRecord::from_failure(&event, 6, "http 500", None);
        let replayed = record.to_event();
        assert_eq!(replayed.attempt, 1);
        assert_eq!(replayed.id, event.id);
        assert_eq!(replayed.topic, event.topic);
        assert_eq!(replayed.data, event.data);
    }

    #[test]
    fn record_roundtrips_json() {
        let record = DlqRecord::from_failure(&sample_event(), 3, "timeout", None);
        let raw = serde_json::to_string(&record).expect("serialize");
        let parsed: DlqRecord = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, record);
        assert!(raw.contains("\"original_topic\":\"orders.created\""));
        assert!(raw.contains("\"last_error\":\"timeout\""));
    }
}
