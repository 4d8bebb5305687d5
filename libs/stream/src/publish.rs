//! The only write path into a tenant's event stream.

use std::sync::Arc;
use std::time::Duration;

use async_nats::HeaderMap;
use async_nats::jetstream::Context as JsContext;
use fanout_core::{
    Error, Event, Result, subjects,
    validate::{validate_identifier, validate_payload_size, validate_topic},
};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::registry::StreamRegistry;

const RETRY_DELAY: Duration = Duration::from_millis(100);
const MSG_ID_HEADER: &str = "Nats-Msg-Id";

/// Outcome of a successful emit: the event id and the sequence the log
/// assigned. `duplicate` marks an append swallowed by the dedup window.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub id: String,
    pub sequence: u64,
    pub duplicate: bool,
}

pub struct Publisher {
    js: JsContext,
    registry: Arc<StreamRegistry>,
    max_payload: usize,
}

impl Publisher {
    pub fn new(registry: Arc<StreamRegistry>, max_payload: usize) -> Self {
        Self {
            js: registry.context().clone(),
            registry,
            max_payload,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Validates, stamps and appends one event. The client-supplied id
    /// doubles as the dedup key: a repeat within the log's duplicate window
    /// returns the original sequence without a second append.
    pub async fn emit(
        &self,
        org: &str,
        project: &str,
        topic: &str,
        data: Value,
        client_id: Option<&str>,
    ) -> Result<EmittedEvent> {
        validate_identifier(org, "org")?;
        validate_identifier(project, "project")?;
        validate_topic(topic)?;

        let event = Event::new(org, project, topic, data, client_id);
        let dedup = format!("{org}:{}", event.id);
        self.append(&event, &dedup).await
    }

    /// Re-appends an existing envelope (the DLQ replay path). The caller has
    /// already reset the attempt counter; a fresh dedup id keeps the replay
    /// from being swallowed by the original emit's window.
    pub async fn replay(&self, event: &Event) -> Result<EmittedEvent> {
        validate_topic(&event.topic)?;
        let dedup = format!("replay:{}", Uuid::new_v4().simple());
        self.append(event, &dedup).await
    }

    async fn append(&self, event: &Event, dedup: &str) -> Result<EmittedEvent> {
        let payload = serde_json::to_vec(event)
            .map_err(|err| Error::invalid(format!("payload not serializable: {err}")))?;
        validate_payload_size(payload.len(), self.max_payload)?;

        self.registry.ensure(&event.org_id).await?;
        let subject = subjects::event_subject(&event.org_id, &event.project_id, &event.topic);

        let mut headers = HeaderMap::new();
        headers.insert(MSG_ID_HEADER, dedup);

        match self.try_append(&subject, &headers, &payload).await {
            Ok(emitted) => Ok(self.finish(event, emitted)),
            Err(first) => {
                warn!(
                    subject = %subject,
                    error = %first,
                    "append failed, retrying once"
                );
                tokio::time::sleep(RETRY_DELAY).await;
                let emitted = self
                    .try_append(&subject, &headers, &payload)
                    .await
                    .map_err(Error::Upstream)?;
                Ok(self.finish(event, emitted))
            }
        }
    }

    async fn try_append(
        &self,
        subject: &str,
        headers: &HeaderMap,
        payload: &[u8],
    ) -> std::result::Result<(u64, bool), String> {
        let ack = self
            .js
            .publish_with_headers(
                subject.to_string(),
                headers.clone(),
                payload.to_vec().into(),
            )
            .await
            .map_err(|err| err.to_string())?
            .await
            .map_err(|err| err.to_string())?;
        Ok((ack.sequence, ack.duplicate))
    }

    fn finish(&self, event: &Event, (sequence, duplicate): (u64, bool)) -> EmittedEvent {
        debug!(
            org = %event.org_id,
            topic = %event.topic,
            id = %event.id,
            sequence,
            duplicate,
            "event appended"
        );
        EmittedEvent {
            id: event.id.clone(),
            sequence,
            duplicate,
        }
    }
}
