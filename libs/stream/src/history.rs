//! Read-only, time/sequence-bounded access to a tenant's event stream.

use std::sync::Arc;
use std::time::Duration;

use fanout_core::{Error, Event, Result, pattern::validate_pattern, subjects};
use futures::TryStreamExt;
use time::OffsetDateTime;
use tracing::debug;

use crate::{StoredEvent, consumer::ConsumerFactory, registry::StreamRegistry};

const FETCH_BATCH: usize = 100;
const FETCH_EXPIRES: Duration = Duration::from_secs(1);

pub struct HistoryReader {
    registry: Arc<StreamRegistry>,
    factory: ConsumerFactory,
}

impl HistoryReader {
    pub fn new(registry: Arc<StreamRegistry>) -> Self {
        Self {
            factory: ConsumerFactory::new(registry.clone()),
            registry,
        }
    }

    /// Drains matching events between `from` and `to`, newest-bounded by
    /// `limit`. Uses a throwaway ack-none consumer, so durable cursors are
    /// never advanced.
    pub async fn query(
        &self,
        org: &str,
        project: &str,
        topic: &str,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        validate_pattern(topic)?;
        let filter = subjects::event_subject(org, project, topic);
        let consumer = self.factory.history(org, filter, from).await?;

        let mut out = Vec::new();
        'drain: while out.len() < limit {
            let batch_size = FETCH_BATCH.min(limit - out.len());
            let mut batch = consumer
                .fetch()
                .max_messages(batch_size)
                .expires(FETCH_EXPIRES)
                .messages()
                .await
                .map_err(Error::upstream)?;

            let mut received = 0usize;
            while let Some(msg) = batch.try_next().await.map_err(Error::upstream)? {
                received += 1;
                let (sequence, published) = match msg.info() {
                    Ok(info) => (info.stream_sequence, info.published),
                    Err(_) => continue,
                };
                if let Some(to) = to
                    && published > to
                {
                    break 'drain;
                }
                match serde_json::from_slice::<Event>(&msg.payload) {
                    Ok(event) => out.push(StoredEvent { event, sequence }),
                    Err(err) => {
                        debug!(org, sequence, error = %err, "skipping unparseable event");
                    }
                }
                if out.len() >= limit {
                    break 'drain;
                }
            }
            if received == 0 {
                break;
            }
        }
        Ok(out)
    }

    /// Direct indexed fetch by stream sequence.
    pub async fn get_by_sequence(&self, org: &str, sequence: u64) -> Result<StoredEvent> {
        let stream = self.registry.events_stream(org).await?;
        let message = stream
            .direct_get(sequence)
            .await
            .map_err(|_| Error::not_found(format!("event at sequence {sequence}")))?;
        let event = serde_json::from_slice::<Event>(&message.payload)
            .map_err(|_| Error::not_found(format!("event at sequence {sequence}")))?;
        Ok(StoredEvent { event, sequence })
    }
}
