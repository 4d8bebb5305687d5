//! Webhook delivery workers. One engine task supervises one worker per
//! tenant; each worker owns one consumer task per active subscription and
//! reconciles that set when the control subject fires or on its periodic
//! resync. Reconfiguration swaps the snapshot; it never mutates a running
//! task's view.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fanout_core::{
    DeliveryAttempt, DeliveryStatus, Event, ReceiverType, Result, subjects,
};
use fanout_dlq::{DlqRecord, DlqStore};
use fanout_metastore::WebhookSubscription;
use fanout_stream::consumer::{ConsumerFactory, SubscribeOptions, webhook_consumer_name};
use fanout_telemetry::{TelemetryLabels, record_counter};
use futures::StreamExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::ledger::LedgerHandle;
use crate::state::AppState;
use crate::webhook::backoff::backoff_delay;
use crate::webhook::delivery::{Disposition, WebhookSender, classify, delivery_headers, signature};

const RESYNC_INTERVAL: Duration = Duration::from_secs(60);
const FETCH_ERROR_PAUSE: Duration = Duration::from_secs(1);

pub fn spawn_engine(state: AppState, sender: Arc<dyn WebhookSender>) -> JoinHandle<()> {
    tokio::spawn(run_engine(state, sender))
}

async fn run_engine(state: AppState, sender: Arc<dyn WebhookSender>) {
    let mut workers: HashMap<String, WorkerHandle> = HashMap::new();

    match state.meta.orgs_with_active_webhooks().await {
        Ok(orgs) => {
            for org in orgs {
                ensure_worker(&state, &sender, &mut workers, &org);
            }
        }
        Err(err) => error!(error = %err, "webhook boot scan failed"),
    }

    let mut control = match state
        .client
        .subscribe(subjects::webhook_control_wildcard())
        .await
    {
        Ok(subscriber) => Some(subscriber),
        Err(err) => {
            warn!(error = %err, "webhook control subject unavailable, falling back to resync only");
            None
        }
    };

    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            notification = next_control(&mut control) => {
                match notification {
                    Some(org) => {
                        debug!(org, "webhook configuration changed");
                        ensure_worker(&state, &sender, &mut workers, &org);
                        if let Some(worker) = workers.get(&org) {
                            worker.notify.notify_one();
                        }
                    }
                    None => {
                        if control.take().is_some() {
                            warn!("webhook control stream ended, falling back to resync only");
                        }
                    }
                }
            }
            // Tenants whose first subscription appears without a control
            // message are picked up here.
            _ = tokio::time::sleep(RESYNC_INTERVAL) => {
                if let Ok(orgs) = state.meta.orgs_with_active_webhooks().await {
                    for org in orgs {
                        ensure_worker(&state, &sender, &mut workers, &org);
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    for (org, worker) in workers {
        if let Err(err) = worker.task.await {
            debug!(org, error = %err, "webhook worker join failed");
        }
    }
    info!("webhook engine stopped");
}

async fn next_control(control: &mut Option<async_nats::Subscriber>) -> Option<String> {
    match control {
        Some(subscriber) => {
            let message = subscriber.next().await?;
            message
                .subject
                .as_str()
                .rsplit('.')
                .next()
                .map(str::to_string)
        }
        None => std::future::pending().await,
    }
}

struct WorkerHandle {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

fn ensure_worker(
    state: &AppState,
    sender: &Arc<dyn WebhookSender>,
    workers: &mut HashMap<String, WorkerHandle>,
    org: &str,
) {
    if let Some(existing) = workers.get(org)
        && !existing.task.is_finished()
    {
        return;
    }
    let notify = Arc::new(Notify::new());
    let task = tokio::spawn(run_tenant_worker(
        state.clone(),
        sender.clone(),
        org.to_string(),
        notify.clone(),
    ));
    workers.insert(org.to_string(), WorkerHandle { notify, task });
}

/// One tenant's worker: keeps the running consumer tasks equal to the set
/// of active subscriptions.
async fn run_tenant_worker(
    state: AppState,
    sender: Arc<dyn WebhookSender>,
    org: String,
    notify: Arc<Notify>,
) {
    let mut shutdown = state.shutdown.clone();
    let mut tasks: HashMap<String, (WebhookSubscription, JoinHandle<()>)> = HashMap::new();
    info!(org, "webhook worker started");

    loop {
        reconcile(&state, &sender, &org, &mut tasks).await;
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(RESYNC_INTERVAL) => {}
            _ = shutdown.changed() => break,
        }
    }

    // Subscription tasks watch the same shutdown signal and finish their
    // in-flight POST before returning.
    for (id, (_, task)) in tasks {
        if let Err(err) = task.await {
            debug!(org, subscription = %id, error = %err, "subscription task join failed");
        }
    }
    info!(org, "webhook worker stopped");
}

async fn reconcile(
    state: &AppState,
    sender: &Arc<dyn WebhookSender>,
    org: &str,
    tasks: &mut HashMap<String, (WebhookSubscription, JoinHandle<()>)>,
) {
    let desired: HashMap<String, WebhookSubscription> =
        match state.meta.list_webhooks(org, true).await {
            Ok(subs) => subs.into_iter().map(|sub| (sub.id.clone(), sub)).collect(),
            Err(err) => {
                error!(org, error = %err, "webhook reconcile read failed");
                return;
            }
        };

    tasks.retain(|id, (sub, task)| {
        let keep = match desired.get(id) {
            Some(wanted) => wanted == sub && !task.is_finished(),
            None => false,
        };
        if !keep {
            task.abort();
            debug!(org, subscription = %id, "subscription task retired");
        }
        keep
    });

    for (id, sub) in desired {
        if !tasks.contains_key(&id) {
            let task = tokio::spawn(run_subscription(
                state.clone(),
                sender.clone(),
                sub.clone(),
            ));
            tasks.insert(id, (sub, task));
        }
    }
}

/// One subscription's consume loop.
async fn run_subscription(
    state: AppState,
    sender: Arc<dyn WebhookSender>,
    sub: WebhookSubscription,
) {
    let filters =
        match ConsumerFactory::filter_subjects(&sub.org_id, &sub.project_id, &sub.topics) {
            Ok(filters) => filters,
            Err(err) => {
                error!(subscription = %sub.id, error = %err, "webhook filters invalid");
                return;
            }
        };
    let opts = SubscribeOptions {
        ack_wait: state.config.webhook_ack_wait,
        max_deliver: state.config.webhook_max_deliver,
    };
    let consumer = match state
        .consumers
        .webhook(&sub.org_id, &sub.id, filters, opts)
        .await
    {
        Ok(consumer) => consumer,
        Err(err) => {
            error!(subscription = %sub.id, error = %err, "webhook consumer bind failed");
            return;
        }
    };
    let mut messages = match consumer.messages().await {
        Ok(messages) => messages,
        Err(err) => {
            error!(subscription = %sub.id, error = %err, "webhook consumer stream failed");
            return;
        }
    };
    info!(
        org = %sub.org_id,
        subscription = %sub.id,
        url = %sub.url,
        "webhook subscription consuming"
    );

    let max_deliver = state.config.webhook_max_deliver.max(1) as u64;
    let mut shutdown = state.shutdown.clone();
    loop {
        tokio::select! {
            next = messages.next() => match next {
                Some(Ok(msg)) => {
                    let delivery = JsDelivery(msg);
                    if let Err(err) = handle_delivery(
                        max_deliver,
                        &state.ledger,
                        state.dlq.as_ref(),
                        sender.as_ref(),
                        &sub,
                        &delivery,
                    )
                    .await
                    {
                        warn!(subscription = %sub.id, error = %err, "webhook delivery errored");
                    }
                }
                Some(Err(err)) => {
                    warn!(subscription = %sub.id, error = %err, "webhook fetch failed");
                    tokio::time::sleep(FETCH_ERROR_PAUSE).await;
                }
                None => {
                    warn!(subscription = %sub.id, "webhook stream ended");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

/// Seams for testing the retry logic without JetStream.
#[async_trait]
pub trait RetryMessage: Send + Sync {
    fn payload(&self) -> &[u8];
    fn attempt(&self) -> u64;
    async fn ack(&self) -> std::result::Result<(), String>;
    async fn nack(&self, delay: Duration) -> std::result::Result<(), String>;
}

struct JsDelivery(async_nats::jetstream::Message);

#[async_trait]
impl RetryMessage for JsDelivery {
    fn payload(&self) -> &[u8] {
        &self.0.payload
    }

    fn attempt(&self) -> u64 {
        self.0
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1)
    }

    async fn ack(&self) -> std::result::Result<(), String> {
        self.0.ack().await.map_err(|err| err.to_string())
    }

    async fn nack(&self, delay: Duration) -> std::result::Result<(), String> {
        self.0
            .ack_with(async_nats::jetstream::AckKind::Nak(Some(delay)))
            .await
            .map_err(|err| err.to_string())
    }
}

#[async_trait]
pub trait DlqSink: Send + Sync {
    async fn publish_failure(&self, record: DlqRecord) -> Result<u64>;
}

#[async_trait]
impl DlqSink for DlqStore {
    async fn publish_failure(&self, record: DlqRecord) -> Result<u64> {
        self.publish(&record).await
    }
}

/// The per-message pipeline: ledger row, signed POST, classify, terminal
/// bookkeeping.
pub async fn handle_delivery(
    max_deliver: u64,
    ledger: &LedgerHandle,
    dlq: &dyn DlqSink,
    sender: &dyn WebhookSender,
    sub: &WebhookSubscription,
    msg: &dyn RetryMessage,
) -> std::result::Result<(), String> {
    let event: Event = match serde_json::from_slice(msg.payload()) {
        Ok(event) => event,
        Err(err) => {
            warn!(subscription = %sub.id, error = %err, "skipping unparseable stream payload");
            return msg.ack().await;
        }
    };
    let attempt = msg.attempt();

    ledger
        .record(DeliveryAttempt::delivered(
            &event.id,
            &sub.org_id,
            ReceiverType::Webhook,
            &sub.id,
            attempt as u32,
        ))
        .await;

    let sig = signature(&sub.secret, msg.payload());
    let headers = delivery_headers(&event, attempt, &sig);
    let disposition = match sender.post(&sub.url, &headers, msg.payload()).await {
        Ok(status) => classify(status),
        Err(transport) => Disposition::Retry { reason: transport },
    };

    let labels = TelemetryLabels::tenant(&sub.org_id).with_topic(&event.topic);
    match disposition {
        Disposition::Deliver => {
            msg.ack().await?;
            ledger
                .update_status(
                    &event.id,
                    ReceiverType::Webhook,
                    &sub.id,
                    attempt as u32,
                    DeliveryStatus::Acked,
                    None,
                )
                .await;
            record_counter("webhook_delivered", 1, &labels);
            Ok(())
        }
        Disposition::Drop { reason } => {
            msg.ack().await?;
            ledger
                .update_status(
                    &event.id,
                    ReceiverType::Webhook,
                    &sub.id,
                    attempt as u32,
                    DeliveryStatus::Dropped,
                    Some(reason.clone()),
                )
                .await;
            record_counter("webhook_dropped", 1, &labels);
            debug!(subscription = %sub.id, event = %event.id, reason, "poison response, dropped");
            Ok(())
        }
        Disposition::Retry { reason } => {
            if attempt >= max_deliver {
                let record = DlqRecord::from_failure(
                    &event,
                    attempt as u32,
                    reason.clone(),
                    Some(webhook_consumer_name(&sub.id)),
                );
                dlq.publish_failure(record)
                    .await
                    .map_err(|err| err.to_string())?;
                ledger
                    .update_status(
                        &event.id,
                        ReceiverType::Webhook,
                        &sub.id,
                        attempt as u32,
                        DeliveryStatus::Dlq,
                        Some(reason),
                    )
                    .await;
                msg.ack().await?;
                record_counter("webhook_dead_lettered", 1, &labels);
                Ok(())
            } else {
                ledger
                    .update_status(
                        &event.id,
                        ReceiverType::Webhook,
                        &sub.id,
                        attempt as u32,
                        DeliveryStatus::Retrying,
                        Some(reason),
                    )
                    .await;
                msg.nack(backoff_delay(attempt)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::spawn_ledger_writer;
    use fanout_metastore::Metastore;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct MockSender {
        responses: AsyncMutex<Vec<std::result::Result<u16, String>>>,
        calls: AsyncMutex<usize>,
    }

    impl MockSender {
        fn new(responses: Vec<std::result::Result<u16, String>>) -> Self {
            Self {
                responses: AsyncMutex::new(responses),
                calls: AsyncMutex::new(0),
            }
        }
    }

    #[async_trait]
    impl WebhookSender for MockSender {
        async fn post(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: &[u8],
        ) -> std::result::Result<u16, String> {
            *self.calls.lock().await += 1;
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                Ok(200)
            } else {
                responses.remove(0)
            }
        }
    }

    struct MockDlq {
        records: Mutex<Vec<DlqRecord>>,
    }

    impl MockDlq {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DlqSink for MockDlq {
        async fn publish_failure(&self, record: DlqRecord) -> Result<u64> {
            let mut records = self.records.lock().unwrap();
            records.push(record);
            Ok(records.len() as u64)
        }
    }

    enum AckState {
        Unacked,
        Acked,
        Nacked(Duration),
    }

    struct MockMessage {
        payload: Vec<u8>,
        attempt: u64,
        state: AsyncMutex<AckState>,
    }

    impl MockMessage {
        fn new(event: &Event, attempt: u64) -> Self {
            Self {
                payload: serde_json::to_vec(event).unwrap(),
                attempt,
                state: AsyncMutex::new(AckState::Unacked),
            }
        }
    }

    #[async_trait]
    impl RetryMessage for MockMessage {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        fn attempt(&self) -> u64 {
            self.attempt
        }

        async fn ack(&self) -> std::result::Result<(), String> {
            *self.state.lock().await = AckState::Acked;
            Ok(())
        }

        async fn nack(&self, delay: Duration) -> std::result::Result<(), String> {
            *self.state.lock().await = AckState::Nacked(delay);
            Ok(())
        }
    }

    fn sample_sub() -> WebhookSubscription {
        WebhookSubscription::new(
            "acme",
            "web",
            "https://example.com/hook",
            vec!["orders.*".into()],
            "s3cret",
        )
    }

    fn sample_event() -> Event {
        Event::new("acme", "web", "orders.created", json!({"amount": 42}), None)
    }

    async fn run_case(
        responses: Vec<std::result::Result<u16, String>>,
        attempt: u64,
        max_deliver: u64,
    ) -> (Metastore, MockDlq, MockMessage, Event) {
        let meta = Metastore::open_in_memory().unwrap();
        let (ledger, writer) = spawn_ledger_writer(meta.clone(), 16);
        let sender = MockSender::new(responses);
        let dlq = MockDlq::new();
        let sub = sample_sub();
        let event = sample_event();
        let msg = MockMessage::new(&event, attempt);

        handle_delivery(max_deliver, &ledger, &dlq, &sender, &sub, &msg)
            .await
            .unwrap();

        drop(ledger);
        writer.await.unwrap();
        (meta, dlq, msg, event)
    }

    #[tokio::test]
    async fn success_acks_and_marks_acked() {
        let (meta, dlq, msg, event) = run_case(vec![Ok(200)], 1, 6).await;
        assert!(matches!(*msg.state.lock().await, AckState::Acked));
        assert!(dlq.records.lock().unwrap().is_empty());
        let rows = meta.list_attempts(&event.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, DeliveryStatus::Acked);
    }

    #[tokio::test]
    async fn poison_is_dropped_without_dlq() {
        let (meta, dlq, msg, event) = run_case(vec![Ok(404)], 1, 6).await;
        assert!(matches!(*msg.state.lock().await, AckState::Acked));
        assert!(dlq.records.lock().unwrap().is_empty());
        let rows = meta.list_attempts(&event.id).await.unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Dropped);
        assert_eq!(rows[0].error.as_deref(), Some("http 404"));
    }

    #[tokio::test]
    async fn server_error_nacks_with_backoff() {
        let (meta, dlq, msg, event) = run_case(vec![Ok(500)], 2, 6).await;
        match *msg.state.lock().await {
            AckState::Nacked(delay) => {
                assert!(delay >= Duration::from_secs(2));
                assert!(delay < Duration::from_secs(3));
            }
            _ => panic!("expected a nack"),
        }
        assert!(dlq.records.lock().unwrap().is_empty());
        let rows = meta.list_attempts(&event.id).await.unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Retrying);
    }

    #[tokio::test]
    async fn transport_error_is_retryable() {
        let (_, dlq, msg, _) = run_case(vec![Err("connection refused".into())], 1, 6).await;
        assert!(matches!(*msg.state.lock().await, AckState::Nacked(_)));
        assert!(dlq.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_dead_letter_with_identical_payload() {
        let (meta, dlq, msg, event) = run_case(vec![Ok(503)], 6, 6).await;
        assert!(matches!(*msg.state.lock().await, AckState::Acked));
        let records = dlq.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data, event.data);
        assert_eq!(records[0].attempts, 6);
        assert_eq!(records[0].last_error, "http 503");
        drop(records);
        let rows = meta.list_attempts(&event.id).await.unwrap();
        assert_eq!(rows[0].status, DeliveryStatus::Dlq);
    }
}
