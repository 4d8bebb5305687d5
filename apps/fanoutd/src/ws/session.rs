//! The per-session state machine: Opening → Active → Draining → Closed.
//!
//! One cooperative loop owns everything the session touches: the socket,
//! the bound consumer's message stream, and the pending-ack map. Nothing
//! here is shared with other sessions; the hub only tracks liveness.

use std::collections::HashMap;
use std::time::Duration;

use async_nats::jetstream::AckKind;
use async_nats::jetstream::consumer::pull::{MessagesError, Stream as PullMessages};
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use fanout_core::{
    DeliveryAttempt, DeliveryStatus, Event, ReceiverType, duration::parse_duration,
    pattern::validate_pattern,
};
use fanout_dlq::DlqRecord;
use fanout_stream::SubscribeOptions;
use fanout_telemetry::{TelemetryLabels, record_counter};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;
use crate::ws::frames::{
    ClientFrame, ServerFrame, SubscribeFrameOptions, parse_client_frame,
};
use crate::ws::hub::SessionInfo;

const OPENING_TIMEOUT: Duration = Duration::from_secs(30);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(90);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Opening,
    Active,
    Draining,
}

struct Pending {
    msg: async_nats::jetstream::Message,
    event: Event,
    attempt: u64,
}

pub async fn run_session(socket: WebSocket, state: AppState, org_id: String, project_id: String) {
    let session_id = format!("sess_{}", Uuid::new_v4().simple());
    state.hub.register(
        &session_id,
        SessionInfo {
            org_id: org_id.clone(),
            project_id: project_id.clone(),
        },
    );
    info!(session = %session_id, org = %org_id, "session opened");

    let session = Session {
        id: session_id.clone(),
        org_id,
        project_id,
        state: state.clone(),
        phase: Phase::Opening,
        auto_ack: false,
        max_deliver: state.config.max_deliver.max(1) as u64,
        group: None,
        consumer_name: None,
        pending: HashMap::new(),
        opening_deadline: Instant::now() + OPENING_TIMEOUT,
        last_pong: Instant::now(),
    };
    session.run(socket).await;

    state.hub.remove(&session_id);
    info!(session = %session_id, "session closed");
}

struct Session {
    id: String,
    org_id: String,
    project_id: String,
    state: AppState,
    phase: Phase,
    auto_ack: bool,
    max_deliver: u64,
    group: Option<String>,
    consumer_name: Option<String>,
    pending: HashMap<String, Pending>,
    opening_deadline: Instant,
    last_pong: Instant,
}

async fn next_message(
    messages: &mut Option<PullMessages>,
) -> Option<Result<async_nats::jetstream::Message, MessagesError>> {
    use futures::StreamExt;
    match messages {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    let payload = frame.to_json();
    matches!(
        tokio::time::timeout(WRITE_TIMEOUT, socket.send(Message::Text(payload.into()))).await,
        Ok(Ok(()))
    )
}

impl Session {
    async fn run(mut self, mut socket: WebSocket) {
        let mut messages: Option<PullMessages> = None;
        let mut shutdown = self.state.shutdown.clone();
        let mut ping =
            tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        while self.phase != Phase::Draining {
            tokio::select! {
                frame = socket.recv() => {
                    self.on_socket_frame(&mut socket, &mut messages, frame).await;
                }
                next = next_message(&mut messages),
                    if self.phase == Phase::Active && messages.is_some() =>
                {
                    self.on_log_message(&mut socket, &mut messages, next).await;
                }
                _ = tokio::time::sleep_until(self.opening_deadline),
                    if self.phase == Phase::Opening =>
                {
                    debug!(session = %self.id, "no subscribe within the opening window");
                    self.phase = Phase::Draining;
                }
                _ = ping.tick() => {
                    self.on_heartbeat(&mut socket).await;
                }
                _ = shutdown.changed() => {
                    debug!(session = %self.id, "drain requested by shutdown");
                    self.phase = Phase::Draining;
                }
            }
        }

        self.drain().await;
    }

    /// Draining: stop pulling, release undelivered acks so the log
    /// redelivers them, and drop the consumer if it was ephemeral. Queued
    /// ledger writes flush through the writer task on their own.
    async fn drain(&mut self) {
        let released = self.pending.len();
        self.pending.clear();
        if released > 0 {
            debug!(session = %self.id, released, "released pending deliveries");
        }
        if self.group.is_none()
            && let Some(name) = self.consumer_name.take()
        {
            if let Err(err) = self
                .state
                .consumers
                .delete_durable(&self.org_id, &name)
                .await
            {
                debug!(session = %self.id, consumer = %name, error = %err, "ephemeral consumer cleanup skipped");
            }
        }
    }

    async fn on_socket_frame(
        &mut self,
        socket: &mut WebSocket,
        messages: &mut Option<PullMessages>,
        frame: Option<Result<Message, axum::Error>>,
    ) {
        match frame {
            None | Some(Ok(Message::Close(_))) => {
                self.phase = Phase::Draining;
            }
            Some(Ok(Message::Pong(_))) => {
                self.last_pong = Instant::now();
            }
            Some(Ok(Message::Ping(_))) => {
                // The framework answers pings for us.
            }
            Some(Ok(Message::Text(text))) => {
                self.on_client_frame(socket, messages, text.as_str()).await;
            }
            Some(Ok(Message::Binary(_))) => {
                let frame = ServerFrame::error("BAD_FRAME", "frames must be JSON text");
                if !send_frame(socket, &frame).await {
                    self.phase = Phase::Draining;
                }
            }
            Some(Err(err)) => {
                debug!(session = %self.id, error = %err, "socket read failed");
                self.phase = Phase::Draining;
            }
        }
    }

    async fn on_client_frame(
        &mut self,
        socket: &mut WebSocket,
        messages: &mut Option<PullMessages>,
        raw: &str,
    ) {
        let frame = match parse_client_frame(raw) {
            Ok(frame) => frame,
            Err(err) => {
                let frame = ServerFrame::error("BAD_FRAME", err.to_string());
                if !send_frame(socket, &frame).await {
                    self.phase = Phase::Draining;
                }
                return;
            }
        };

        match (frame, self.phase) {
            (ClientFrame::Ping, _) => {
                if !send_frame(socket, &ServerFrame::Pong).await {
                    self.phase = Phase::Draining;
                }
            }
            (ClientFrame::Subscribe { topics, options }, Phase::Opening) => {
                self.on_subscribe(socket, messages, topics, options).await;
            }
            (ClientFrame::Ack { id }, Phase::Active) => {
                self.on_ack(socket, &id).await;
            }
            (ClientFrame::Nack { id, retry_in }, Phase::Active) => {
                self.on_nack(socket, &id, retry_in.as_deref()).await;
            }
            (ClientFrame::Unsubscribe, Phase::Active) => {
                self.on_unsubscribe(messages).await;
            }
            (other, _) => {
                debug!(session = %self.id, frame = ?other, phase = ?self.phase, "frame not legal in this state");
                let frame =
                    ServerFrame::error("BAD_FRAME", "frame not legal in the current state");
                if !send_frame(socket, &frame).await {
                    self.phase = Phase::Draining;
                }
            }
        }
    }

    async fn on_subscribe(
        &mut self,
        socket: &mut WebSocket,
        messages: &mut Option<PullMessages>,
        topics: Vec<String>,
        options: SubscribeFrameOptions,
    ) {
        if topics.is_empty() {
            self.send_or_drain(socket, ServerFrame::error("INVALID_TOPIC", "topics must not be empty"))
                .await;
            return;
        }
        for topic in &topics {
            if let Err(err) = validate_pattern(topic) {
                self.send_or_drain(socket, ServerFrame::error("INVALID_TOPIC", err.to_string()))
                    .await;
                return;
            }
        }

        let opts = SubscribeOptions {
            ack_wait: self.state.config.ack_wait,
            max_deliver: options.max_retries.unwrap_or(self.state.config.max_deliver),
        }
        .clamped();
        let group = options.group.filter(|g| !g.trim().is_empty());

        let bound = match &group {
            Some(group) => {
                self.state
                    .consumers
                    .group(&self.org_id, &self.project_id, group, &topics, opts)
                    .await
            }
            None => {
                self.state
                    .consumers
                    .ephemeral(&self.org_id, &self.project_id, &topics, opts)
                    .await
            }
        };
        let consumer = match bound {
            Ok(consumer) => consumer,
            Err(err) => {
                warn!(session = %self.id, error = %err, "consumer bind failed");
                self.send_or_drain(
                    socket,
                    ServerFrame::error("SUBSCRIBE_FAILED", err.to_string()),
                )
                .await;
                return;
            }
        };
        self.consumer_name = Some(consumer.cached_info().name.clone());

        match consumer.messages().await {
            Ok(stream) => *messages = Some(stream),
            Err(err) => {
                warn!(session = %self.id, error = %err, "consumer stream failed");
                self.send_or_drain(
                    socket,
                    ServerFrame::error("SUBSCRIBE_FAILED", err.to_string()),
                )
                .await;
                return;
            }
        }

        self.auto_ack = options.auto_ack;
        self.max_deliver = opts.max_deliver as u64;
        self.group = group;
        self.phase = Phase::Active;
        record_counter(
            "ws_subscriptions",
            1,
            &TelemetryLabels::tenant(&self.org_id),
        );
        self.send_or_drain(socket, ServerFrame::Subscribed).await;
    }

    async fn on_unsubscribe(&mut self, messages: &mut Option<PullMessages>) {
        *messages = None;
        self.drain_consumer_only().await;
        self.phase = Phase::Opening;
        self.opening_deadline = Instant::now() + OPENING_TIMEOUT;
    }

    async fn drain_consumer_only(&mut self) {
        let released = self.pending.len();
        self.pending.clear();
        if released > 0 {
            debug!(session = %self.id, released, "released pending deliveries on unsubscribe");
        }
        if self.group.is_none()
            && let Some(name) = self.consumer_name.take()
        {
            let _ = self
                .state
                .consumers
                .delete_durable(&self.org_id, &name)
                .await;
        }
        self.consumer_name = None;
        self.group = None;
        self.auto_ack = false;
    }

    async fn on_log_message(
        &mut self,
        socket: &mut WebSocket,
        messages: &mut Option<PullMessages>,
        next: Option<Result<async_nats::jetstream::Message, MessagesError>>,
    ) {
        match next {
            Some(Ok(msg)) => self.deliver(socket, msg).await,
            Some(Err(err)) => {
                warn!(session = %self.id, error = %err, "consumer fetch failed");
                self.send_or_drain(socket, ServerFrame::error("UPSTREAM", err.to_string()))
                    .await;
            }
            None => {
                warn!(session = %self.id, "consumer stream ended");
                *messages = None;
                self.send_or_drain(
                    socket,
                    ServerFrame::error("UPSTREAM", "event stream ended"),
                )
                .await;
            }
        }
    }

    async fn deliver(&mut self, socket: &mut WebSocket, msg: async_nats::jetstream::Message) {
        let attempt = msg
            .info()
            .map(|info| info.delivered.max(1) as u64)
            .unwrap_or(1);
        let event: Event = match serde_json::from_slice(&msg.payload) {
            Ok(event) => event,
            Err(err) => {
                warn!(session = %self.id, error = %err, "skipping unparseable stream payload");
                if let Err(err) = msg.ack().await {
                    debug!(session = %self.id, error = %err, "ack of bad payload failed");
                }
                return;
            }
        };

        self.state
            .ledger
            .record(DeliveryAttempt::delivered(
                &event.id,
                &self.org_id,
                ReceiverType::Websocket,
                &self.id,
                attempt as u32,
            ))
            .await;

        let frame = ServerFrame::Event {
            id: event.id.clone(),
            topic: event.topic.clone(),
            data: event.data.clone(),
            timestamp: event.timestamp.clone(),
            attempt,
            max_attempts: self.max_deliver,
        };
        if !send_frame(socket, &frame).await {
            // Not acked: the log redelivers after ack_wait, possibly to
            // another group member.
            self.phase = Phase::Draining;
            return;
        }
        record_counter(
            "ws_events_delivered",
            1,
            &TelemetryLabels::tenant(&self.org_id).with_topic(&event.topic),
        );

        if self.auto_ack {
            if let Err(err) = msg.ack().await {
                warn!(session = %self.id, event = %event.id, error = %err, "auto-ack failed");
                return;
            }
            self.state
                .ledger
                .update_status(
                    &event.id,
                    ReceiverType::Websocket,
                    &self.id,
                    attempt as u32,
                    DeliveryStatus::Acked,
                    None,
                )
                .await;
        } else {
            self.pending
                .insert(event.id.clone(), Pending { msg, event, attempt });
        }
    }

    async fn on_ack(&mut self, socket: &mut WebSocket, id: &str) {
        let Some(pending) = self.pending.remove(id) else {
            self.send_or_drain(
                socket,
                ServerFrame::error("UNKNOWN_EVENT", format!("no pending delivery for {id}")),
            )
            .await;
            return;
        };
        if let Err(err) = pending.msg.ack().await {
            warn!(session = %self.id, event = %id, error = %err, "ack failed");
            self.send_or_drain(socket, ServerFrame::error("UPSTREAM", err.to_string()))
                .await;
            return;
        }
        self.state
            .ledger
            .update_status(
                id,
                ReceiverType::Websocket,
                &self.id,
                pending.attempt as u32,
                DeliveryStatus::Acked,
                None,
            )
            .await;
    }

    async fn on_nack(&mut self, socket: &mut WebSocket, id: &str, retry_in: Option<&str>) {
        let Some(pending) = self.pending.remove(id) else {
            self.send_or_drain(
                socket,
                ServerFrame::error("UNKNOWN_EVENT", format!("no pending delivery for {id}")),
            )
            .await;
            return;
        };

        let delay = match retry_in.map(parse_duration).transpose() {
            Ok(delay) => delay,
            Err(err) => {
                // Keep the delivery pending; only the frame was bad.
                self.pending.insert(id.to_string(), pending);
                self.send_or_drain(socket, ServerFrame::from_error(&err)).await;
                return;
            }
        };

        if pending.attempt >= self.max_deliver {
            self.dead_letter(pending).await;
            return;
        }

        if let Err(err) = pending.msg.ack_with(AckKind::Nak(delay)).await {
            warn!(session = %self.id, event = %id, error = %err, "nack failed");
            self.send_or_drain(socket, ServerFrame::error("UPSTREAM", err.to_string()))
                .await;
            return;
        }
        self.state
            .ledger
            .update_status(
                id,
                ReceiverType::Websocket,
                &self.id,
                pending.attempt as u32,
                DeliveryStatus::Nacked,
                None,
            )
            .await;
    }

    /// The delivery chain is exhausted: write the DLQ copy, mark the ledger
    /// row terminal, and ack so the log stops redelivering.
    async fn dead_letter(&mut self, pending: Pending) {
        let reason = "nacked by subscriber";
        let record = DlqRecord::from_failure(
            &pending.event,
            pending.attempt as u32,
            reason,
            self.group.clone(),
        );
        if let Err(err) = self.state.dlq.publish(&record).await {
            warn!(
                session = %self.id,
                event = %pending.event.id,
                error = %err,
                "dlq publish failed, leaving delivery for ack_wait redelivery"
            );
            return;
        }
        self.state
            .ledger
            .update_status(
                &pending.event.id,
                ReceiverType::Websocket,
                &self.id,
                pending.attempt as u32,
                DeliveryStatus::Dlq,
                Some(reason.to_string()),
            )
            .await;
        if let Err(err) = pending.msg.ack().await {
            debug!(session = %self.id, event = %pending.event.id, error = %err, "terminal ack failed");
        }
        record_counter(
            "ws_events_dead_lettered",
            1,
            &TelemetryLabels::tenant(&self.org_id).with_topic(&pending.event.topic),
        );
    }

    async fn on_heartbeat(&mut self, socket: &mut WebSocket) {
        if self.last_pong.elapsed() >= PONG_TIMEOUT {
            debug!(session = %self.id, "pong overdue, draining");
            self.phase = Phase::Draining;
            return;
        }
        let sent = tokio::time::timeout(
            WRITE_TIMEOUT,
            socket.send(Message::Ping(Bytes::new())),
        )
        .await;
        if !matches!(sent, Ok(Ok(()))) {
            self.phase = Phase::Draining;
        }
    }

    async fn send_or_drain(&mut self, socket: &mut WebSocket, frame: ServerFrame) {
        if !send_frame(socket, &frame).await {
            self.phase = Phase::Draining;
        }
    }
}
