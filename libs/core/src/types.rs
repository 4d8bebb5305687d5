use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

/// Rfc3339 wall-clock timestamp for envelopes and ledger rows.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".into())
}

/// The on-log event envelope. Immutable once appended; the stream sequence
/// lives beside the envelope, never inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub org_id: String,
    pub project_id: String,
    pub topic: String,
    pub data: Value,
    pub timestamp: String,
    #[serde(default)]
    pub attempt: u32,
}

impl Event {
    /// Builds a fresh envelope, minting an id unless the client supplied one.
    pub fn new(
        org_id: impl Into<String>,
        project_id: impl Into<String>,
        topic: impl Into<String>,
        data: Value,
        client_id: Option<&str>,
    ) -> Self {
        let id = match client_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => mint_event_id(),
        };
        Self {
            id,
            org_id: org_id.into(),
            project_id: project_id.into(),
            topic: topic.into(),
            data,
            timestamp: now_rfc3339(),
            attempt: 1,
        }
    }
}

pub(crate) fn mint_event_id() -> String {
    format!("evt_{}", Uuid::new_v4().simple())
}

/// Where a delivery attempt was aimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverType {
    Websocket,
    Webhook,
}

impl ReceiverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiverType::Websocket => "websocket",
            ReceiverType::Webhook => "webhook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "websocket" => Some(ReceiverType::Websocket),
            "webhook" => Some(ReceiverType::Webhook),
            _ => None,
        }
    }
}

/// Lifecycle of one delivery attempt in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Acked,
    Nacked,
    Retrying,
    Dlq,
    Dropped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Acked => "acked",
            DeliveryStatus::Nacked => "nacked",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Dlq => "dlq",
            DeliveryStatus::Dropped => "dropped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(DeliveryStatus::Delivered),
            "acked" => Some(DeliveryStatus::Acked),
            "nacked" => Some(DeliveryStatus::Nacked),
            "retrying" => Some(DeliveryStatus::Retrying),
            "dlq" => Some(DeliveryStatus::Dlq),
            "dropped" => Some(DeliveryStatus::Dropped),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Acked | DeliveryStatus::Dlq | DeliveryStatus::Dropped
        )
    }
}

/// One row in the delivery ledger. Primary key is
/// (event_id, receiver_type, receiver_id, attempt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub event_id: String,
    pub org_id: String,
    pub receiver_type: ReceiverType,
    pub receiver_id: String,
    pub attempt: u32,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub acked_at: Option<String>,
}

impl DeliveryAttempt {
    pub fn delivered(
        event_id: impl Into<String>,
        org_id: impl Into<String>,
        receiver_type: ReceiverType,
        receiver_id: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            org_id: org_id.into(),
            receiver_type,
            receiver_id: receiver_id.into(),
            attempt: attempt.max(1),
            status: DeliveryStatus::Delivered,
            error: None,
            created_at: now_rfc3339(),
            acked_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_mints_id_when_client_omits_one() {
        let event = Event::new("acme", "web", "orders.created", json!({"n": 1}), None);
        assert!(event.id.starts_with("evt_"));
        assert_eq!(event.attempt, 1);
    }

    #[test]
    fn event_keeps_client_supplied_id() {
        let event = Event::new("acme", "web", "orders.created", json!({}), Some(" ord-9 "));
        assert_eq!(event.id, "ord-9");
    }

    #[test]
    fn envelope_roundtrips_json() {
        let event = Event::new("acme", "web", "orders.created", json!({"amount": 42}), None);
        let raw = serde_json::to_string(&event).expect("serialize");
        let parsed: Event = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, event);
        assert!(raw.contains("\"org_id\":\"acme\""));
    }

    #[test]
    fn status_parse_mirrors_as_str() {
        for status in [
            DeliveryStatus::Delivered,
            DeliveryStatus::Acked,
            DeliveryStatus::Nacked,
            DeliveryStatus::Retrying,
            DeliveryStatus::Dlq,
            DeliveryStatus::Dropped,
        ] {
            assert_eq!(DeliveryStatus::parse(status.as_str()), Some(status));
        }
        assert!(DeliveryStatus::parse("gone").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(DeliveryStatus::Acked.is_terminal());
        assert!(DeliveryStatus::Dlq.is_terminal());
        assert!(DeliveryStatus::Dropped.is_terminal());
        assert!(!DeliveryStatus::Nacked.is_terminal());
        assert!(!DeliveryStatus::Delivered.is_terminal());
    }

    #[test]
    fn attempt_floor_is_one() {
        let row = DeliveryAttempt::delivered("evt_1", "acme", ReceiverType::Webhook, "wh-1", 0);
        assert_eq!(row.attempt, 1);
    }
}
