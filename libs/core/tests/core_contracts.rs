//! Contract tests for the public core surface: the on-log envelope shape,
//! stable error codes, and the agreement between subject building and
//! local pattern matching.

use fanout_core::{Error, Event, pattern, subjects, validate};
use serde_json::{Value, json};

#[test]
fn event_envelope_uses_the_wire_field_names() {
    let event = Event::new("acme", "web", "orders.created", json!({"amount": 42}), Some("evt_1"));
    let raw = serde_json::to_value(&event).expect("serialize");
    let object = raw.as_object().expect("object envelope");

    for key in ["id", "org_id", "project_id", "topic", "data", "timestamp", "attempt"] {
        assert!(object.contains_key(key), "missing envelope key {key}");
    }
    assert_eq!(object.len(), 7, "unexpected extra envelope keys");
    assert_eq!(raw["id"], "evt_1");
    assert_eq!(raw["org_id"], "acme");
    assert_eq!(raw["data"]["amount"], 42);
}

#[test]
fn envelope_decodes_without_attempt() {
    // Producers written before the replay path never set attempt.
    let raw = r#"{"id":"evt_1","org_id":"acme","project_id":"web",
        "topic":"orders.created","data":{},"timestamp":"2026-01-01T00:00:00Z"}"#;
    let event: Event = serde_json::from_str(raw).expect("parse");
    assert_eq!(event.attempt, 0);
}

#[test]
fn error_codes_are_part_of_the_api() {
    let table: &[(Error, &str)] = &[
        (Error::invalid("x"), "INVALID_INPUT"),
        (Error::PayloadTooLarge { limit: 1 }, "PAYLOAD_TOO_LARGE"),
        (Error::Unauthorized, "UNAUTHORIZED"),
        (Error::Forbidden, "FORBIDDEN"),
        (Error::not_found("x"), "NOT_FOUND"),
        (Error::conflict("x"), "CONFLICT"),
        (Error::RateLimited { retry_after_secs: 1 }, "RATE_LIMITED"),
        (Error::upstream("x"), "UPSTREAM"),
        (Error::transient("x"), "TRANSIENT_IO"),
        (Error::Poison("x".into()), "POISON"),
    ];
    for (err, code) in table {
        assert_eq!(err.code(), *code);
    }
}

#[test]
fn subjects_and_patterns_agree() {
    // A topic a pattern matches locally must land on a subject the
    // pattern's filter covers, segment for segment.
    let cases = [
        ("orders.*", "orders.created", true),
        ("orders.*", "billing.paid", false),
        ("orders.>", "orders.created.eu", true),
        ("orders.created", "orders.created", true),
        ("orders.created", "orders.created.eu", false),
    ];
    for (pattern, topic, expected) in cases {
        assert_eq!(
            pattern::topic_matches(pattern, topic),
            expected,
            "{pattern} vs {topic}"
        );
        let filter = subjects::event_subject("acme", "web", pattern);
        let subject = subjects::event_subject("acme", "web", topic);
        assert_eq!(
            subject_covered_by(&filter, &subject),
            expected,
            "{filter} vs {subject}"
        );
    }
}

#[test]
fn valid_topics_are_valid_patterns() {
    for topic in ["orders.created", "a", "a.b.c.d"] {
        validate::validate_topic(topic).expect("topic");
        pattern::validate_pattern(topic).expect("pattern");
    }
}

#[test]
fn payloads_survive_the_envelope_byte_for_byte() {
    let data: Value = json!({
        "nested": {"array": [1, 2, 3], "flag": true},
        "text": "café ☕",
        "zero": 0
    });
    let event = Event::new("acme", "web", "orders.created", data.clone(), None);
    let bytes = serde_json::to_vec(&event).expect("serialize");
    let parsed: Event = serde_json::from_slice(&bytes).expect("parse");
    assert_eq!(parsed.data, data);
}

/// Segment-wise NATS subject matching, mirroring the server's rules.
fn subject_covered_by(filter: &str, subject: &str) -> bool {
    let mut filter = filter.split('.');
    let mut subject = subject.split('.').peekable();
    loop {
        match (filter.next(), subject.peek()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {
                subject.next();
            }
            (Some(expected), Some(actual)) => {
                if expected != *actual {
                    return false;
                }
                subject.next();
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}
