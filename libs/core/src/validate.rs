//! Input validation for the publish path. Rejections are `InvalidInput`
//! (or `PayloadTooLarge`) and surface as 4xx without any retry.

use crate::{Error, Result};

/// Max total topic length on the wire.
pub const MAX_TOPIC_BYTES: usize = 255;

/// Default payload cap, overridable per deployment.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Topics are dot-separated, every segment non-empty, and the first segment
/// must not start with `$` (reserved namespace on the log server).
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::invalid("topic must not be empty"));
    }
    if topic.len() > MAX_TOPIC_BYTES {
        return Err(Error::invalid(format!(
            "topic exceeds {MAX_TOPIC_BYTES} bytes"
        )));
    }
    if topic.starts_with('$') {
        return Err(Error::invalid("topic must not start with '$'"));
    }
    for segment in topic.split('.') {
        if segment.is_empty() {
            return Err(Error::invalid(format!(
                "topic {topic:?} has an empty segment"
            )));
        }
        if segment.contains(['*', '>', ' ']) {
            return Err(Error::invalid(format!(
                "topic {topic:?} contains a reserved character"
            )));
        }
    }
    Ok(())
}

/// Org and project identifiers: non-empty, subject-safe characters only.
pub fn validate_identifier(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::invalid(format!("{what} must not be empty")));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::invalid(format!(
            "{what} {name:?} may only contain alphanumerics, '-' and '_'"
        )));
    }
    Ok(())
}

pub fn validate_payload_size(len: usize, limit: usize) -> Result<()> {
    if len > limit {
        return Err(Error::PayloadTooLarge { limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_topics() {
        assert!(validate_topic("orders.created").is_ok());
        assert!(validate_topic("a").is_ok());
        assert!(validate_topic("a.b.c.d").is_ok());
    }

    #[test]
    fn rejects_bad_topics() {
        assert!(validate_topic("").is_err());
        assert!(validate_topic("$SYS.stats").is_err());
        assert!(validate_topic("orders..created").is_err());
        assert!(validate_topic(".orders").is_err());
        assert!(validate_topic("orders.").is_err());
        assert!(validate_topic("orders.*").is_err());
        assert!(validate_topic("orders.>").is_err());
        assert!(validate_topic(&"x".repeat(256)).is_err());
        assert!(validate_topic(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_identifier("acme", "org").is_ok());
        assert!(validate_identifier("acme-prod_2", "org").is_ok());
        assert!(validate_identifier("", "org").is_err());
        assert!(validate_identifier("  ", "org").is_err());
        assert!(validate_identifier("a.b", "org").is_err());
        assert!(validate_identifier("a b", "org").is_err());
        assert!(validate_identifier("a>", "org").is_err());
    }

    #[test]
    fn payload_cap() {
        assert!(validate_payload_size(10, 10).is_ok());
        let err = validate_payload_size(11, 10).unwrap_err();
        assert_eq!(err.code(), "PAYLOAD_TOO_LARGE");
    }
}
