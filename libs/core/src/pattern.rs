//! Topic pattern matching: `*` matches exactly one segment, `>` matches one
//! or more trailing segments. Patterns ride on NATS filter subjects after
//! the tenant prefix is prepended, and are also evaluated locally where a
//! consumer filter alone is not enough.

use crate::{Error, Result};

/// Validates a subscription pattern. Literal segments follow topic rules;
/// `*` must stand alone in its segment and `>` may only be the last one.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(Error::invalid("topic filter must not be empty"));
    }
    let segments: Vec<&str> = pattern.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(Error::invalid(format!(
                "topic filter {pattern:?} has an empty segment"
            )));
        }
        if *segment == ">" {
            if i != segments.len() - 1 {
                return Err(Error::invalid(format!(
                    "'>' is only valid as the last segment of {pattern:?}"
                )));
            }
            continue;
        }
        if segment.contains('>') || (segment.contains('*') && *segment != "*") {
            return Err(Error::invalid(format!(
                "wildcards must stand alone in a segment of {pattern:?}"
            )));
        }
    }
    Ok(())
}

/// Whether `topic` matches `pattern`. Both are dot-separated; `topic` is a
/// concrete topic (no wildcards).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut top = topic.split('.').peekable();
    loop {
        match (pat.next(), top.peek()) {
            (Some(">"), Some(_)) => return true,
            (Some(">"), None) => return false,
            (Some("*"), Some(_)) => {
                top.next();
            }
            (Some(p), Some(t)) => {
                if p != *t {
                    return false;
                }
                top.next();
            }
            (Some(_), None) => return false,
            (None, Some(_)) => return false,
            (None, None) => return true,
        }
    }
}

/// Whether any pattern in the list matches.
pub fn any_matches(patterns: &[String], topic: &str) -> bool {
    patterns.iter().any(|p| topic_matches(p, topic))
}
