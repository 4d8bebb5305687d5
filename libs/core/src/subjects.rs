//! NATS subject helpers. Tenant isolation lives here: every filter and
//! publish subject is built by these functions, so a caller can never place
//! its own tenant prefix on the wire.

use std::borrow::Cow;

/// Normalizes identifiers to be subject-safe (replace separators and NATS
/// metacharacters, trim). Topics are validated instead of normalized; this
/// is for org/project segments only.
fn norm<S: AsRef<str>>(s: S) -> Cow<'static, str> {
    let mut t = s
        .as_ref()
        .trim()
        .replace([' ', '\t', '\n', '\r', '*', '>', '/', '.'], "-");
    if t.is_empty() {
        t = "unknown".into();
    }
    Cow::Owned(t)
}

/// Live event subject.
///
/// ```
/// use fanout_core::subjects::event_subject;
///
/// assert_eq!(
///     event_subject("acme", "web", "orders.created"),
///     "events.acme.web.orders.created"
/// );
/// ```
pub fn event_subject(org: &str, project: &str, topic: &str) -> String {
    format!("events.{}.{}.{topic}", norm(org), norm(project))
}

/// Dead-letter copy of an event, parallel to its original subject.
pub fn dlq_subject(org: &str, project: &str, topic: &str) -> String {
    format!("dlq.{}.{}.{topic}", norm(org), norm(project))
}

/// Deferred webhook retries.
pub fn webhook_retry_subject(org: &str, project: &str, topic: &str) -> String {
    format!("webhook-retry.{}.{}.{topic}", norm(org), norm(project))
}

/// Wildcard covering every event subject of one tenant.
pub fn events_filter(org: &str) -> String {
    format!("events.{}.>", norm(org))
}

pub fn dlq_filter(org: &str) -> String {
    format!("dlq.{}.>", norm(org))
}

pub fn webhook_retry_filter(org: &str) -> String {
    format!("webhook-retry.{}.>", norm(org))
}

/// DLQ filter narrowed to one project (optionally one topic pattern).
pub fn dlq_project_filter(org: &str, project: &str, topic: Option<&str>) -> String {
    match topic {
        Some(topic) => format!("dlq.{}.{}.{topic}", norm(org), norm(project)),
        None => format!("dlq.{}.{}.>", norm(org), norm(project)),
    }
}

/// Control subject the HTTP layer publishes to when a tenant's webhook
/// subscriptions change; workers reconcile on it.
pub fn webhook_control_subject(org: &str) -> String {
    format!("fanout.ctl.webhooks.{}", norm(org))
}

pub fn webhook_control_wildcard() -> &'static str {
    "fanout.ctl.webhooks.*"
}

/// Stream names are per tenant; subjects above are their filters.
pub fn events_stream_name(org: &str) -> String {
    format!("events-{}", norm(org))
}

pub fn dlq_stream_name(org: &str) -> String {
    format!("dlq-{}", norm(org))
}

pub fn webhook_retry_stream_name(org: &str) -> String {
    format!("webhook-retry-{}", norm(org))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_format() {
        assert_eq!(
            event_subject("acme", "web", "orders.created"),
            "events.acme.web.orders.created"
        );
        assert_eq!(
            dlq_subject("acme", "web", "orders.created"),
            "dlq.acme.web.orders.created"
        );
        assert_eq!(
            webhook_retry_subject("acme", "web", "orders.created"),
            "webhook-retry.acme.web.orders.created"
        );
    }

    #[test]
    fn filters_cover_one_tenant_only() {
        assert_eq!(events_filter("acme"), "events.acme.>");
        assert_eq!(dlq_filter("acme"), "dlq.acme.>");
        assert_eq!(dlq_project_filter("acme", "web", None), "dlq.acme.web.>");
        assert_eq!(
            dlq_project_filter("acme", "web", Some("orders.*")),
            "dlq.acme.web.orders.*"
        );
    }

    #[test]
    fn metacharacters_cannot_escape_the_prefix() {
        // A hostile org id must not widen the filter.
        assert_eq!(events_filter("a.>"), "events.a--.>");
        assert_eq!(event_subject("a b", "p/q", "t.x"), "events.a-b.p-q.t.x");
    }

    #[test]
    fn control_subjects() {
        assert_eq!(
            webhook_control_subject("acme"),
            "fanout.ctl.webhooks.acme"
        );
        assert_eq!(webhook_control_wildcard(), "fanout.ctl.webhooks.*");
    }

    #[test]
    fn stream_names() {
        assert_eq!(events_stream_name("acme"), "events-acme");
        assert_eq!(dlq_stream_name("acme"), "dlq-acme");
        assert_eq!(webhook_retry_stream_name("acme"), "webhook-retry-acme");
    }
}
