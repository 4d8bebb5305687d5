use serde::{Deserialize, Serialize};

/// Label set attached to every metric sample. Tenant is always present;
/// the rest ride in `extra` so call sites stay terse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryLabels {
    pub tenant: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            topic: None,
            extra: Vec::new(),
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn push(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub(crate) fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(self.extra.len() + 2);
        if !self.tenant.is_empty() {
            tags.push(("tenant".to_string(), self.tenant.clone()));
        }
        if let Some(topic) = &self.topic {
            tags.push(("topic".to_string(), topic.clone()));
        }
        tags.extend(self.extra.iter().cloned());
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_include_tenant_topic_and_extras() {
        let labels = TelemetryLabels::tenant("acme")
            .with_topic("orders.created")
            .push("status", "acked");
        let tags = labels.tags();
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0], ("tenant".into(), "acme".into()));
        assert_eq!(tags[1], ("topic".into(), "orders.created".into()));
        assert_eq!(tags[2], ("status".into(), "acked".into()));
    }

    #[test]
    fn empty_tenant_is_omitted() {
        let labels = TelemetryLabels::default();
        assert!(labels.tags().is_empty());
    }
}
