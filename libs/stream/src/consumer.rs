//! Consumer construction. Every consumer is a pull consumer on the
//! tenant's events stream; the variants differ in durability, ack policy
//! and delivery start.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::consumer::{
    AckPolicy, DeliverPolicy, PullConsumer, pull::Config as PullConfig,
};
use fanout_core::{
    Error, Result, pattern::validate_pattern, subjects, validate::validate_identifier,
};
use time::OffsetDateTime;
use tracing::debug;

use crate::registry::StreamRegistry;

/// Per-subscription delivery policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    pub ack_wait: Duration,
    pub max_deliver: i64,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            ack_wait: Duration::from_secs(300),
            max_deliver: 6,
        }
    }
}

impl SubscribeOptions {
    /// max_deliver below one makes no sense; clamp rather than error so
    /// client-supplied values stay forgiving.
    pub fn clamped(mut self) -> Self {
        if self.max_deliver < 1 {
            self.max_deliver = 1;
        }
        self
    }
}

pub struct ConsumerFactory {
    registry: Arc<StreamRegistry>,
}

impl ConsumerFactory {
    pub fn new(registry: Arc<StreamRegistry>) -> Self {
        Self { registry }
    }

    /// Translates topic patterns into filter subjects under the caller's
    /// tenant/project prefix. The prefix is prepended here, never taken
    /// from the caller, so a filter can only see the caller's own events.
    pub fn filter_subjects(
        org: &str,
        project: &str,
        patterns: &[String],
    ) -> Result<Vec<String>> {
        if patterns.is_empty() {
            return Err(Error::invalid("at least one topic filter is required"));
        }
        patterns
            .iter()
            .map(|pattern| {
                validate_pattern(pattern)?;
                Ok(subjects::event_subject(org, project, pattern))
            })
            .collect()
    }

    /// Transient consumer for one live session; the server reclaims it
    /// shortly after the session stops pulling.
    pub async fn ephemeral(
        &self,
        org: &str,
        project: &str,
        patterns: &[String],
        opts: SubscribeOptions,
    ) -> Result<PullConsumer> {
        let opts = opts.clamped();
        let filters = Self::filter_subjects(org, project, patterns)?;
        let stream = self.registry.events_stream(org).await?;
        let consumer = stream
            .create_consumer(PullConfig {
                deliver_policy: DeliverPolicy::New,
                ack_policy: AckPolicy::Explicit,
                ack_wait: opts.ack_wait,
                max_deliver: opts.max_deliver,
                filter_subjects: filters,
                inactive_threshold: Duration::from_secs(60),
                ..Default::default()
            })
            .await
            .map_err(Error::upstream)?;
        debug!(org, project, "ephemeral consumer created");
        Ok(consumer)
    }

    /// Durable group consumer. Sessions naming the same group share one
    /// cursor, so each event goes to exactly one member; the cursor
    /// survives disconnects.
    pub async fn group(
        &self,
        org: &str,
        project: &str,
        group: &str,
        patterns: &[String],
        opts: SubscribeOptions,
    ) -> Result<PullConsumer> {
        let opts = opts.clamped();
        validate_identifier(group, "group")?;
        let filters = Self::filter_subjects(org, project, patterns)?;
        let name = group_consumer_name(group);
        let stream = self.registry.events_stream(org).await?;
        let consumer = stream
            .get_or_create_consumer(
                &name,
                PullConfig {
                    durable_name: Some(name.clone()),
                    deliver_policy: DeliverPolicy::New,
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: opts.ack_wait,
                    max_deliver: opts.max_deliver,
                    filter_subjects: filters,
                    ..Default::default()
                },
            )
            .await
            .map_err(Error::upstream)?;
        debug!(org, project, group, "group consumer bound");
        Ok(consumer)
    }

    /// Durable consumer feeding one webhook subscription.
    pub async fn webhook(
        &self,
        org: &str,
        subscription_id: &str,
        filters: Vec<String>,
        opts: SubscribeOptions,
    ) -> Result<PullConsumer> {
        let opts = opts.clamped();
        let name = webhook_consumer_name(subscription_id);
        let stream = self.registry.events_stream(org).await?;
        let consumer = stream
            .get_or_create_consumer(
                &name,
                PullConfig {
                    durable_name: Some(name.clone()),
                    deliver_policy: DeliverPolicy::New,
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: opts.ack_wait,
                    max_deliver: opts.max_deliver,
                    filter_subjects: filters,
                    ..Default::default()
                },
            )
            .await
            .map_err(Error::upstream)?;
        Ok(consumer)
    }

    /// Throwaway ack-none reader used by history queries; it never holds a
    /// cursor, so durable consumers are undisturbed.
    pub async fn history(
        &self,
        org: &str,
        filter: String,
        from: Option<OffsetDateTime>,
    ) -> Result<PullConsumer> {
        let deliver_policy = match from {
            Some(start_time) => DeliverPolicy::ByStartTime { start_time },
            None => DeliverPolicy::All,
        };
        let stream = self.registry.events_stream(org).await?;
        stream
            .create_consumer(PullConfig {
                deliver_policy,
                ack_policy: AckPolicy::None,
                filter_subject: filter,
                inactive_threshold: Duration::from_secs(30),
                ..Default::default()
            })
            .await
            .map_err(Error::upstream)
    }

    /// Drops a named durable consumer (webhook teardown).
    pub async fn delete_durable(&self, org: &str, name: &str) -> Result<()> {
        let stream = self.registry.events_stream(org).await?;
        stream
            .delete_consumer(name)
            .await
            .map_err(Error::upstream)?;
        Ok(())
    }
}

pub fn group_consumer_name(group: &str) -> String {
    format!("grp-{group}")
}

pub fn webhook_consumer_name(subscription_id: &str) -> String {
    format!("wh-{subscription_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_carry_the_tenant_prefix() {
        let filters = ConsumerFactory::filter_subjects(
            "acme",
            "web",
            &["orders.*".to_string(), "billing.>".to_string()],
        )
        .unwrap();
        assert_eq!(
            filters,
            vec!["events.acme.web.orders.*", "events.acme.web.billing.>"]
        );
    }

    #[test]
    fn a_filter_cannot_name_another_tenant() {
        // Even a pattern that looks like a full subject is nested under the
        // caller's prefix.
        let filters = ConsumerFactory::filter_subjects(
            "tenant-b",
            "web",
            &["events.tenant-a.web.secret.*".to_string()],
        )
        .unwrap();
        assert_eq!(filters, vec!["events.tenant-b.web.events.tenant-a.web.secret.*"]);
    }

    #[test]
    fn empty_and_invalid_filters_are_rejected() {
        assert!(ConsumerFactory::filter_subjects("acme", "web", &[]).is_err());
        assert!(
            ConsumerFactory::filter_subjects("acme", "web", &[">.x".to_string()]).is_err()
        );
    }

    #[test]
    fn options_clamp_max_deliver() {
        let opts = SubscribeOptions {
            ack_wait: Duration::from_secs(1),
            max_deliver: 0,
        }
        .clamped();
        assert_eq!(opts.max_deliver, 1);
    }

    #[test]
    fn consumer_names() {
        assert_eq!(group_consumer_name("billing"), "grp-billing");
        assert_eq!(webhook_consumer_name("sub-1"), "wh-sub-1");
    }
}
