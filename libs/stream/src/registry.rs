//! Per-tenant stream bookkeeping. Each tenant owns three logs: live events,
//! dead letters, and deferred webhook retries. All three are created lazily
//! on first use and torn down together when the tenant goes away.

use std::collections::HashSet;
use std::sync::RwLock;
use std::time::Duration;

use async_nats::jetstream::Context as JsContext;
use async_nats::jetstream::stream::{
    Config as StreamConfig, DiscardPolicy, RetentionPolicy, Stream,
};
use fanout_core::{Error, Result, subjects};
use tracing::{debug, info};

/// Retention knobs for the three per-tenant logs.
#[derive(Debug, Clone)]
pub struct StreamLimits {
    pub events_max_age: Duration,
    pub events_max_bytes: i64,
    pub dlq_max_age: Duration,
    pub retry_max_age: Duration,
    /// Window inside which a repeated `Nats-Msg-Id` is swallowed.
    pub duplicate_window: Duration,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            events_max_age: Duration::from_secs(24 * 3600),
            events_max_bytes: 1024 * 1024 * 1024,
            dlq_max_age: Duration::from_secs(7 * 24 * 3600),
            retry_max_age: Duration::from_secs(24 * 3600),
            duplicate_window: Duration::from_secs(120),
        }
    }
}

/// Owns the per-tenant streams. The ready-set read lock is the fast path;
/// stream creation only happens once per tenant per process.
pub struct StreamRegistry {
    js: JsContext,
    limits: StreamLimits,
    ready: RwLock<HashSet<String>>,
}

impl StreamRegistry {
    pub fn new(js: JsContext, limits: StreamLimits) -> Self {
        Self {
            js,
            limits,
            ready: RwLock::new(HashSet::new()),
        }
    }

    pub fn context(&self) -> &JsContext {
        &self.js
    }

    /// Idempotently creates the tenant's three logs. Emits and subscriptions
    /// for a tenant go through here first, so nothing is accepted while the
    /// log server is unreachable.
    pub async fn ensure(&self, org: &str) -> Result<()> {
        {
            let ready = self.ready.read().expect("registry lock poisoned");
            if ready.contains(org) {
                return Ok(());
            }
        }

        self.ensure_events(org).await?;
        self.ensure_dlq(org).await?;
        self.ensure_retry(org).await?;

        let mut ready = self.ready.write().expect("registry lock poisoned");
        if ready.insert(org.to_string()) {
            info!(org, "tenant streams ready");
        }
        Ok(())
    }

    async fn ensure_events(&self, org: &str) -> Result<Stream> {
        let cfg = StreamConfig {
            name: subjects::events_stream_name(org),
            subjects: vec![subjects::events_filter(org)],
            retention: RetentionPolicy::Limits,
            discard: DiscardPolicy::Old,
            max_age: self.limits.events_max_age,
            max_bytes: self.limits.events_max_bytes,
            duplicate_window: self.limits.duplicate_window,
            description: Some(format!("live events for {org}")),
            ..StreamConfig::default()
        };
        self.js
            .get_or_create_stream(cfg)
            .await
            .map_err(Error::upstream)
    }

    async fn ensure_dlq(&self, org: &str) -> Result<Stream> {
        let cfg = StreamConfig {
            name: subjects::dlq_stream_name(org),
            subjects: vec![subjects::dlq_filter(org)],
            retention: RetentionPolicy::Limits,
            discard: DiscardPolicy::Old,
            max_age: self.limits.dlq_max_age,
            description: Some(format!("dead letters for {org}")),
            ..StreamConfig::default()
        };
        self.js
            .get_or_create_stream(cfg)
            .await
            .map_err(Error::upstream)
    }

    async fn ensure_retry(&self, org: &str) -> Result<Stream> {
        let cfg = StreamConfig {
            name: subjects::webhook_retry_stream_name(org),
            subjects: vec![subjects::webhook_retry_filter(org)],
            retention: RetentionPolicy::WorkQueue,
            discard: DiscardPolicy::Old,
            max_age: self.limits.retry_max_age,
            description: Some(format!("deferred webhook retries for {org}")),
            ..StreamConfig::default()
        };
        self.js
            .get_or_create_stream(cfg)
            .await
            .map_err(Error::upstream)
    }

    /// Handle to the tenant's live events stream, creating it if needed.
    pub async fn events_stream(&self, org: &str) -> Result<Stream> {
        self.ensure(org).await?;
        self.js
            .get_stream(subjects::events_stream_name(org))
            .await
            .map_err(Error::upstream)
    }

    pub async fn dlq_stream(&self, org: &str) -> Result<Stream> {
        self.ensure(org).await?;
        self.js
            .get_stream(subjects::dlq_stream_name(org))
            .await
            .map_err(Error::upstream)
    }

    /// Tears down all three logs; JetStream cascades deletion of any bound
    /// consumers.
    pub async fn drop_tenant(&self, org: &str) -> Result<()> {
        for name in [
            subjects::events_stream_name(org),
            subjects::dlq_stream_name(org),
            subjects::webhook_retry_stream_name(org),
        ] {
            match self.js.delete_stream(&name).await {
                Ok(_) => debug!(org, stream = %name, "stream deleted"),
                Err(err) => debug!(org, stream = %name, error = %err, "stream delete skipped"),
            }
        }
        let mut ready = self.ready.write().expect("registry lock poisoned");
        ready.remove(org);
        Ok(())
    }

    /// Whether the tenant's logs were already created by this process.
    pub fn is_ready(&self, org: &str) -> bool {
        self.ready
            .read()
            .expect("registry lock poisoned")
            .contains(org)
    }
}
