//! Per-tenant token buckets guarding the emit path. Buckets refill
//! continuously; an empty bucket turns into a 429 with a Retry-After hint
//! instead of queueing work we cannot absorb.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use fanout_core::{Error, Result};
use serde::Deserialize;

/// One tenant's refill policy.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub rps: f64,
    pub burst: f64,
}

impl RateLimit {
    fn clamped(self) -> Self {
        Self {
            rps: self.rps.max(0.1),
            burst: self.burst.max(1.0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TenantRateLimit {
    rps: f64,
    burst: f64,
}

/// `FANOUT_RATE_LIMITS` holds per-tenant overrides as JSON:
/// `{"acme": {"rps": 200, "burst": 400}}`. Everyone else gets the default.
pub fn parse_overrides(raw: &str) -> HashMap<String, RateLimit> {
    if raw.trim().is_empty() {
        return HashMap::new();
    }
    serde_json::from_str::<HashMap<String, TenantRateLimit>>(raw)
        .map(|map| {
            map.into_iter()
                .map(|(tenant, cfg)| {
                    (
                        tenant,
                        RateLimit {
                            rps: cfg.rps,
                            burst: cfg.burst,
                        }
                        .clamped(),
                    )
                })
                .collect()
        })
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring malformed FANOUT_RATE_LIMITS");
            HashMap::new()
        })
}

pub struct EmitLimiter {
    default: RateLimit,
    overrides: HashMap<String, RateLimit>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    last: Instant,
}

impl EmitLimiter {
    pub fn new(rps: f64, burst: f64, overrides: HashMap<String, RateLimit>) -> Self {
        Self {
            default: RateLimit { rps, burst }.clamped(),
            overrides,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, org: &str) -> RateLimit {
        self.overrides.get(org).copied().unwrap_or(self.default)
    }

    /// Takes one token for `org` or reports how long until one is due.
    pub fn check(&self, org: &str) -> Result<()> {
        let limit = self.limit_for(org);
        let mut guard = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = guard.entry(org.to_string()).or_insert(Bucket {
            tokens: limit.burst,
            last: Instant::now(),
        });
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * limit.rps).min(limit.burst);
            bucket.last = now;
        }
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        let retry_after_secs = ((1.0 - bucket.tokens) / limit.rps).ceil().max(1.0) as u64;
        Err(Error::RateLimited { retry_after_secs })
    }
}
