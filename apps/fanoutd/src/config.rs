use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Engine configuration, resolved from the environment once at boot.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub nats_url: String,
    pub metastore_path: PathBuf,
    pub max_payload: usize,
    pub ack_wait: Duration,
    pub max_deliver: i64,
    pub webhook_ack_wait: Duration,
    pub webhook_timeout: Duration,
    pub webhook_max_deliver: i64,
    pub shutdown_timeout: Duration,
    pub schedule_poll: Duration,
    /// Bootstrap bearer tokens loaded into the metastore at start.
    pub tokens: Vec<BootstrapToken>,
    pub emit_rps: f64,
    pub emit_burst: f64,
    /// Raw per-tenant rate override JSON, parsed by the limiter.
    pub rate_overrides: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapToken {
    pub org: String,
    pub project: String,
    #[serde(skip)]
    pub token: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let addr = env_or("FANOUT_ADDR", "0.0.0.0:8080")
            .parse()
            .context("invalid FANOUT_ADDR")?;
        let nats_url = env_or("NATS_URL", "nats://127.0.0.1:4222");
        let metastore_path = PathBuf::from(env_or("FANOUT_DB", "fanout.db"));
        Ok(Self {
            addr,
            nats_url,
            metastore_path,
            max_payload: env_usize("FANOUT_MAX_PAYLOAD_BYTES", 256 * 1024),
            ack_wait: Duration::from_secs(env_u64("FANOUT_ACK_WAIT_SECS", 300)),
            max_deliver: env_u64("FANOUT_MAX_DELIVER", 6) as i64,
            webhook_ack_wait: Duration::from_secs(env_u64("FANOUT_WEBHOOK_ACK_WAIT_SECS", 30)),
            webhook_timeout: Duration::from_secs(env_u64("FANOUT_WEBHOOK_TIMEOUT_SECS", 10)),
            webhook_max_deliver: env_u64("FANOUT_WEBHOOK_MAX_DELIVER", 6) as i64,
            shutdown_timeout: Duration::from_secs(env_u64("FANOUT_SHUTDOWN_TIMEOUT_SECS", 30)),
            schedule_poll: Duration::from_secs(env_u64("FANOUT_SCHEDULE_POLL_SECS", 10)),
            tokens: parse_tokens(&std::env::var("FANOUT_TOKENS").unwrap_or_default()),
            emit_rps: env_f64("FANOUT_EMIT_RPS", 50.0),
            emit_burst: env_f64("FANOUT_EMIT_BURST", 100.0),
            rate_overrides: std::env::var("FANOUT_RATE_LIMITS").unwrap_or_default(),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// `FANOUT_TOKENS` is a JSON map of token to tenant binding:
/// `{"tok_acme": {"org": "acme", "project": "web"}}`.
fn parse_tokens(raw: &str) -> Vec<BootstrapToken> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    let parsed: BTreeMap<String, BootstrapToken> = match serde_json::from_str(raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring malformed FANOUT_TOKENS");
            return Vec::new();
        }
    };
    parsed
        .into_iter()
        .map(|(token, mut entry)| {
            entry.token = token;
            entry
        })
        .collect()
}
