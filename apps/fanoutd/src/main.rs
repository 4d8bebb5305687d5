mod config;
mod http;
mod ledger;
mod rate;
mod scheduler;
mod state;
mod webhook;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fanout_dlq::DlqStore;
use fanout_metastore::Metastore;
use fanout_stream::{
    ConsumerFactory, HistoryReader, Publisher, StreamLimits, StreamRegistry,
};
use fanout_telemetry::{TelemetryConfig, init_telemetry};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::ledger::spawn_ledger_writer;
use crate::rate::EmitLimiter;
use crate::state::AppState;
use crate::webhook::HttpSender;
use crate::ws::hub::SessionHub;

#[tokio::main]
async fn main() -> Result<()> {
    init_telemetry(TelemetryConfig::from_env("fanoutd", env!("CARGO_PKG_VERSION")))?;
    let config = Arc::new(Config::from_env()?);

    // A dead log server at boot is fatal: exit and let the supervisor retry.
    let client = fanout_stream::connect(&config.nats_url)
        .await
        .context("log server unreachable")?;
    let js = async_nats::jetstream::new(client.clone());
    let registry = Arc::new(StreamRegistry::new(js, StreamLimits::default()));

    let meta = Metastore::open(&config.metastore_path).context("metastore open failed")?;
    for token in &config.tokens {
        meta.insert_token(&token.token, &token.org, &token.project)
            .await
            .context("bootstrap token insert failed")?;
    }

    let (ledger_handle, ledger_task) =
        spawn_ledger_writer(meta.clone(), ledger::DEFAULT_QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        publisher: Arc::new(Publisher::new(registry.clone(), config.max_payload)),
        consumers: Arc::new(ConsumerFactory::new(registry.clone())),
        history: Arc::new(HistoryReader::new(registry.clone())),
        dlq: Arc::new(DlqStore::new(registry.clone())),
        hub: Arc::new(SessionHub::new()),
        limiter: Arc::new(EmitLimiter::new(
            config.emit_rps,
            config.emit_burst,
            rate::parse_overrides(&config.rate_overrides),
        )),
        ledger: ledger_handle,
        meta,
        client,
        shutdown: shutdown_rx,
        config: config.clone(),
    };

    let sender = Arc::new(HttpSender::new(config.webhook_timeout)?);
    let scheduler_task = scheduler::spawn(state.clone());
    let webhook_task = webhook::spawn_engine(state.clone(), sender);

    let router = http::build_router(state.clone());
    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;
    info!("fanoutd listening on {}", config.addr);

    let drain = {
        let shutdown_tx = shutdown_tx.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown requested, draining");
            shutdown_tx.send(true).ok();
        }
    };
    axum::serve(listener, router)
        .with_graceful_shutdown(drain)
        .await?;

    // Sessions saw the drain signal through the watch channel; give the
    // background tasks the same grace sessions get.
    shutdown_tx.send(true).ok();
    let grace = config.shutdown_timeout;
    for (name, task) in [
        ("scheduler", scheduler_task),
        ("webhook engine", webhook_task),
    ] {
        match tokio::time::timeout(grace, task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(task = name, error = %err, "task ended with error"),
            Err(_) => warn!(task = name, "task did not stop within the grace period"),
        }
    }

    // Dropping the state releases the last ledger senders; the writer then
    // drains its queue and exits.
    drop(state);
    if tokio::time::timeout(Duration::from_secs(5), ledger_task)
        .await
        .is_err()
    {
        warn!("ledger writer did not drain in time");
    }

    info!("fanoutd stopped");
    Ok(())
}
