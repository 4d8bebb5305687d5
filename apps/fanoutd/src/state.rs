use std::sync::Arc;

use fanout_dlq::DlqStore;
use fanout_metastore::Metastore;
use fanout_stream::{ConsumerFactory, HistoryReader, Publisher};
use tokio::sync::watch;

use crate::config::Config;
use crate::ledger::LedgerHandle;
use crate::rate::EmitLimiter;
use crate::ws::hub::SessionHub;

/// Everything a handler or worker needs, cloned per task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub meta: Metastore,
    pub publisher: Arc<Publisher>,
    pub consumers: Arc<ConsumerFactory>,
    pub history: Arc<HistoryReader>,
    pub dlq: Arc<DlqStore>,
    pub ledger: LedgerHandle,
    pub hub: Arc<SessionHub>,
    pub limiter: Arc<EmitLimiter>,
    pub client: async_nats::Client,
    /// Flips to true exactly once, at shutdown.
    pub shutdown: watch::Receiver<bool>,
}
