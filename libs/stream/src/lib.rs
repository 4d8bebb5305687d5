//! The append-log layer: per-tenant JetStream streams, the single write
//! path into them, consumer construction, and read-only history access.

pub mod consumer;
pub mod history;
pub mod publish;
pub mod registry;

use fanout_core::{Error, Event, Result};

pub use consumer::{ConsumerFactory, SubscribeOptions};
pub use history::HistoryReader;
pub use publish::{EmittedEvent, Publisher};
pub use registry::{StreamLimits, StreamRegistry};

/// An event read back from a stream, paired with its assigned sequence.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub event: Event,
    pub sequence: u64,
}

/// Connects to the log server. Unreachable servers fail fast with
/// `Upstream` so boot paths can exit for the supervisor.
pub async fn connect(url: &str) -> Result<async_nats::Client> {
    async_nats::connect(url).await.map_err(Error::upstream)
}
