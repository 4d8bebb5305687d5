//! Lightweight facade around tracing setup and the metrics recorder.
//!
//! ```no_run
//! use fanout_telemetry::{TelemetryConfig, init_telemetry};
//!
//! # fn main() -> anyhow::Result<()> {
//! init_telemetry(TelemetryConfig::from_env("fanoutd", "0.3.2"))?;
//! tracing::info!("telemetry configured");
//! Ok(())
//! # }
//! ```

mod config;
mod context;
mod metrics;
mod tracing_init;

pub use config::TelemetryConfig;
pub use context::TelemetryLabels;
pub use metrics::{record_counter, record_gauge, record_histogram};
pub use tracing_init::init_telemetry;
