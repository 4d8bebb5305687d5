pub mod backoff;
pub mod delivery;
pub mod worker;

pub use delivery::{HttpSender, WebhookSender};
pub use worker::spawn_engine;
