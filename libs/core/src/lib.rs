//! Shared building blocks for the Fanout event bus: the event envelope,
//! subject helpers, topic patterns, duration parsing and the error taxonomy
//! every other crate maps onto HTTP statuses or frame codes.

pub mod duration;
mod error;
pub mod pattern;
pub mod subjects;
mod types;
pub mod validate;

pub use error::{Error, Result};
pub use types::{
    DeliveryAttempt, DeliveryStatus, Event, ReceiverType, now_rfc3339,
};
