//! The JSON subprotocol. Every frame in both directions is a tagged
//! object; unknown or malformed frames never kill the connection, they
//! produce an `error` frame.

use fanout_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe {
        topics: Vec<String>,
        #[serde(default)]
        options: SubscribeFrameOptions,
    },
    Ack {
        id: String,
    },
    Nack {
        id: String,
        #[serde(default)]
        retry_in: Option<String>,
    },
    Ping,
    Unsubscribe,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SubscribeFrameOptions {
    #[serde(default)]
    pub auto_ack: bool,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub max_retries: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    Subscribed,
    Event {
        id: String,
        topic: String,
        data: Value,
        timestamp: String,
        attempt: u64,
        max_attempts: u64,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        ServerFrame::error(err.code(), err.to_string())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"UPSTREAM","message":"frame serialization failed"}"#.into()
        })
    }
}

pub fn parse_client_frame(raw: &str) -> Result<ClientFrame> {
    serde_json::from_str(raw).map_err(|err| Error::invalid(format!("malformed frame: {err}")))
}
