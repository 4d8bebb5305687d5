//! One webhook POST: signing, composition and response classification.
//! The sender is a trait seam so the retry logic is testable without a
//! network.

use std::time::Duration;

use async_trait::async_trait;
use fanout_core::{Error, Event, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// What to do with a delivery given the endpoint's answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// 2xx: done.
    Deliver,
    /// Poison (4xx except 408/429): never retried, never dead-lettered.
    Drop { reason: String },
    /// 5xx, 408, 429, timeout, transport error: back off and redeliver.
    Retry { reason: String },
}

pub fn classify(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Deliver,
        408 | 429 => Disposition::Retry {
            reason: format!("http {status}"),
        },
        400..=499 => Disposition::Drop {
            reason: format!("http {status}"),
        },
        _ => Disposition::Retry {
            reason: format!("http {status}"),
        },
    }
}

/// Hex HMAC-SHA256 of the raw body under the subscription secret.
pub fn signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn delivery_headers(event: &Event, attempt: u64, signature: &str) -> Vec<(String, String)> {
    vec![
        ("content-type".into(), "application/json".into()),
        ("x-fanout-org".into(), event.org_id.clone()),
        ("x-fanout-topic".into(), event.topic.clone()),
        ("x-fanout-event-id".into(), event.id.clone()),
        ("x-fanout-attempt".into(), attempt.to_string()),
        ("x-signature".into(), signature.to_string()),
    ]
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Returns the HTTP status, or the transport failure as a string.
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> std::result::Result<u16, String>;
}

pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::upstream)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpSender {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: &[u8],
    ) -> std::result::Result<u16, String> {
        let mut request = self.client.post(url).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(|err| err.to_string())?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classification_table() {
        assert_eq!(classify(200), Disposition::Deliver);
        assert_eq!(classify(204), Disposition::Deliver);
        assert!(matches!(classify(400), Disposition::Drop { .. }));
        assert!(matches!(classify(404), Disposition::Drop { .. }));
        assert!(matches!(classify(422), Disposition::Drop { .. }));
        assert!(matches!(classify(408), Disposition::Retry { .. }));
        assert!(matches!(classify(429), Disposition::Retry { .. }));
        assert!(matches!(classify(500), Disposition::Retry { .. }));
        assert!(matches!(classify(503), Disposition::Retry { .. }));
    }

    #[test]
    fn signature_matches_known_vector() {
        // RFC-style HMAC-SHA256 test vector.
        let sig = signature("key", b"The quick brown fox jumps over the lazy dog");
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn headers_carry_delivery_context() {
        let event = Event::new("acme", "web", "orders.created", json!({}), Some("evt_9"));
        let headers = delivery_headers(&event, 3, "sig");
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(lookup("x-fanout-org"), Some("acme"));
        assert_eq!(lookup("x-fanout-topic"), Some("orders.created"));
        assert_eq!(lookup("x-fanout-event-id"), Some("evt_9"));
        assert_eq!(lookup("x-fanout-attempt"), Some("3"));
        assert_eq!(lookup("x-signature"), Some("sig"));
    }
}
