//! The session table. Sessions own their consumers and pending maps; the
//! hub only tracks who is alive, keyed by session id, so shutdown and
//! observability can reach every live session without sharing its state.

use dashmap::DashMap;
use fanout_telemetry::{TelemetryLabels, record_gauge};

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub org_id: String,
    pub project_id: String,
}

#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<String, SessionInfo>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session_id: &str, info: SessionInfo) {
        let org = info.org_id.clone();
        self.sessions.insert(session_id.to_string(), info);
        record_gauge(
            "ws_sessions",
            self.sessions.len() as f64,
            &TelemetryLabels::tenant(org),
        );
    }

    pub fn remove(&self, session_id: &str) {
        if let Some((_, info)) = self.sessions.remove(session_id) {
            record_gauge(
                "ws_sessions",
                self.sessions.len() as f64,
                &TelemetryLabels::tenant(info.org_id),
            );
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_remove() {
        let hub = SessionHub::new();
        assert!(hub.is_empty());
        hub.register(
            "sess_1",
            SessionInfo {
                org_id: "acme".into(),
                project_id: "web".into(),
            },
        );
        assert_eq!(hub.len(), 1);
        hub.remove("sess_1");
        assert!(hub.is_empty());
        // Removing twice is harmless.
        hub.remove("sess_1");
    }
}
