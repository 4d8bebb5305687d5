/// Runtime telemetry settings, resolved once at boot.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// Structured JSON logs (the default); `LOG_FORMAT=text` flips to the
    /// human-readable formatter for local runs.
    pub json_logs: bool,
    pub environment: String,
}

impl TelemetryConfig {
    pub fn from_env(service_name: &str, service_version: &str) -> Self {
        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| !v.eq_ignore_ascii_case("text"))
            .unwrap_or(true);
        let environment = std::env::var("FANOUT_ENV").unwrap_or_else(|_| "local".into());
        Self {
            service_name: service_name.to_string(),
            service_version: service_version.to_string(),
            json_logs,
            environment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[test]
    fn defaults_are_json_and_local() {
        let _guard = env_lock().lock().unwrap();
        unsafe {
            std::env::remove_var("LOG_FORMAT");
            std::env::remove_var("FANOUT_ENV");
        }
        let cfg = TelemetryConfig::from_env("svc", "0.0.1");
        assert!(cfg.json_logs);
        assert_eq!(cfg.environment, "local");
        assert_eq!(cfg.service_name, "svc");
    }

    #[test]
    fn text_format_flips_json_off() {
        let _guard = env_lock().lock().unwrap();
        unsafe {
            std::env::set_var("LOG_FORMAT", "text");
            std::env::set_var("FANOUT_ENV", "staging");
        }
        let cfg = TelemetryConfig::from_env("svc", "0.0.1");
        assert!(!cfg.json_logs);
        assert_eq!(cfg.environment, "staging");
        unsafe {
            std::env::remove_var("LOG_FORMAT");
            std::env::remove_var("FANOUT_ENV");
        }
    }
}
