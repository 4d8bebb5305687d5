use std::fmt::Display;

/// Error taxonomy shared by every Fanout crate. Each variant carries a
/// stable machine code so HTTP handlers and WebSocket frames can surface it
/// without string matching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("payload exceeds limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("upstream unavailable: {0}")]
    Upstream(String),
    #[error("transient i/o: {0}")]
    TransientIo(String),
    #[error("poison response: {0}")]
    Poison(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Wraps a transport or log-server failure that callers may retry.
    pub fn upstream(err: impl Display) -> Self {
        Error::Upstream(err.to_string())
    }

    pub fn transient(err: impl Display) -> Self {
        Error::TransientIo(err.to_string())
    }

    /// Stable code used in `{"error","code"}` bodies and `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Error::Unauthorized => "UNAUTHORIZED",
            Error::Forbidden => "FORBIDDEN",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::Upstream(_) => "UPSTREAM",
            Error::TransientIo(_) => "TRANSIENT_IO",
            Error::Poison(_) => "POISON",
        }
    }

    /// True for failures worth one more try before surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::TransientIo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::invalid("x").code(), "INVALID_INPUT");
        assert_eq!(Error::Unauthorized.code(), "UNAUTHORIZED");
        assert_eq!(Error::upstream("nats down").code(), "UPSTREAM");
        assert_eq!(Error::PayloadTooLarge { limit: 1 }.code(), "PAYLOAD_TOO_LARGE");
    }

    #[test]
    fn retryability() {
        assert!(Error::upstream("x").is_retryable());
        assert!(Error::transient("x").is_retryable());
        assert!(!Error::invalid("x").is_retryable());
        assert!(!Error::Forbidden.is_retryable());
    }
}
