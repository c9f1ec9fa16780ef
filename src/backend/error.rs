//! Backend error types with retry classification.
//!
//! Distinguishes transient upstream failures (worth the orchestrator's single
//! per-turn retry) from permanent ones (fail the turn immediately).

use thiserror::Error;

/// Error from a model backend call or registry lookup.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Required credentials are absent; the backend should have been excluded
    /// from the roster via `is_available`.
    #[error("backend `{backend}` is not configured: missing credentials")]
    Unconfigured { backend: String },

    /// The vendor call failed.
    #[error("upstream failure from `{backend}`: {message}")]
    Upstream {
        backend: String,
        /// HTTP status, when the failure surfaced as a response
        status: Option<u16>,
        message: String,
    },

    /// The caller's cancellation signal fired before the call completed.
    #[error("call cancelled")]
    Cancelled,

    /// The registry has no backend under this identifier.
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),
}

impl BackendError {
    pub fn unconfigured(backend: impl Into<String>) -> Self {
        Self::Unconfigured {
            backend: backend.into(),
        }
    }

    pub fn upstream(
        backend: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::Upstream {
            backend: backend.into(),
            status,
            message: message.into(),
        }
    }

    /// Whether the orchestrator's retry-once policy applies.
    ///
    /// Network-level failures (no status) and transient HTTP statuses are
    /// retryable; auth and bad-request failures are not, and neither are
    /// cancellation or configuration errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Upstream { status, .. } => match status {
                Some(code) => classify_http_status(*code).is_transient(),
                None => true,
            },
            _ => false,
        }
    }
}

/// Classification of upstream HTTP failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    /// Rate limited (429) - transient
    RateLimited,
    /// Server error (500, 502, 503, 504) - transient
    ServerError,
    /// Client error (400, 401, 403, 404) - permanent
    ClientError,
}

impl UpstreamKind {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamKind::RateLimited | UpstreamKind::ServerError)
    }
}

/// Parse HTTP status code into an upstream failure kind.
pub fn classify_http_status(status: u16) -> UpstreamKind {
    match status {
        429 => UpstreamKind::RateLimited,
        500 | 502 | 503 | 504 => UpstreamKind::ServerError,
        400..=499 => UpstreamKind::ClientError,
        _ => UpstreamKind::ServerError,
    }
}
