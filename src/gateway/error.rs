//! Error types for the completion gateway.

use thiserror::Error;

/// Additional HTTP-level context from failed calls, for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code returned by the service.
    pub http_status: Option<u16>,
    /// Request ID from the service (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Failure classification for one completion call.
///
/// Every outbound call resolves to either a response text or exactly one of
/// these. Only `ServerError` and `NetworkFailure` are retried; the rest fail
/// the call on the first attempt.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// No usable credential - rejected before any network call.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// 4xx from the service. Caller-fixable, not retried.
    #[error("client error: {message}")]
    ClientError {
        message: String,
        context: ErrorContext,
    },

    /// 5xx from the service. Retried, then surfaced.
    #[error("server error: {message}")]
    ServerError {
        message: String,
        context: ErrorContext,
    },

    /// Timeout or connection failure. Retried, then surfaced.
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// The service answered 2xx but the body carried no answer field.
    /// Not retried - the server responded, so another attempt is futile.
    #[error("protocol mismatch: {message}")]
    ProtocolMismatch {
        message: String,
        context: ErrorContext,
    },

    /// Any other transport-level fault.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ErrorKind {
    /// Create a client (4xx) error.
    pub fn client_error(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ClientError {
            message: message.into(),
            context,
        }
    }

    /// Create a server (5xx) error.
    pub fn server_error(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ServerError {
            message: message.into(),
            context,
        }
    }

    /// Create a protocol mismatch error.
    pub fn protocol_mismatch(message: impl Into<String>, context: ErrorContext) -> Self {
        Self::ProtocolMismatch {
            message: message.into(),
            context,
        }
    }

    /// Whether the retry loop should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError { .. } | Self::NetworkFailure(_))
    }

    /// Short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential(_) => "missing_credential",
            Self::ClientError { .. } => "client_error",
            Self::ServerError { .. } => "server_error",
            Self::NetworkFailure(_) => "network_failure",
            Self::ProtocolMismatch { .. } => "protocol_mismatch",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::ClientError { context, .. }
            | Self::ServerError { context, .. }
            | Self::ProtocolMismatch { context, .. } => Some(context),
            Self::MissingCredential(_) | Self::NetworkFailure(_) | Self::Unknown(_) => None,
        }
    }
}

impl From<reqwest::Error> for ErrorKind {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            ErrorKind::NetworkFailure(err.to_string())
        } else {
            ErrorKind::Unknown(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(ErrorKind::server_error("boom", ErrorContext::new()).is_retryable());
        assert!(ErrorKind::NetworkFailure("refused".into()).is_retryable());

        assert!(!ErrorKind::MissingCredential("empty".into()).is_retryable());
        assert!(!ErrorKind::client_error("bad request", ErrorContext::new()).is_retryable());
        assert!(!ErrorKind::protocol_mismatch("no choices", ErrorContext::new()).is_retryable());
        assert!(!ErrorKind::Unknown("weird".into()).is_retryable());
    }

    #[test]
    fn context_only_on_http_classified_errors() {
        let ctx = ErrorContext::new().with_status(503).with_request_id("r1");
        let err = ErrorKind::server_error("unavailable", ctx);
        let got = err.context().expect("server errors carry context");
        assert_eq!(got.http_status, Some(503));
        assert_eq!(got.request_id.as_deref(), Some("r1"));

        assert!(ErrorKind::NetworkFailure("timeout".into())
            .context()
            .is_none());
    }
}
