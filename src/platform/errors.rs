use thiserror::Error;

/// Failure reported by a [`RepositoryClient`](super::RepositoryClient) call.
///
/// Every remote failure is surfaced as one of these variants; nothing at the client
/// boundary panics or escapes as an unhandled fault.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("network error during {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("conflict: {message}")]
    Conflict { message: String },

    #[error("rate limited by the platform (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("HTTP {status} from {operation}: {message}")]
    Api {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("could not decode {what}: {message}")]
    Decode { what: String, message: String },
}

impl PlatformError {
    pub fn transport(operation: impl Into<String>, message: impl ToString) -> Self {
        PlatformError::Transport {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub fn decode(what: impl Into<String>, message: impl ToString) -> Self {
        PlatformError::Decode {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
            || matches!(self, PlatformError::Api { status: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, PlatformError::Conflict { .. })
            || matches!(self, PlatformError::Api { status: 409, .. })
    }

    /// Transient failures worth retrying on an idempotent read.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Transport { .. } | PlatformError::RateLimited { .. } => true,
            PlatformError::Api { status, .. } => matches!(status, 500 | 502 | 503 | 504),
            PlatformError::NotFound { .. }
            | PlatformError::Conflict { .. }
            | PlatformError::Decode { .. } => false,
        }
    }
}
