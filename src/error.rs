use http::StatusCode;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Failure kinds surfaced by the ingestion boundary, the stores and the stats read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Malformed or incomplete inbound batch. Not retried.
    ValidationFailed(String),
    /// The storage medium could not be read or written (including timeouts).
    /// Retried by the caller or by the next aggregation tick.
    StorageUnavailable(String),
    /// Statistics requested before the first completed aggregation pass.
    NotFound(String),
}

impl PipelineError {
    pub fn storage(context: impl Display) -> Self {
        PipelineError::StorageUnavailable(context.to_string())
    }

    pub fn validation(context: impl Display) -> Self {
        PipelineError::ValidationFailed(context.to_string())
    }

    /// Response status the transport reports for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            PipelineError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::StorageUnavailable(_))
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::ValidationFailed(m) => write!(f, "validation failed: {}", m),
            PipelineError::StorageUnavailable(m) => write!(f, "storage unavailable: {}", m),
            PipelineError::NotFound(m) => write!(f, "not found: {}", m),
        }
    }
}

impl Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_transport_status() {
        assert_eq!(PipelineError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(PipelineError::storage("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(PipelineError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(PipelineError::storage("db down").is_retryable());
        assert!(!PipelineError::validation("missing fire_id").is_retryable());
        assert!(!PipelineError::NotFound("stats".into()).is_retryable());
    }
}
