use std::time::Duration;
use thiserror::Error;

use graph::GraphError;

use crate::jobs::{JobId, JobStatus};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extractor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("extractor returned status {0}")]
    Status(u16),

    #[error("malformed extractor output: {0}")]
    MalformedOutput(String),

    #[error("extraction timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {id} is {status} and can no longer be cancelled")]
    NotCancellable { id: JobId, status: JobStatus },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

impl ExtractError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedOutput(msg.into())
    }

    /// Errors worth another attempt against the extractor.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::MalformedOutput(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExtractError::Status(503).is_transient());
        assert!(ExtractError::Status(429).is_transient());
        assert!(!ExtractError::Status(404).is_transient());
        assert!(ExtractError::malformed("not json").is_transient());
        assert!(!ExtractError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn test_timeout_message() {
        let err = ExtractError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "extraction timed out after 1.5s");
    }
}
