//! Transaction error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors from write admission and crash recovery.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The write permit of a location was not granted in time.
    #[error(
        "transaction for repository {repository} on location {location} not started after {}ms",
        .waited.as_millis()
    )]
    Timeout {
        location: String,
        repository: String,
        waited: Duration,
    },

    /// The container is missing and creating it was not requested.
    #[error("container does not exist: {}", .0.display())]
    ContainerNotExists(PathBuf),

    /// The container could not be inspected or truncated.
    #[error("container {} is unusable: {source}", .path.display())]
    ContainerUnusable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint sidecar could not be read, written or removed.
    #[error("checkpoint file {} is unusable: {source}", .path.display())]
    CheckpointFileUnusable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The checkpoint sidecar holds something other than a byte offset.
    #[error("malformed checkpoint data in {}: {content:?}", .path.display())]
    MalformedCheckpointData { path: PathBuf, content: String },
}

impl TransactionError {
    /// Check if this error is an admission timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransactionError::Timeout { .. })
    }

    /// Check if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
    }

    /// Check if this error is about damaged recovery state.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, TransactionError::MalformedCheckpointData { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = TransactionError::Timeout {
            location: "loc".to_string(),
            repository: "github.com/a/b".to_string(),
            waited: Duration::from_millis(100),
        };
        assert!(timeout.is_timeout());
        assert!(timeout.is_retryable());
        assert!(timeout.to_string().contains("100ms"));

        let malformed = TransactionError::MalformedCheckpointData {
            path: PathBuf::from("repo.garc.checkpoint"),
            content: "-1".to_string(),
        };
        assert!(!malformed.is_retryable());
        assert!(malformed.is_corrupt());
    }
}
