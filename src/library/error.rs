//! Library error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::container::ContainerError;
use crate::library::types::{LocationId, RepositoryId};
use crate::storage::StorageError;
use crate::transaction::TransactionError;

/// Result type for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by libraries, locations and repositories.
#[derive(Debug, Error)]
pub enum Error {
    #[error("repository does not exist: {0}")]
    RepositoryNotExists(RepositoryId),

    #[error("repository already exists: {0}")]
    RepositoryExists(RepositoryId),

    #[error("location does not exist: {0}")]
    LocationNotExists(LocationId),

    #[error("library does not exist: {}", .0.display())]
    LibraryNotExists(PathBuf),

    /// Commit called on a handle without transactional support.
    #[error("repository {0} is not transactional")]
    NonTransactional(RepositoryId),

    /// Commit or close called on a finalized handle.
    #[error("repository {0} is already closed")]
    RepoAlreadyClosed(RepositoryId),

    /// A commit had nothing to write.
    #[error("nothing to commit in repository {0}")]
    EmptyCommit(RepositoryId),

    #[error("invalid id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unreadable metadata {}: {reason}", .path.display())]
    Metadata { path: PathBuf, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat classification of an [`Error`], independent of where it was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RepositoryNotExists,
    RepositoryExists,
    LocationNotExists,
    LibraryNotExists,
    NonTransactional,
    TransactionTimeout,
    RepoAlreadyClosed,
    EmptyCommit,
    MalformedCheckpointData,
    ContainerUnusable,
    CheckpointFileUnusable,
    InvalidId,
    InvalidConfig,
    Metadata,
    Storage,
    Io,
}

impl Error {
    pub(crate) fn invalid_id(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidId {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// The kind of this error, looking through wrapped lower-level errors.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RepositoryNotExists(_) => ErrorKind::RepositoryNotExists,
            Error::RepositoryExists(_) => ErrorKind::RepositoryExists,
            Error::LocationNotExists(_) => ErrorKind::LocationNotExists,
            Error::LibraryNotExists(_) => ErrorKind::LibraryNotExists,
            Error::NonTransactional(_) => ErrorKind::NonTransactional,
            Error::RepoAlreadyClosed(_) => ErrorKind::RepoAlreadyClosed,
            Error::EmptyCommit(_) => ErrorKind::EmptyCommit,
            Error::InvalidId { .. } => ErrorKind::InvalidId,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Metadata { .. } => ErrorKind::Metadata,
            Error::Storage(e) => match e {
                StorageError::AlreadyClosed => ErrorKind::RepoAlreadyClosed,
                StorageError::Container(_) => ErrorKind::ContainerUnusable,
                _ => ErrorKind::Storage,
            },
            Error::Transaction(e) => match e {
                TransactionError::Timeout { .. } => ErrorKind::TransactionTimeout,
                TransactionError::MalformedCheckpointData { .. } => {
                    ErrorKind::MalformedCheckpointData
                }
                TransactionError::CheckpointFileUnusable { .. } => {
                    ErrorKind::CheckpointFileUnusable
                }
                TransactionError::ContainerNotExists(_)
                | TransactionError::ContainerUnusable { .. } => ErrorKind::ContainerUnusable,
            },
            Error::Container(_) => ErrorKind::ContainerUnusable,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if this error indicates the resource doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RepositoryNotExists | ErrorKind::LocationNotExists | ErrorKind::LibraryNotExists
        )
    }

    /// Check if this error is an admission timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::TransactionTimeout
    }
}
