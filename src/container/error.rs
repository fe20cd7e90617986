//! Container error types

use std::path::PathBuf;

use thiserror::Error;

use crate::container::format::FormatError;

/// Errors reading or writing a container file.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// I/O error on the container file
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A block could not be decoded
    #[error("corrupted container {path} at offset {offset}: {reason}")]
    Corrupt {
        path: PathBuf,
        offset: u64,
        #[source]
        reason: FormatError,
    },

    /// The snapshot end lies past the end of the file
    #[error("container {path} is {len} bytes, shorter than snapshot offset {offset}")]
    SnapshotOutOfRange { path: PathBuf, len: u64, offset: u64 },

    /// An entry was requested that the snapshot does not hold
    #[error("entry not found in container: {0}")]
    EntryNotFound(String),
}

impl ContainerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this error indicates the entry doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContainerError::EntryNotFound(_))
    }

    /// Check if the container content itself is damaged
    pub fn is_corrupt(&self) -> bool {
        matches!(
            self,
            ContainerError::Corrupt { .. } | ContainerError::SnapshotOutOfRange { .. }
        )
    }
}

/// Result type alias for container operations
pub type ContainerResult<T> = Result<T, ContainerError>;
