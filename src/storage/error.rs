//! Storage layer error types
//!
//! All errors that can occur during object, reference and config operations
//! are defined here. We use `thiserror` as everywhere else in the crate.

use git2::Oid;
use thiserror::Error;

use crate::container::ContainerError;

/// The main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// Error from the container holding the store
    #[error("container error: {0}")]
    Container(#[from] ContainerError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested object was not found
    #[error("object not found: {0}")]
    ObjectNotFound(Oid),

    /// Stored object bytes could not be decoded
    #[error("corrupted object {id}: {reason}")]
    CorruptedObject { id: String, reason: String },

    /// The specified reference was not found
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// Compare-and-swap on a reference lost against another writer
    #[error("reference has changed: {0}")]
    ReferenceChanged(String),

    /// The reference content is neither a hash nor a symbolic reference,
    /// or cannot be mapped into the caller's namespace
    #[error("invalid reference type for {name}: {reason}")]
    InvalidReferenceType { name: String, reason: String },

    /// The reference name is not accepted by this store
    #[error("invalid reference name: {0}")]
    InvalidReferenceName(String),

    /// The store has already been committed or closed
    #[error("storage already closed")]
    AlreadyClosed,

    /// Write attempted on a read-only store
    #[error("storage is read-only")]
    ReadOnly,
}

impl StorageError {
    /// Check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectNotFound(_) | StorageError::ReferenceNotFound(_) => true,
            StorageError::Container(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error is a lost update
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::ReferenceChanged(_))
    }

    /// Check if the store was used after being finalized
    pub fn is_closed(&self) -> bool {
        matches!(self, StorageError::AlreadyClosed)
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::ReferenceNotFound("refs/heads/main".to_string());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());

        let changed = StorageError::ReferenceChanged("HEAD".to_string());
        assert!(!changed.is_not_found());
        assert!(changed.is_conflict());

        let missing_entry = StorageError::from(ContainerError::EntryNotFound("x".to_string()));
        assert!(missing_entry.is_not_found());

        assert!(StorageError::AlreadyClosed.is_closed());
    }
}
