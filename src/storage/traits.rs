//! The storer interface every storage layer implements.
//!
//! A [`Storer`] is the union of an object store, a reference store and a
//! config store. Layers compose by wrapping one storer in another (see
//! [`RootedStorage`](crate::storage::RootedStorage)). Whether a storer can be
//! committed or rolled back is a separate, narrow capability: [`Finalizer`],
//! queried through [`Storer::finalizer`].

use git2::Oid;

use crate::storage::error::StorageResult;
use crate::storage::types::{CommitOutcome, Config, EncodedObject, Reference};

/// Content-addressed object storage.
pub trait ObjectStorer {
    /// Store an object, returning its id.
    fn set_encoded_object(&self, object: &EncodedObject) -> StorageResult<Oid>;

    /// Load an object. Fails with `ObjectNotFound` when it is absent.
    fn encoded_object(&self, id: Oid) -> StorageResult<EncodedObject>;

    /// Check if an object exists.
    fn has_encoded_object(&self, id: Oid) -> StorageResult<bool>;

    /// Ids of every stored object.
    fn encoded_object_ids(&self) -> StorageResult<Vec<Oid>>;
}

/// Named reference storage.
pub trait ReferenceStorer {
    /// Create or overwrite a reference.
    fn set_reference(&self, reference: &Reference) -> StorageResult<()>;

    /// Set `new` only if the stored reference of the same name equals `old`.
    ///
    /// `old == None` makes this an unconditional set. Fails with
    /// `ReferenceChanged` when the stored value differs.
    fn check_and_set_reference(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> StorageResult<()>;

    /// Load a reference. Fails with `ReferenceNotFound` when it is absent.
    fn reference(&self, name: &str) -> StorageResult<Reference>;

    /// Every stored reference, sorted by name.
    fn references(&self) -> StorageResult<Vec<Reference>>;

    /// Remove a reference. Removing an absent reference is not an error.
    fn remove_reference(&self, name: &str) -> StorageResult<()>;
}

/// Repository configuration storage.
pub trait ConfigStorer {
    fn config(&self) -> StorageResult<Config>;

    fn set_config(&self, config: &Config) -> StorageResult<()>;
}

/// Commit / rollback capability of a write storage.
pub trait Finalizer: Send + Sync {
    /// Persist every pending write.
    fn commit(&self) -> StorageResult<CommitOutcome>;

    /// Release the storage, discarding whatever a commit would have persisted.
    fn close(&self) -> StorageResult<()>;
}

/// A complete object, reference and config store.
pub trait Storer: ObjectStorer + ReferenceStorer + ConfigStorer + Send + Sync {
    /// The commit/rollback capability, when this storer has one.
    fn finalizer(&self) -> Option<&dyn Finalizer> {
        None
    }
}
