//! Object, reference and config storage over containers.
//!
//! Every layer implements [`Storer`]. The layers compose by wrapping:
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      RootedStorage                          │
//! │     (optional: one tenant's namespace of a shared store)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      OverlayStorage                         │
//! │   (read-write: overlay + commit/close, or direct writes)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ArchiveStorage                         │
//! │   (entries of one container: objects/, refs, config.json)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Read-only handles use an [`ArchiveStorage`] over a snapshot directly.
//!
//! # Usage
//!
//! ```ignore
//! use gitarchive::storage::{OverlayStorage, Finalizer, Reference, EncodedObject};
//!
//! let storage = OverlayStorage::new(snapshot, true)?;
//! let id = storage.set_encoded_object(&EncodedObject::blob("hello"))?;
//! storage.set_reference(&Reference::hash("refs/tags/v1", id))?;
//! storage.commit()?;
//! ```

mod archive;
mod error;
pub mod refs;
mod rooted;
mod traits;
mod transactional;
mod types;

pub use archive::ArchiveStorage;
pub use error::{StorageError, StorageResult};
pub use rooted::{logical_name, physical_name, tenant_prefix, RootedStorage};
pub use traits::{ConfigStorer, Finalizer, ObjectStorer, ReferenceStorer, Storer};
pub use transactional::{OverlayState, OverlayStorage};
pub use types::{CommitOutcome, Config, EncodedObject, Reference, ReferenceKind, RemoteConfig};

pub use git2::{ObjectType, Oid};
