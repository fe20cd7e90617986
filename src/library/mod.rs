//! Libraries, locations and repositories.
//!
//! This is the public surface of the crate. A [`Library`] is a directory of
//! containers; each container is a [`Location`]; a location hosts one or more
//! repositories, opened as [`Repository`] handles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Library                            │
//! │    (root dir, options, location registry, coordinator)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ locations()
//!        ┌─────────────────────┼─────────────────────┐
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │  Location   │       │  Location   │       │  Location   │
//!  │ (a.garc)    │       │ (b.garc)    │       │ (c.garc)    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!        │ get / init
//!        ▼
//!  ┌─────────────────────────────────────┐
//!  │ Repository (mode, storer, permit)   │
//!  └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use gitarchive::library::{Library, LibraryId, LibraryOptions, Mode, RepositoryId};
//! use gitarchive::storage::{EncodedObject, ObjectStorer, Reference, ReferenceStorer};
//!
//! let options = LibraryOptions::new().transactional(true).rooted(true);
//! let library = Library::create(LibraryId::new("local")?, "/srv/archives", options)?;
//!
//! let id = RepositoryId::new("https://github.com/src-d/go-git.git")?;
//! let mut repo = library.get_or_init(&id)?;
//! let blob = repo.storer().set_encoded_object(&EncodedObject::blob("hello"))?;
//! repo.storer().set_reference(&Reference::hash("refs/tags/v1", blob))?;
//! repo.commit()?;
//!
//! let reader = library.get(&id, Mode::ReadOnly)?;
//! assert!(reader.storer().reference("refs/tags/v1").is_ok());
//! # Ok::<(), gitarchive::library::Error>(())
//! ```

mod api;
mod error;
mod location;
mod metadata;
mod options;
mod repository;
mod types;

pub use api::{Library, LibraryRepositories};
pub use error::{Error, ErrorKind, Result};
pub use location::{Location, LocationRepositories};
pub use metadata::{LibraryMetadata, LocationMetadata, VersionEntry, LIBRARY_METADATA};
pub use options::{
    LibraryOptions, ENV_BUCKET, ENV_REGISTRY_CACHE, ENV_ROOTED, ENV_TIMEOUT_MS,
    ENV_TRANSACTIONAL,
};
pub use repository::Repository;
pub use types::{normalize_url, LibraryId, LocationId, Mode, RepositoryId};
