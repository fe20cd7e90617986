//! gitarchive - transactional git repository libraries in archive files
//!
//! This crate stores many independent git repositories while packing groups
//! of them into single append-only container files. Writers get an isolated
//! overlay that is appended to the container on commit; readers keep seeing
//! the container as it was when they opened it.
//!
//! # Example
//!
//! ```no_run
//! use gitarchive::library::{Library, LibraryId, LibraryOptions, RepositoryId};
//!
//! let options = LibraryOptions::new().transactional(true);
//! let library = Library::create(LibraryId::new("local").unwrap(), "./archives", options).unwrap();
//!
//! let mut repo = library.init(&RepositoryId::new("github.com/a/b").unwrap()).unwrap();
//! repo.commit().unwrap();
//! ```

pub mod container;
pub mod library;
pub mod storage;
pub mod transaction;

pub use library::{Error, ErrorKind, Library, LibraryOptions, Mode, Repository, RepositoryId};
