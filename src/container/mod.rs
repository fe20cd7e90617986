//! Append-only archive containers.
//!
//! A container is a single file holding a sequence of blocks. New content is
//! only ever added by appending a block; nothing is rewritten in place. That
//! property is what the overlay commit and the checkpoint recovery rely on:
//!
//! - committing a transaction is appending the overlay container's bytes to
//!   the base container,
//! - undoing a half-written block is truncating the file back to a length
//!   recorded before the write started.
//!
//! ```text
//!  base.garc                          overlay.garc (temp dir)
//! ┌────────┬────────┬────────┐       ┌────────┐
//! │ block 0│ block 1│ block 2│  +=   │ block 0│   (commit = byte append)
//! └────────┴────────┴────────┘       └────────┘
//!                           ▲
//!                  snapshot end of a reader opened before commit
//! ```

mod archive;
mod error;
pub mod format;
mod writer;

pub use archive::{Archive, EntrySpan};
pub use error::{ContainerError, ContainerResult};
pub use writer::ArchiveWriter;

/// File extension of container files.
pub const EXTENSION: &str = "garc";
