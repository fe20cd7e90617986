//! Write admission and crash recovery.
//!
//! This module holds the pieces that make a write to a container safe:
//! a per-location permit so only one writer runs at a time, a registry that
//! keeps in-flight locations alive, and a checkpoint that can undo a write
//! interrupted by a crash.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TransactionCoordinator                      │
//! │     (one permit per location, timeout, running tx info)     │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                               │
//!                 ▼                               ▼
//!        ┌─────────────────┐             ┌─────────────────┐
//!        │ LocationRegistry│             │   Checkpoint    │
//!        │ (LRU + pinned)  │             │ (per container) │
//!        └─────────────────┘             └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gitarchive::transaction::{Checkpoint, LocationRegistry, TransactionCoordinator};
//!
//! let registry = Arc::new(LocationRegistry::new(10_000));
//! let coordinator = TransactionCoordinator::new(registry, DEFAULT_TIMEOUT);
//!
//! let guard = coordinator.start("location", location, "github.com/a/b")?;
//! checkpoint.save()?;
//! // ... append to the container ...
//! checkpoint.reset()?;
//! guard.stop();
//! ```

mod checkpoint;
mod coordinator;
mod error;
mod registry;

pub use checkpoint::{pending_offset, sidecar_path, Checkpoint, CHECKPOINT_SUFFIX};
pub use coordinator::{
    Permit, TransactionCoordinator, TransactionGuard, TransactionInfo, DEFAULT_TIMEOUT,
};
pub use error::{TransactionError, TransactionResult};
pub use registry::{LocationRegistry, DEFAULT_CAPACITY};
