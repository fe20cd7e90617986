//! Write storage with commit and rollback.
//!
//! In transactional mode every write lands in a throwaway overlay container
//! inside a private temp directory; the base container is only read. Commit
//! copies the finished overlay onto the end of the base container, which is a
//! valid container again because block offsets are block-relative.
//!
//! ```text
//!          reads                      writes
//!            │                          │
//!            ▼                          ▼
//!   ┌─────────────────┐  miss   ┌──────────────────┐
//!   │  overlay (tmp)  │ ──────▶ │  base snapshot   │
//!   └─────────────────┘         └──────────────────┘
//!            │ commit: append overlay bytes to base
//!            ▼
//!   ┌──────────────────────────────────────────────┐
//!   │ base container │ overlay blocks              │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! In direct mode the writer appends straight to the base container and
//! commit only closes the pending block.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Oid;
use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::container::{Archive, ArchiveWriter, EXTENSION};
use crate::storage::archive::ArchiveStorage;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::traits::{ConfigStorer, Finalizer, ObjectStorer, ReferenceStorer, Storer};
use crate::storage::types::{CommitOutcome, Config, EncodedObject, Reference};

/// Lifecycle of a write storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Open,
    Written,
    Committed,
    RolledBack,
}

impl OverlayState {
    /// Check if the storage has been committed or rolled back.
    pub fn is_final(&self) -> bool {
        matches!(self, OverlayState::Committed | OverlayState::RolledBack)
    }
}

/// Read-write storage over a container, optionally isolated by an overlay.
pub struct OverlayStorage {
    store: ArchiveStorage,
    base_path: PathBuf,
    transactional: bool,
    temp: Mutex<Option<TempDir>>,
    state: RwLock<OverlayState>,
}

impl OverlayStorage {
    /// Open a write storage over `base`.
    ///
    /// `base` should be the latest snapshot of its container: in direct mode
    /// new blocks are appended right after it.
    pub fn new(base: Arc<Archive>, transactional: bool) -> StorageResult<Self> {
        let temp = tempfile::Builder::new()
            .prefix("gitarchive-tx-")
            .tempdir()?;
        let base_path = base.path().to_path_buf();

        let writer = if transactional {
            ArchiveWriter::open(temp.path().join(format!("overlay.{}", EXTENSION)))?
        } else {
            ArchiveWriter::open(&base_path)?
        };

        debug!(
            base = %base_path.display(),
            transactional,
            temp = %temp.path().display(),
            "opened write storage"
        );

        Ok(Self {
            store: ArchiveStorage::read_write(base, writer),
            base_path,
            transactional,
            temp: Mutex::new(Some(temp)),
            state: RwLock::new(OverlayState::Open),
        })
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn state(&self) -> OverlayState {
        *self.state.read()
    }

    /// Path of the base container.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Private temp directory, while the storage is not finalized.
    pub fn temp_path(&self) -> Option<PathBuf> {
        self.temp.lock().as_ref().map(|dir| dir.path().to_path_buf())
    }

    // ==================== Guards ====================

    fn read<T>(&self, f: impl FnOnce(&ArchiveStorage) -> StorageResult<T>) -> StorageResult<T> {
        let state = self.state.read();
        if state.is_final() {
            return Err(StorageError::AlreadyClosed);
        }
        f(&self.store)
    }

    fn write<T>(&self, f: impl FnOnce(&ArchiveStorage) -> StorageResult<T>) -> StorageResult<T> {
        let mut state = self.state.write();
        if state.is_final() {
            return Err(StorageError::AlreadyClosed);
        }
        let result = f(&self.store)?;
        *state = OverlayState::Written;
        Ok(result)
    }

    // ==================== Finalization ====================

    fn append_overlay(&self) -> StorageResult<CommitOutcome> {
        self.store.sync()?;
        let bytes = self.store.appended();
        if bytes == 0 {
            return Ok(CommitOutcome::Empty);
        }
        if !self.transactional {
            return Ok(CommitOutcome::Applied { bytes });
        }

        let overlay = self
            .store
            .writer_path()
            .ok_or(StorageError::ReadOnly)?;
        let mut src = File::open(&overlay)?;
        let mut dst = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.base_path)?;
        let copied = std::io::copy(&mut src, &mut dst)?;
        dst.sync_all()?;

        Ok(CommitOutcome::Applied { bytes: copied })
    }

    fn cleanup(&self) {
        if let Some(dir) = self.temp.lock().take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(temp = %path.display(), error = %e, "failed to remove temp directory");
            }
        }
    }
}

impl Finalizer for OverlayStorage {
    fn commit(&self) -> StorageResult<CommitOutcome> {
        let mut state = self.state.write();
        if state.is_final() {
            return Err(StorageError::AlreadyClosed);
        }

        let result = self.append_overlay();
        *state = OverlayState::Committed;
        self.cleanup();

        match &result {
            Ok(CommitOutcome::Applied { bytes }) => {
                info!(base = %self.base_path.display(), bytes, "committed write storage")
            }
            Ok(CommitOutcome::Empty) => {
                debug!(base = %self.base_path.display(), "commit without writes")
            }
            Err(e) => warn!(base = %self.base_path.display(), error = %e, "commit failed"),
        }
        result
    }

    fn close(&self) -> StorageResult<()> {
        let mut state = self.state.write();
        if state.is_final() {
            return Err(StorageError::AlreadyClosed);
        }

        // direct writes are already in the base container; close their block
        let result = self.store.sync().map(|_| ());
        *state = OverlayState::RolledBack;
        self.cleanup();

        debug!(
            base = %self.base_path.display(),
            transactional = self.transactional,
            "closed write storage"
        );
        result
    }
}

impl ObjectStorer for OverlayStorage {
    fn set_encoded_object(&self, object: &EncodedObject) -> StorageResult<Oid> {
        self.write(|store| store.set_encoded_object(object))
    }

    fn encoded_object(&self, id: Oid) -> StorageResult<EncodedObject> {
        self.read(|store| store.encoded_object(id))
    }

    fn has_encoded_object(&self, id: Oid) -> StorageResult<bool> {
        self.read(|store| store.has_encoded_object(id))
    }

    fn encoded_object_ids(&self) -> StorageResult<Vec<Oid>> {
        self.read(|store| store.encoded_object_ids())
    }
}

impl ReferenceStorer for OverlayStorage {
    fn set_reference(&self, reference: &Reference) -> StorageResult<()> {
        self.write(|store| store.set_reference(reference))
    }

    fn check_and_set_reference(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> StorageResult<()> {
        self.write(|store| store.check_and_set_reference(new, old))
    }

    fn reference(&self, name: &str) -> StorageResult<Reference> {
        self.read(|store| store.reference(name))
    }

    fn references(&self) -> StorageResult<Vec<Reference>> {
        self.read(|store| store.references())
    }

    fn remove_reference(&self, name: &str) -> StorageResult<()> {
        self.write(|store| store.remove_reference(name))
    }
}

impl ConfigStorer for OverlayStorage {
    fn config(&self) -> StorageResult<Config> {
        self.read(|store| store.config())
    }

    fn set_config(&self, config: &Config) -> StorageResult<()> {
        self.write(|store| store.set_config(config))
    }
}

impl Storer for OverlayStorage {
    fn finalizer(&self) -> Option<&dyn Finalizer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(transactional: bool) -> (TempDir, PathBuf, OverlayStorage) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repo.garc");
        let base = Arc::new(Archive::open(&path).unwrap());
        let storage = OverlayStorage::new(base, transactional).unwrap();
        (dir, path, storage)
    }

    fn file_len(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    fn tag(storage: &OverlayStorage, name: &str) -> Reference {
        let id = storage
            .set_encoded_object(&EncodedObject::blob(name.as_bytes()))
            .unwrap();
        let reference = Reference::hash(format!("refs/tags/{}", name), id);
        storage.set_reference(&reference).unwrap();
        reference
    }

    #[test]
    fn test_overlay_is_invisible_until_commit() {
        let (_dir, path, storage) = setup(true);
        let reference = tag(&storage, "v1");
        assert_eq!(storage.state(), OverlayState::Written);
        assert_eq!(storage.reference("refs/tags/v1").unwrap(), reference);

        assert_eq!(file_len(&path), 0);
        assert!(!Archive::open(&path).unwrap().contains("refs/tags/v1"));

        let outcome = storage.commit().unwrap();
        assert_eq!(outcome.bytes(), file_len(&path));
        assert!(Archive::open(&path).unwrap().contains("refs/tags/v1"));
    }

    #[test]
    fn test_commit_appends_exactly_the_overlay() {
        let (_dir, path, first) = setup(true);
        tag(&first, "v1");
        first.commit().unwrap();
        let before = file_len(&path);

        let base = Arc::new(Archive::open(&path).unwrap());
        let second = OverlayStorage::new(base, true).unwrap();
        tag(&second, "v2");
        let outcome = second.commit().unwrap();

        assert_eq!(file_len(&path), before + outcome.bytes());
        let archive = Archive::open(&path).unwrap();
        assert!(archive.contains("refs/tags/v1"));
        assert!(archive.contains("refs/tags/v2"));
    }

    #[test]
    fn test_empty_commit() {
        let (_dir, path, storage) = setup(true);
        assert!(storage.commit().unwrap().is_empty());
        assert_eq!(file_len(&path), 0);
    }

    #[test]
    fn test_close_discards_writes() {
        let (_dir, path, storage) = setup(true);
        tag(&storage, "v1");
        storage.close().unwrap();

        assert_eq!(storage.state(), OverlayState::RolledBack);
        assert_eq!(file_len(&path), 0);
    }

    #[test]
    fn test_finalized_storage_rejects_everything() {
        let (_dir, _path, storage) = setup(true);
        storage.commit().unwrap();

        assert!(storage.commit().unwrap_err().is_closed());
        assert!(storage.close().unwrap_err().is_closed());
        assert!(storage.references().unwrap_err().is_closed());
        assert!(storage
            .set_config(&Config::default())
            .unwrap_err()
            .is_closed());
    }

    #[test]
    fn test_temp_dir_removed_on_both_paths() {
        let (_dir, _path, committed) = setup(true);
        let temp = committed.temp_path().unwrap();
        assert!(temp.exists());
        committed.commit().unwrap();
        assert!(!temp.exists());
        assert!(committed.temp_path().is_none());

        let (_dir, _path, rolled_back) = setup(true);
        let temp = rolled_back.temp_path().unwrap();
        tag(&rolled_back, "v1");
        rolled_back.close().unwrap();
        assert!(!temp.exists());
    }

    #[test]
    fn test_direct_mode_writes_to_base() {
        let (_dir, path, storage) = setup(false);
        assert!(!storage.is_transactional());
        tag(&storage, "v1");
        assert!(file_len(&path) > 0);

        let outcome = storage.commit().unwrap();
        assert_eq!(outcome.bytes(), file_len(&path));
        assert!(Archive::open(&path).unwrap().contains("refs/tags/v1"));
    }

    #[test]
    fn test_direct_mode_close_keeps_writes() {
        let (_dir, path, storage) = setup(false);
        tag(&storage, "v1");
        storage.close().unwrap();
        assert!(Archive::open(&path).unwrap().contains("refs/tags/v1"));
    }

    #[test]
    fn test_overlay_tombstone_hides_base() {
        let (_dir, path, first) = setup(true);
        tag(&first, "v1");
        first.commit().unwrap();

        let base = Arc::new(Archive::open(&path).unwrap());
        let second = OverlayStorage::new(base, true).unwrap();
        second.remove_reference("refs/tags/v1").unwrap();
        assert!(second.references().unwrap().is_empty());
        assert!(Archive::open(&path).unwrap().contains("refs/tags/v1"));

        second.commit().unwrap();
        assert!(!Archive::open(&path).unwrap().contains("refs/tags/v1"));
    }
}
