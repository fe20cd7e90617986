//! Locations: one container and the repositories inside it.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::container::Archive;
use crate::library::error::{Error, Result};
use crate::library::metadata::LocationMetadata;
use crate::library::options::LibraryOptions;
use crate::library::repository::Repository;
use crate::library::types::{normalize_url, LocationId, Mode, RepositoryId};
use crate::storage::{ArchiveStorage, Config, ConfigStorer, OverlayStorage, RemoteConfig, RootedStorage, Storer};
use crate::transaction::{pending_offset, Checkpoint, TransactionCoordinator, TransactionInfo};

/// Coordinator type shared by all locations of a library.
pub(crate) type Coordinator = TransactionCoordinator<Arc<Location>>;

/// One container file.
///
/// In rooted mode a location hosts any number of repositories, each one a
/// remote in the container's config with its references namespaced by id.
/// Otherwise it hosts a single repository.
pub struct Location {
    id: LocationId,
    path: PathBuf,
    options: LibraryOptions,
    coordinator: Coordinator,
    checkpoint: Mutex<Checkpoint>,
    /// Last snapshot handed out, reused while the container length matches.
    snapshot: Mutex<Option<Arc<Archive>>>,
    /// Snapshot end read-only handles are pinned to.
    pinned_end: Option<u64>,
    /// Repositories created by a write handle that is still open.
    pending_init: Mutex<HashSet<RepositoryId>>,
}

impl Location {
    /// Open the location of an existing container.
    ///
    /// Recovers from an unfinished write first. `version` is the library
    /// version read-only handles are pinned to.
    pub(crate) fn open(
        id: LocationId,
        path: PathBuf,
        options: LibraryOptions,
        coordinator: Coordinator,
        version: Option<u64>,
    ) -> Result<Arc<Self>> {
        let checkpoint = Checkpoint::new(&path, false)?;

        let pinned_end = match version {
            Some(version) => LocationMetadata::load(&path)?.and_then(|m| m.snapshot_end(version)),
            None => None,
        };

        debug!(location = %id, path = %path.display(), ?pinned_end, "opened location");

        Ok(Arc::new(Self {
            id,
            path,
            options,
            coordinator,
            checkpoint: Mutex::new(checkpoint),
            snapshot: Mutex::new(None),
            pinned_end,
            pending_init: Mutex::new(HashSet::new()),
        }))
    }

    pub fn id(&self) -> &LocationId {
        &self.id
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_transactional(&self) -> bool {
        self.options.transactional
    }

    pub fn is_rooted(&self) -> bool {
        self.options.rooted
    }

    /// Details of the write transaction running here, if any.
    pub fn transaction_info(&self) -> Option<TransactionInfo> {
        self.coordinator.transaction_info(self.id.as_str())
    }

    // ==================== Repositories ====================

    /// Check if the location hosts repository `id`.
    ///
    /// True when a remote URL, normalised, equals the id. In non-rooted mode
    /// a non-empty container also hosts the repository named like itself.
    /// A repository being created by an open write handle counts as hosted.
    pub fn has(&self, id: &RepositoryId) -> Result<bool> {
        if self.pending_init.lock().contains(id) {
            return Ok(true);
        }
        let snapshot = self.read_snapshot()?;
        if has_remote(&ArchiveStorage::read_only(Arc::clone(&snapshot)).config()?, id) {
            return Ok(true);
        }
        Ok(!self.options.rooted && !snapshot.is_empty() && id.as_str() == self.id.as_str())
    }

    /// Ids of every hosted repository, read from the current config.
    pub fn repository_ids(&self) -> Result<Vec<RepositoryId>> {
        let snapshot = self.read_snapshot()?;
        let config = ArchiveStorage::read_only(Arc::clone(&snapshot)).config()?;

        let mut ids: Vec<RepositoryId> = config
            .remotes
            .values()
            .filter_map(|remote| remote.urls.first())
            .filter_map(|url| match RepositoryId::new(url) {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(location = %self.id, url = %url, error = %e, "skipping remote");
                    None
                }
            })
            .collect();

        if ids.is_empty() && !self.options.rooted && !snapshot.is_empty() {
            if let Ok(id) = RepositoryId::new(self.id.as_str()) {
                ids.push(id);
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Open repository `id` in `mode`.
    ///
    /// Read-write handles on a transactional location wait for the
    /// location's write permit.
    pub fn get(self: &Arc<Self>, id: &RepositoryId, mode: Mode) -> Result<Repository> {
        if !self.has(id)? {
            return Err(Error::RepositoryNotExists(id.clone()));
        }
        self.open_repository(id, mode)
    }

    /// Create repository `id`, returning a read-write handle.
    ///
    /// The repository exists for other handles once this one is committed
    /// (or closed, when the location is not transactional).
    pub fn init(self: &Arc<Self>, id: &RepositoryId) -> Result<Repository> {
        if self.has(id)? {
            return Err(Error::RepositoryExists(id.clone()));
        }

        let mut repository = self.open_repository(id, Mode::ReadWrite)?;

        // another writer may have created it while we waited for the permit
        let mut config = repository.storer().config()?;
        if has_remote(&config, id) || !self.pending_init.lock().insert(id.clone()) {
            return Err(Error::RepositoryExists(id.clone()));
        }
        repository.set_pending_init();
        config.set_remote(RemoteConfig::new(id.as_str(), id.as_str()));
        repository.storer().set_config(&config)?;

        info!(location = %self.id, repository = %id, "initialized repository");
        Ok(repository)
    }

    /// Open repository `id` read-write, creating it when absent.
    pub fn get_or_init(self: &Arc<Self>, id: &RepositoryId) -> Result<Repository> {
        if self.has(id)? {
            self.open_repository(id, Mode::ReadWrite)
        } else {
            self.init(id)
        }
    }

    /// Lazily open every hosted repository.
    ///
    /// The repository list is read once per call. In transactional mode
    /// read-write handles hold the location's permit, so each one should be
    /// closed before the next is taken.
    pub fn repositories(self: &Arc<Self>, mode: Mode) -> Result<LocationRepositories> {
        Ok(LocationRepositories {
            location: Arc::clone(self),
            ids: self.repository_ids()?.into_iter(),
            mode,
        })
    }

    /// Record the current container length as the end of `version`.
    pub fn pin_version(&self, version: u64) -> Result<()> {
        let len = self.container_len()?;
        let mut metadata = LocationMetadata::load(&self.path)?.unwrap_or_default();
        metadata.set_version(version, len);
        metadata.save(&self.path)?;
        info!(location = %self.id, version, offset = len, "pinned version");
        Ok(())
    }

    /// Version metadata of the container, if any.
    pub fn metadata(&self) -> Result<Option<LocationMetadata>> {
        LocationMetadata::load(&self.path)
    }

    // ==================== Storage ====================

    fn open_repository(self: &Arc<Self>, id: &RepositoryId, mode: Mode) -> Result<Repository> {
        match mode {
            Mode::ReadOnly => {
                let storage = ArchiveStorage::read_only(self.read_snapshot()?);
                Ok(Repository::new(
                    id.clone(),
                    mode,
                    Arc::clone(self),
                    self.wrap(storage, id),
                    None,
                ))
            }
            Mode::ReadWrite => {
                let guard = if self.options.transactional {
                    Some(
                        self.coordinator
                            .start(self.id.as_str(), Arc::clone(self), id.as_str())?,
                    )
                } else {
                    None
                };
                // on failure the guard drops here and releases the permit
                let storage = self.begin_write()?;
                if !self.options.transactional {
                    // keep this instance, and its checkpoint, registered until
                    // the write finishes
                    self.coordinator
                        .registry()
                        .pin(self.id.as_str(), Arc::clone(self));
                }
                Ok(Repository::new(
                    id.clone(),
                    mode,
                    Arc::clone(self),
                    self.wrap(storage, id),
                    guard,
                ))
            }
        }
    }

    fn wrap(&self, storage: impl Storer + 'static, id: &RepositoryId) -> Box<dyn Storer> {
        if self.options.rooted {
            Box::new(RootedStorage::new(Box::new(storage), id.as_str()))
        } else {
            Box::new(storage)
        }
    }

    fn begin_write(&self) -> Result<OverlayStorage> {
        let mut checkpoint = self.checkpoint.lock();
        checkpoint.save()?;

        let storage = self
            .snapshot(None)
            .and_then(|base| Ok(OverlayStorage::new(base, self.options.transactional)?));
        if storage.is_err() {
            if let Err(e) = checkpoint.reset() {
                warn!(location = %self.id, error = %e, "failed to reset checkpoint");
            }
        }
        storage
    }

    /// Settle the checkpoint after a write handle is finalized.
    ///
    /// A successful finalization keeps what was written; a failed one
    /// truncates the container back to its length before the write.
    /// `created` names the repository this write was creating, if any.
    pub(crate) fn finish_write(
        &self,
        created: Option<&RepositoryId>,
        succeeded: bool,
    ) -> Result<()> {
        let result = {
            let mut checkpoint = self.checkpoint.lock();
            let result = if succeeded {
                checkpoint.reset()
            } else {
                checkpoint.apply()
            };
            *self.snapshot.lock() = None;
            result
        };

        if let Some(id) = created {
            self.pending_init.lock().remove(id);
        }
        if !self.options.transactional {
            self.coordinator.registry().unpin(self.id.as_str());
        }
        Ok(result?)
    }

    /// Snapshot for readers.
    ///
    /// While a write is in flight the container may end in a block without a
    /// footer, so readers stop at the offset the write started from.
    fn read_snapshot(&self) -> Result<Arc<Archive>> {
        if self.pinned_end.is_some() {
            return self.snapshot(self.pinned_end);
        }

        let checkpoint = self.checkpoint.lock();
        let end = match checkpoint.offset() {
            Some(offset) => Some(offset),
            // written through another instance of this location
            None => pending_offset(&self.path)?,
        };
        self.snapshot(end)
    }

    fn snapshot(&self, end: Option<u64>) -> Result<Arc<Archive>> {
        let mut cached = self.snapshot.lock();
        let want = match end {
            Some(end) => end,
            None => self.container_len()?,
        };
        if let Some(snapshot) = cached.as_ref() {
            if snapshot.len() == want {
                return Ok(Arc::clone(snapshot));
            }
        }

        let snapshot = Arc::new(Archive::open_at(&self.path, end)?);
        *cached = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    fn container_len(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn has_remote(config: &Config, id: &RepositoryId) -> bool {
    config
        .remotes
        .values()
        .flat_map(|remote| remote.urls.iter())
        .any(|url| normalize_url(url) == id.as_str())
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("transactional", &self.options.transactional)
            .field("rooted", &self.options.rooted)
            .finish()
    }
}

/// Lazy sequence of the repositories of one location.
pub struct LocationRepositories {
    location: Arc<Location>,
    ids: std::vec::IntoIter<RepositoryId>,
    mode: Mode,
}

impl Iterator for LocationRepositories {
    type Item = Result<Repository>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        Some(self.location.open_repository(&id, self.mode))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}
