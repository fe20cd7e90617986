//! Library API - the entry point for opening repositories.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::container::EXTENSION;
use crate::library::error::{Error, Result};
use crate::library::location::{Coordinator, Location, LocationRepositories};
use crate::library::metadata::LibraryMetadata;
use crate::library::options::LibraryOptions;
use crate::library::repository::Repository;
use crate::library::types::{LibraryId, LocationId, Mode, RepositoryId};
use crate::transaction::{LocationRegistry, TransactionCoordinator};

/// A directory of containers.
///
/// Thread-safe: share it between threads behind an `Arc`.
pub struct Library {
    id: LibraryId,
    root: PathBuf,
    options: LibraryOptions,
    /// Library version read-only handles are pinned to.
    version: Option<u64>,
    registry: Arc<LocationRegistry<Arc<Location>>>,
    coordinator: Coordinator,
}

impl Library {
    /// Open the library rooted at an existing directory.
    pub fn open(id: LibraryId, root: impl Into<PathBuf>, options: LibraryOptions) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::LibraryNotExists(root));
        }

        let version = LibraryMetadata::load(&root)?.map(|metadata| metadata.version);
        let registry = Arc::new(LocationRegistry::new(options.registry_cache));
        let coordinator = TransactionCoordinator::new(Arc::clone(&registry), options.timeout);

        info!(
            library = %id,
            root = %root.display(),
            transactional = options.transactional,
            rooted = options.rooted,
            ?version,
            "opened library"
        );

        Ok(Self {
            id,
            root,
            options,
            version,
            registry,
            coordinator,
        })
    }

    /// Open the library at `root`, creating the directory if needed.
    pub fn create(id: LibraryId, root: impl Into<PathBuf>, options: LibraryOptions) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Self::open(id, root, options)
    }

    pub fn id(&self) -> &LibraryId {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &LibraryOptions {
        &self.options
    }

    /// Version read-only handles are pinned to, if the library has one.
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Write the library version. Takes effect for libraries opened afterwards.
    pub fn set_version(&self, version: u64) -> Result<()> {
        LibraryMetadata { version }.save(&self.root)
    }

    /// Number of write transactions currently running.
    pub fn active_transactions(&self) -> usize {
        self.coordinator.active_count()
    }

    // ==================== Locations ====================

    /// Path of the container of location `id`.
    pub fn container_path(&self, id: &LocationId) -> PathBuf {
        let file = format!("{}.{}", id, EXTENSION);
        if self.options.bucket == 0 {
            return self.root.join(file);
        }
        let bucket: String = id.as_str().chars().take(self.options.bucket).collect();
        self.root.join(bucket).join(file)
    }

    /// Open location `id`. Fails with `LocationNotExists` without a container.
    pub fn location(&self, id: &LocationId) -> Result<Arc<Location>> {
        self.registry.get_or_try_insert_with(id.as_str(), || {
            let path = self.container_path(id);
            if !path.is_file() {
                return Err(Error::LocationNotExists(id.clone()));
            }
            Location::open(
                id.clone(),
                path,
                self.options.clone(),
                self.coordinator.clone(),
                self.version,
            )
        })
    }

    /// Open location `id`, creating an empty container when it is missing.
    pub fn add_location(&self, id: &LocationId) -> Result<Arc<Location>> {
        let path = self.container_path(id);
        if !path.is_file() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            OpenOptions::new().create(true).append(true).open(&path)?;
            info!(library = %self.id, location = %id, "created location");
        }
        self.location(id)
    }

    /// Every location of the library, ordered by id.
    pub fn locations(&self) -> Result<Vec<Arc<Location>>> {
        self.location_ids()?
            .iter()
            .map(|id| self.location(id))
            .collect()
    }

    fn location_ids(&self) -> Result<Vec<LocationId>> {
        let depth = if self.options.bucket == 0 { 1 } else { 2 };
        let mut ids = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(depth).max_depth(depth) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match LocationId::new(stem) {
                Ok(id) => ids.push(id),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping container"),
            }
        }

        ids.sort();
        Ok(ids)
    }

    // ==================== Repositories ====================

    /// The location hosting repository `id`, if any.
    pub fn find(&self, id: &RepositoryId) -> Result<Option<Arc<Location>>> {
        for location in self.locations()? {
            if location.has(id)? {
                return Ok(Some(location));
            }
        }
        Ok(None)
    }

    /// Check if any location hosts repository `id`.
    pub fn has(&self, id: &RepositoryId) -> Result<bool> {
        Ok(self.find(id)?.is_some())
    }

    /// Open repository `id` in `mode`.
    pub fn get(&self, id: &RepositoryId, mode: Mode) -> Result<Repository> {
        match self.find(id)? {
            Some(location) => location.get(id, mode),
            None => Err(Error::RepositoryNotExists(id.clone())),
        }
    }

    /// Create repository `id` in the location named after it.
    pub fn init(&self, id: &RepositoryId) -> Result<Repository> {
        if self.has(id)? {
            return Err(Error::RepositoryExists(id.clone()));
        }
        let location = self.add_location(&LocationId::from_repository(id))?;
        location.init(id)
    }

    /// Open repository `id` read-write, creating it when absent.
    pub fn get_or_init(&self, id: &RepositoryId) -> Result<Repository> {
        match self.find(id)? {
            Some(location) => location.get_or_init(id),
            None => self.init(id),
        }
    }

    /// Lazily open every repository of every location.
    pub fn repositories(&self, mode: Mode) -> Result<LibraryRepositories> {
        Ok(LibraryRepositories {
            locations: self.locations()?.into_iter(),
            current: None,
            mode,
        })
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("options", &self.options)
            .field("cached_locations", &self.registry.len())
            .finish()
    }
}

/// Lazy sequence of the repositories of a library.
pub struct LibraryRepositories {
    locations: std::vec::IntoIter<Arc<Location>>,
    current: Option<LocationRepositories>,
    mode: Mode,
}

impl Iterator for LibraryRepositories {
    type Item = Result<Repository>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(repository) = current.next() {
                    return Some(repository);
                }
                self.current = None;
            }

            let location = self.locations.next()?;
            match location.repositories(self.mode) {
                Ok(repositories) => self.current = Some(repositories),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::ErrorKind;
    use crate::storage::{EncodedObject, ObjectStorer, Reference, ReferenceStorer};
    use tempfile::TempDir;

    fn setup(options: LibraryOptions) -> (TempDir, Library) {
        let dir = TempDir::new().unwrap();
        let library = Library::open(LibraryId::new("test").unwrap(), dir.path(), options).unwrap();
        (dir, library)
    }

    fn repo_id(id: &str) -> RepositoryId {
        RepositoryId::new(id).unwrap()
    }

    #[test]
    fn test_open_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = Library::open(
            LibraryId::new("test").unwrap(),
            dir.path().join("missing"),
            LibraryOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LibraryNotExists);
    }

    #[test]
    fn test_create_makes_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested").join("lib");
        let library =
            Library::create(LibraryId::new("test").unwrap(), &root, LibraryOptions::default())
                .unwrap();
        assert!(root.is_dir());
        assert!(library.locations().unwrap().is_empty());
    }

    #[test]
    fn test_container_path_bucket() {
        let (dir, flat) = setup(LibraryOptions::default());
        let id = LocationId::new("abcdef").unwrap();
        assert_eq!(flat.container_path(&id), dir.path().join("abcdef.garc"));

        let bucketed = Library::open(
            LibraryId::new("test").unwrap(),
            dir.path(),
            LibraryOptions::new().bucket(2),
        )
        .unwrap();
        assert_eq!(bucketed.container_path(&id), dir.path().join("ab").join("abcdef.garc"));
    }

    #[test]
    fn test_location_not_exists() {
        let (_dir, library) = setup(LibraryOptions::default());
        let err = library.location(&LocationId::new("nope").unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LocationNotExists);
    }

    #[test]
    fn test_locations_listing() {
        let (dir, library) = setup(LibraryOptions::default());
        library.add_location(&LocationId::new("b").unwrap()).unwrap();
        library.add_location(&LocationId::new("a").unwrap()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not a container").unwrap();

        let ids: Vec<String> = library
            .locations()
            .unwrap()
            .iter()
            .map(|location| location.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_locations_listing_bucketed() {
        let (_dir, library) = setup(LibraryOptions::new().bucket(1));
        library.add_location(&LocationId::new("xy").unwrap()).unwrap();
        library.add_location(&LocationId::new("zw").unwrap()).unwrap();
        assert_eq!(library.locations().unwrap().len(), 2);
    }

    #[test]
    fn test_init_has_get() {
        let (_dir, library) = setup(LibraryOptions::default());
        let id = repo_id("github.com/foo/bar");
        assert!(!library.has(&id).unwrap());
        assert_eq!(
            library.get(&id, Mode::ReadOnly).unwrap_err().kind(),
            ErrorKind::RepositoryNotExists
        );

        let mut repo = library.init(&id).unwrap();
        let blob = repo.storer().set_encoded_object(&EncodedObject::blob("hi")).unwrap();
        repo.storer().set_reference(&Reference::hash("refs/heads/master", blob)).unwrap();
        repo.close().unwrap();

        assert!(library.has(&id).unwrap());
        assert_eq!(library.init(&id).unwrap_err().kind(), ErrorKind::RepositoryExists);

        let reader = library.get(&id, Mode::ReadOnly).unwrap();
        assert_eq!(reader.storer().reference("refs/heads/master").unwrap().target_id(), Some(blob));
        assert!(reader.storer().has_encoded_object(blob).unwrap());
    }

    #[test]
    fn test_commit_non_transactional() {
        let (_dir, library) = setup(LibraryOptions::default());
        let id = repo_id("github.com/foo/bar");
        let mut repo = library.init(&id).unwrap();
        assert_eq!(repo.commit().unwrap_err().kind(), ErrorKind::NonTransactional);
        repo.close().unwrap();
    }

    #[test]
    fn test_commit_read_only() {
        let (_dir, library) = setup(LibraryOptions::new().transactional(true));
        let id = repo_id("github.com/foo/bar");
        library.init(&id).unwrap().commit().unwrap();

        let mut reader = library.get(&id, Mode::ReadOnly).unwrap();
        assert_eq!(reader.commit().unwrap_err().kind(), ErrorKind::NonTransactional);
    }

    #[test]
    fn test_get_or_init() {
        let (_dir, library) = setup(LibraryOptions::new().transactional(true));
        let id = repo_id("github.com/foo/bar");

        library.get_or_init(&id).unwrap().commit().unwrap();
        assert!(library.has(&id).unwrap());

        let repo = library.get_or_init(&id).unwrap();
        assert!(repo.transaction().is_some());
        assert_eq!(library.active_transactions(), 1);
        drop(repo);
        assert_eq!(library.active_transactions(), 0);
    }

    #[test]
    fn test_repositories() {
        let (_dir, library) = setup(LibraryOptions::new().transactional(true));
        for id in ["github.com/a/one", "github.com/a/two"] {
            library.init(&repo_id(id)).unwrap().commit().unwrap();
        }

        let mut ids: Vec<String> = library
            .repositories(Mode::ReadOnly)
            .unwrap()
            .map(|repo| repo.unwrap().id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["github.com/a/one", "github.com/a/two"]);
    }

    #[test]
    fn test_pinned_version() {
        let (dir, library) = setup(LibraryOptions::new().transactional(true));
        let id = repo_id("github.com/foo/bar");
        library.init(&id).unwrap().commit().unwrap();

        for location in library.locations().unwrap() {
            location.pin_version(1).unwrap();
        }
        library.set_version(1).unwrap();

        let mut repo = library.get(&id, Mode::ReadWrite).unwrap();
        let blob = repo.storer().set_encoded_object(&EncodedObject::blob("v2")).unwrap();
        repo.storer().set_reference(&Reference::hash("refs/tags/v2", blob)).unwrap();
        repo.commit().unwrap();

        let pinned = Library::open(
            LibraryId::new("pinned").unwrap(),
            dir.path(),
            LibraryOptions::new().transactional(true),
        )
        .unwrap();
        assert_eq!(pinned.version(), Some(1));
        let reader = pinned.get(&id, Mode::ReadOnly).unwrap();
        assert!(reader.storer().reference("refs/tags/v2").is_err());

        let reader = library.get(&id, Mode::ReadOnly).unwrap();
        assert!(reader.storer().reference("refs/tags/v2").is_ok());
    }
}
