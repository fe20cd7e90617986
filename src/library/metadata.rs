//! Optional version metadata.
//!
//! A library may name a current version, and each container may map version
//! numbers to the container length at which that version ended. Readers are
//! pinned to the closest version not newer than the library's:
//!
//! ```text
//! <root>/library.json       {"version": 2}
//! <container>.json          {"versions": {"1": {"offset": 812, "size": 812},
//!                                         "2": {"offset": 1904, "size": 1092}}}
//! ```
//!
//! An offset of 0 means the container's current state.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::library::error::{Error, Result};

/// File name of the library metadata under the library root.
pub const LIBRARY_METADATA: &str = "library.json";

/// Library-wide metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryMetadata {
    pub version: u64,
}

impl LibraryMetadata {
    pub fn path(root: &Path) -> PathBuf {
        root.join(LIBRARY_METADATA)
    }

    /// Load the metadata of the library at `root`, `None` when absent.
    pub fn load(root: &Path) -> Result<Option<Self>> {
        read_json(&Self::path(root))
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        write_json(&Self::path(root), self)
    }
}

/// Where one version of a container ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Container length at the end of this version.
    pub offset: u64,
    /// Bytes this version added.
    pub size: u64,
}

/// Per-container version table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationMetadata {
    #[serde(default)]
    pub versions: BTreeMap<u64, VersionEntry>,
}

impl LocationMetadata {
    /// Metadata path of a container.
    pub fn path(container: &Path) -> PathBuf {
        let mut name = container.as_os_str().to_os_string();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Load the metadata of `container`, `None` when absent.
    pub fn load(container: &Path) -> Result<Option<Self>> {
        read_json(&Self::path(container))
    }

    pub fn save(&self, container: &Path) -> Result<()> {
        write_json(&Self::path(container), self)
    }

    /// Highest recorded version.
    pub fn last(&self) -> Option<u64> {
        self.versions.keys().next_back().copied()
    }

    /// Highest recorded version not newer than `version`.
    pub fn closest(&self, version: u64) -> Option<u64> {
        self.versions.range(..=version).next_back().map(|(v, _)| *v)
    }

    pub fn version(&self, version: u64) -> Option<&VersionEntry> {
        self.versions.get(&version)
    }

    /// Record that `version` ends at container length `offset`.
    pub fn set_version(&mut self, version: u64, offset: u64) {
        let previous = self
            .versions
            .range(..version)
            .next_back()
            .map(|(_, entry)| entry.offset)
            .unwrap_or(0);
        self.versions.insert(
            version,
            VersionEntry {
                offset,
                size: offset.saturating_sub(previous),
            },
        );
    }

    /// Snapshot end readers of library `version` should see.
    ///
    /// `None` means the latest state.
    pub fn snapshot_end(&self, version: u64) -> Option<u64> {
        let entry = self.version(self.closest(version)?)?;
        if entry.offset == 0 {
            None
        } else {
            Some(entry.offset)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::Metadata {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| Error::Metadata {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_last_and_closest() {
        let mut metadata = LocationMetadata::default();
        assert_eq!(metadata.last(), None);
        assert_eq!(metadata.closest(5), None);

        metadata.set_version(1, 100);
        metadata.set_version(3, 250);
        assert_eq!(metadata.last(), Some(3));
        assert_eq!(metadata.closest(0), None);
        assert_eq!(metadata.closest(2), Some(1));
        assert_eq!(metadata.closest(9), Some(3));
        assert_eq!(metadata.version(3).unwrap().size, 150);
    }

    #[test]
    fn test_snapshot_end() {
        let mut metadata = LocationMetadata::default();
        metadata.set_version(1, 0);
        metadata.set_version(2, 512);
        assert_eq!(metadata.snapshot_end(1), None);
        assert_eq!(metadata.snapshot_end(2), Some(512));
        assert_eq!(metadata.snapshot_end(0), None);
    }

    #[test]
    fn test_json_files() {
        let dir = TempDir::new().unwrap();
        let container = dir.path().join("loc.garc");
        assert_eq!(LocationMetadata::load(&container).unwrap(), None);

        let mut metadata = LocationMetadata::default();
        metadata.set_version(7, 42);
        metadata.save(&container).unwrap();
        assert_eq!(LocationMetadata::load(&container).unwrap(), Some(metadata));

        let raw = fs::read_to_string(dir.path().join("loc.garc.json")).unwrap();
        assert!(raw.contains("\"7\""));

        LibraryMetadata { version: 7 }.save(dir.path()).unwrap();
        assert_eq!(
            LibraryMetadata::load(dir.path()).unwrap(),
            Some(LibraryMetadata { version: 7 })
        );
    }

    #[test]
    fn test_malformed_metadata() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(LIBRARY_METADATA), "{not json").unwrap();
        let err = LibraryMetadata::load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Metadata { .. }));
    }
}
