//! A [`Storer`] backed by one container.
//!
//! Reads go to the writer's staged entries first, then to the container
//! snapshot taken at open. Writes go to the writer, which may append to the
//! snapshot's own file (direct mode) or to a separate overlay container.
//!
//! Entry layout:
//!
//! ```text
//! config.json                 repository config (JSON)
//! HEAD, refs/...              references, loose ref format
//! objects/ab/cdef0123...      objects, `<kind> <size>\0<data>`
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use git2::Oid;
use parking_lot::Mutex;

use crate::container::{Archive, ArchiveWriter};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::{self, HEAD, REFS_PREFIX};
use crate::storage::traits::{ConfigStorer, ObjectStorer, ReferenceStorer, Storer};
use crate::storage::types::{Config, EncodedObject, Reference};

const CONFIG_ENTRY: &str = "config.json";
const OBJECTS_PREFIX: &str = "objects/";

fn object_entry(id: Oid) -> String {
    let hex = id.to_string();
    format!("{}{}/{}", OBJECTS_PREFIX, &hex[..2], &hex[2..])
}

fn object_id_from_entry(name: &str) -> Option<Oid> {
    let rest = name.strip_prefix(OBJECTS_PREFIX)?;
    let (dir, file) = rest.split_once('/')?;
    Oid::from_str(&format!("{}{}", dir, file)).ok()
}

/// Object, reference and config storage inside a container.
pub struct ArchiveStorage {
    snapshot: Arc<Archive>,
    writer: Option<Mutex<ArchiveWriter>>,
}

impl ArchiveStorage {
    /// A storage that only reads `snapshot`.
    pub fn read_only(snapshot: Arc<Archive>) -> Self {
        Self {
            snapshot,
            writer: None,
        }
    }

    /// A storage reading `snapshot` and writing through `writer`.
    pub fn read_write(snapshot: Arc<Archive>, writer: ArchiveWriter) -> Self {
        Self {
            snapshot,
            writer: Some(Mutex::new(writer)),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    /// The snapshot this storage reads from.
    pub fn snapshot(&self) -> &Arc<Archive> {
        &self.snapshot
    }

    /// Close the pending block and force it to disk.
    ///
    /// Returns `false` when nothing was pending.
    pub fn sync(&self) -> StorageResult<bool> {
        match &self.writer {
            Some(writer) => Ok(writer.lock().sync()?),
            None => Ok(false),
        }
    }

    /// Bytes appended by the writer since it was opened.
    pub fn appended(&self) -> u64 {
        self.writer
            .as_ref()
            .map(|writer| writer.lock().appended())
            .unwrap_or(0)
    }

    /// Path of the file the writer appends to.
    pub fn writer_path(&self) -> Option<std::path::PathBuf> {
        self.writer
            .as_ref()
            .map(|writer| writer.lock().path().to_path_buf())
    }

    // ==================== Entry Operations ====================

    fn get(&self, name: &str) -> StorageResult<Option<Vec<u8>>> {
        if let Some(writer) = &self.writer {
            match writer.lock().lookup(name) {
                Some(Some(data)) => return Ok(Some(data.to_vec())),
                Some(None) => return Ok(None),
                None => {}
            }
        }

        if self.snapshot.contains(name) {
            Ok(Some(self.snapshot.read(name)?))
        } else {
            Ok(None)
        }
    }

    fn put(&self, name: &str, data: &[u8]) -> StorageResult<()> {
        let writer = self.writer.as_ref().ok_or(StorageError::ReadOnly)?;
        writer.lock().put(name, data)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        let writer = self.writer.as_ref().ok_or(StorageError::ReadOnly)?;
        writer.lock().delete(name)?;
        Ok(())
    }

    fn names(&self, prefix: &str) -> BTreeSet<String> {
        let mut names: BTreeSet<String> =
            self.snapshot.names(prefix).map(str::to_string).collect();

        if let Some(writer) = &self.writer {
            for (name, live) in writer.lock().staged(prefix) {
                if live {
                    names.insert(name.to_string());
                } else {
                    names.remove(name);
                }
            }
        }

        names
    }
}

impl ObjectStorer for ArchiveStorage {
    fn set_encoded_object(&self, object: &EncodedObject) -> StorageResult<Oid> {
        let id = object.id()?;
        let entry = object_entry(id);
        // content addressed: an existing entry already holds these bytes
        if self.get(&entry)?.is_none() {
            self.put(&entry, &object.encode())?;
        }
        Ok(id)
    }

    fn encoded_object(&self, id: Oid) -> StorageResult<EncodedObject> {
        let bytes = self
            .get(&object_entry(id))?
            .ok_or(StorageError::ObjectNotFound(id))?;
        EncodedObject::decode(id, &bytes)
    }

    fn has_encoded_object(&self, id: Oid) -> StorageResult<bool> {
        let entry = object_entry(id);
        if let Some(writer) = &self.writer {
            if let Some(state) = writer.lock().lookup(&entry) {
                return Ok(state.is_some());
            }
        }
        Ok(self.snapshot.contains(&entry))
    }

    fn encoded_object_ids(&self) -> StorageResult<Vec<Oid>> {
        Ok(self
            .names(OBJECTS_PREFIX)
            .iter()
            .filter_map(|name| object_id_from_entry(name))
            .collect())
    }
}

impl ReferenceStorer for ArchiveStorage {
    fn set_reference(&self, reference: &Reference) -> StorageResult<()> {
        refs::validate_name(reference.name())?;
        self.put(reference.name(), &refs::encode(reference))
    }

    fn check_and_set_reference(
        &self,
        new: &Reference,
        old: Option<&Reference>,
    ) -> StorageResult<()> {
        if let Some(old) = old {
            let current = match self.reference(old.name()) {
                Ok(current) => Some(current),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            };
            if current.as_ref() != Some(old) {
                return Err(StorageError::ReferenceChanged(old.name().to_string()));
            }
        }
        self.set_reference(new)
    }

    fn reference(&self, name: &str) -> StorageResult<Reference> {
        refs::validate_name(name)?;
        let bytes = self
            .get(name)?
            .ok_or_else(|| StorageError::ReferenceNotFound(name.to_string()))?;
        refs::decode(name, &bytes)
    }

    fn references(&self) -> StorageResult<Vec<Reference>> {
        let mut names = self.names(REFS_PREFIX);
        if self.get(HEAD)?.is_some() {
            names.insert(HEAD.to_string());
        }

        let mut references = Vec::with_capacity(names.len());
        for name in names {
            if let Some(bytes) = self.get(&name)? {
                references.push(refs::decode(&name, &bytes)?);
            }
        }
        Ok(references)
    }

    fn remove_reference(&self, name: &str) -> StorageResult<()> {
        refs::validate_name(name)?;
        if self.get(name)?.is_some() {
            self.delete(name)?;
        }
        Ok(())
    }
}

impl ConfigStorer for ArchiveStorage {
    fn config(&self) -> StorageResult<Config> {
        match self.get(CONFIG_ENTRY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Config::default()),
        }
    }

    fn set_config(&self, config: &Config) -> StorageResult<()> {
        let bytes = serde_json::to_vec_pretty(config)?;
        self.put(CONFIG_ENTRY, &bytes)
    }
}

impl Storer for ArchiveStorage {}
