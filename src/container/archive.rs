//! Read-only snapshot of a container.
//!
//! An [`Archive`] loads every block index from its snapshot end back to the
//! start of the file once, at open. Later appends to the same file are never
//! seen by an existing snapshot: reads are bounded by the recorded spans.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::container::error::{ContainerError, ContainerResult};
use crate::container::format::{decode_index, Footer, FormatError, FOOTER_SIZE};

/// Absolute position of an entry's data inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySpan {
    pub offset: u64,
    pub size: u64,
}

/// An immutable view of a container as of a given length.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    len: u64,
    blocks: usize,
    entries: BTreeMap<String, EntrySpan>,
    file: Option<Mutex<File>>,
}

impl Archive {
    /// Open the latest snapshot of the container at `path`.
    ///
    /// A missing file opens as an empty archive.
    pub fn open(path: impl AsRef<Path>) -> ContainerResult<Self> {
        Self::open_at(path, None)
    }

    /// Open the snapshot ending at `end`, or the latest one when `end` is `None`.
    pub fn open_at(path: impl AsRef<Path>, end: Option<u64>) -> ContainerResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound && end.unwrap_or(0) == 0 => {
                return Ok(Self::empty(path));
            }
            Err(e) => return Err(ContainerError::io(&path, e)),
        };

        let file_len = file
            .metadata()
            .map_err(|e| ContainerError::io(&path, e))?
            .len();
        let end = end.unwrap_or(file_len);
        if end > file_len {
            return Err(ContainerError::SnapshotOutOfRange {
                path,
                len: file_len,
                offset: end,
            });
        }

        let mut entries = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut blocks = 0;
        let mut pos = end;

        while pos > 0 {
            let corrupt = |reason| ContainerError::Corrupt {
                path: path.clone(),
                offset: pos,
                reason,
            };

            if pos < FOOTER_SIZE {
                return Err(corrupt(FormatError::Truncated));
            }

            let mut raw = [0u8; FOOTER_SIZE as usize];
            read_at(&mut file, &path, pos - FOOTER_SIZE, &mut raw)?;
            let footer = Footer::from_bytes(&raw).map_err(|e| {
                warn!(path = %path.display(), offset = pos, error = %e, "unreadable block footer");
                corrupt(e)
            })?;

            if footer.block_len > pos {
                return Err(corrupt(FormatError::InconsistentLength(format!(
                    "block of {} bytes ends at {}",
                    footer.block_len, pos
                ))));
            }

            let block_start = pos - footer.block_len;
            let mut index = vec![0u8; footer.index_len as usize];
            read_at(&mut file, &path, block_start + footer.data_len(), &mut index)?;
            let block = decode_index(&index, &footer).map_err(corrupt)?;

            // Later records win, both across blocks and within one block.
            for entry in block.into_iter().rev() {
                if !seen.insert(entry.name.clone()) {
                    continue;
                }
                if !entry.is_deleted() {
                    entries.insert(
                        entry.name,
                        EntrySpan {
                            offset: block_start + entry.offset,
                            size: entry.size,
                        },
                    );
                }
            }

            blocks += 1;
            pos = block_start;
        }

        debug!(
            path = %path.display(),
            len = end,
            blocks,
            entries = entries.len(),
            "opened container snapshot"
        );

        Ok(Self {
            path,
            len: end,
            blocks,
            entries,
            file: Some(Mutex::new(file)),
        })
    }

    fn empty(path: PathBuf) -> Self {
        Self {
            path,
            len: 0,
            blocks: 0,
            entries: BTreeMap::new(),
            file: None,
        }
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of the container this snapshot covers.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Check if the snapshot holds no blocks at all.
    pub fn is_empty(&self) -> bool {
        self.blocks == 0
    }

    /// Number of blocks in the snapshot.
    pub fn blocks(&self) -> usize {
        self.blocks
    }

    /// Check if a live entry exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Location of a live entry.
    pub fn span(&self, name: &str) -> Option<EntrySpan> {
        self.entries.get(name).copied()
    }

    /// Names of the live entries starting with `prefix`, in order.
    pub fn names<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .range(prefix.to_string()..)
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.as_str())
    }

    /// Read the data of a live entry.
    pub fn read(&self, name: &str) -> ContainerResult<Vec<u8>> {
        let span = self
            .span(name)
            .ok_or_else(|| ContainerError::EntryNotFound(name.to_string()))?;
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| ContainerError::EntryNotFound(name.to_string()))?;

        let mut buf = vec![0u8; span.size as usize];
        read_at(&mut file.lock(), &self.path, span.offset, &mut buf)?;
        Ok(buf)
    }
}

fn read_at(file: &mut File, path: &Path, offset: u64, buf: &mut [u8]) -> ContainerResult<()> {
    file.seek(SeekFrom::Start(offset))
        .and_then(|_| file.read_exact(buf))
        .map_err(|e| ContainerError::io(path, e))
}
