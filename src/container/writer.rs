//! Append-only container writer.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::container::error::{ContainerError, ContainerResult};
use crate::container::format::{encode_index, Footer, IndexEntry, FOOTER_SIZE};

/// Appends blocks to a container file.
///
/// Entry data is written to the end of the file as soon as it is put; the
/// block index and footer follow on [`flush`](Self::flush). Until then the
/// bytes are unreachable for any reader, which is what makes a crash between
/// the two recoverable by truncation.
#[derive(Debug)]
pub struct ArchiveWriter {
    path: PathBuf,
    file: File,
    /// File length when this writer was opened
    start: u64,
    /// File length when the current block began
    block_start: u64,
    /// Entry data bytes written in the current block
    data_len: u64,
    /// Index of the current block
    index: Vec<IndexEntry>,
    /// Everything written through this writer, `None` for deletions
    staged: BTreeMap<String, Option<Vec<u8>>>,
}

impl ArchiveWriter {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> ContainerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ContainerError::io(&path, e))?;
        let start = file
            .metadata()
            .map_err(|e| ContainerError::io(&path, e))?
            .len();

        Ok(Self {
            path,
            file,
            start,
            block_start: start,
            data_len: 0,
            index: Vec::new(),
            staged: BTreeMap::new(),
        })
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an entry.
    pub fn put(&mut self, name: &str, data: &[u8]) -> ContainerResult<()> {
        self.file
            .write_all(data)
            .map_err(|e| ContainerError::io(&self.path, e))?;

        self.index.retain(|entry| entry.name != name);
        self.index
            .push(IndexEntry::file(name, self.data_len, data.len() as u64));
        self.data_len += data.len() as u64;
        self.staged.insert(name.to_string(), Some(data.to_vec()));
        Ok(())
    }

    /// Record the deletion of an entry.
    pub fn delete(&mut self, name: &str) -> ContainerResult<()> {
        self.index.retain(|entry| entry.name != name);
        self.index.push(IndexEntry::tombstone(name));
        self.staged.insert(name.to_string(), None);
        Ok(())
    }

    /// State of an entry written through this writer.
    ///
    /// `None` when the writer never touched it, `Some(None)` when it was
    /// deleted.
    pub fn lookup(&self, name: &str) -> Option<Option<&[u8]>> {
        self.staged.get(name).map(|data| data.as_deref())
    }

    /// Every entry touched through this writer starting with `prefix`.
    pub fn staged<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, bool)> + 'a {
        self.staged
            .range(prefix.to_string()..)
            .take_while(move |(name, _)| name.starts_with(prefix))
            .map(|(name, data)| (name.as_str(), data.is_some()))
    }

    /// Check if there is anything not yet closed by a block footer.
    pub fn is_dirty(&self) -> bool {
        !self.index.is_empty() || self.data_len > 0
    }

    /// Bytes appended to the file since this writer was opened.
    pub fn appended(&self) -> u64 {
        self.block_start + self.data_len - self.start
    }

    /// Close the current block by writing its index and footer.
    ///
    /// Returns `false` when there was nothing to write.
    pub fn flush(&mut self) -> ContainerResult<bool> {
        if !self.is_dirty() {
            return Ok(false);
        }

        let (index, crc) = encode_index(&self.index);
        let footer = Footer {
            entry_count: self.index.len() as u32,
            index_len: index.len() as u64,
            block_len: self.data_len + index.len() as u64 + FOOTER_SIZE,
            crc,
        };

        self.file
            .write_all(&index)
            .and_then(|_| self.file.write_all(&footer.to_bytes()))
            .map_err(|e| ContainerError::io(&self.path, e))?;

        debug!(
            path = %self.path.display(),
            entries = footer.entry_count,
            bytes = footer.block_len,
            "flushed container block"
        );

        self.block_start += footer.block_len;
        self.data_len = 0;
        self.index.clear();
        Ok(true)
    }

    /// Flush the current block and force it to stable storage.
    pub fn sync(&mut self) -> ContainerResult<bool> {
        let flushed = self.flush()?;
        self.file
            .sync_all()
            .map_err(|e| ContainerError::io(&self.path, e))?;
        Ok(flushed)
    }
}
