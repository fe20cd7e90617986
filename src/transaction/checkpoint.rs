//! Crash-safe truncation bookmark for a container.
//!
//! Before a writer appends to a container, the container's length is written
//! to a sidecar file next to it. If the process dies before the write is
//! finished, the next [`Checkpoint::new`] on the same container finds the
//! sidecar and truncates the container back to that length.
//!
//! The sidecar exists only while a write is in flight or after a crash:
//!
//! ```text
//! repo.garc              container
//! repo.garc.checkpoint   "48213" (decimal ASCII, no sidecar = clean)
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::transaction::error::{TransactionError, TransactionResult};

/// Suffix appended to the container path to name the sidecar.
pub const CHECKPOINT_SUFFIX: &str = ".checkpoint";

/// Sidecar path for a container.
pub fn sidecar_path(container: &Path) -> PathBuf {
    let mut name = container.as_os_str().to_os_string();
    name.push(CHECKPOINT_SUFFIX);
    PathBuf::from(name)
}

/// Last known-good length of one container.
#[derive(Debug)]
pub struct Checkpoint {
    container: PathBuf,
    sidecar: PathBuf,
    /// `None` when no write is in flight
    offset: Option<u64>,
}

impl Checkpoint {
    /// Open the checkpoint of `container`, recovering from an unfinished write.
    ///
    /// Fails with `ContainerNotExists` when the container is missing and
    /// `create_if_missing` is false. A leftover sidecar is applied right away.
    pub fn new(container: impl AsRef<Path>, create_if_missing: bool) -> TransactionResult<Self> {
        let container = container.as_ref().to_path_buf();
        let sidecar = sidecar_path(&container);

        if container_len(&container)?.is_none() && !create_if_missing {
            return Err(TransactionError::ContainerNotExists(container));
        }

        let mut checkpoint = Self {
            container,
            sidecar,
            offset: None,
        };

        if let Some(offset) = checkpoint.read_sidecar()? {
            warn!(
                container = %checkpoint.container.display(),
                offset,
                "found unfinished write, restoring checkpoint"
            );
            checkpoint.offset = Some(offset);
            checkpoint.apply()?;
        }

        Ok(checkpoint)
    }

    pub fn container_path(&self) -> &Path {
        &self.container
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }

    /// The recorded offset, if a write is in flight.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Record the current container length as the known-good offset.
    pub fn save(&mut self) -> TransactionResult<()> {
        let offset = container_len(&self.container)?.unwrap_or(0);

        let unusable = |source| TransactionError::CheckpointFileUnusable {
            path: self.sidecar.clone(),
            source,
        };
        let mut file = File::create(&self.sidecar).map_err(unusable)?;
        file.write_all(offset.to_string().as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(unusable)?;

        self.offset = Some(offset);
        debug!(container = %self.container.display(), offset, "saved checkpoint");
        Ok(())
    }

    /// Truncate the container to the recorded offset and clear the checkpoint.
    ///
    /// An offset of 0 removes the container altogether. Without a recorded
    /// offset this only clears the sidecar.
    pub fn apply(&mut self) -> TransactionResult<()> {
        if let Some(offset) = self.offset {
            let unusable = |source| TransactionError::ContainerUnusable {
                path: self.container.clone(),
                source,
            };

            if offset == 0 {
                match fs::remove_file(&self.container) {
                    Err(e) if e.kind() != ErrorKind::NotFound => return Err(unusable(e)),
                    _ => {}
                }
            } else {
                let file = OpenOptions::new()
                    .write(true)
                    .open(&self.container)
                    .map_err(unusable)?;
                let len = file.metadata().map_err(unusable)?.len();
                if len > offset {
                    file.set_len(offset)
                        .and_then(|_| file.sync_all())
                        .map_err(unusable)?;
                } else if len < offset {
                    warn!(
                        container = %self.container.display(),
                        len,
                        offset,
                        "container is shorter than its checkpoint"
                    );
                }
            }

            info!(container = %self.container.display(), offset, "applied checkpoint");
        }

        self.reset()
    }

    /// Forget the recorded offset without touching the container.
    pub fn reset(&mut self) -> TransactionResult<()> {
        match fs::remove_file(&self.sidecar) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                return Err(TransactionError::CheckpointFileUnusable {
                    path: self.sidecar.clone(),
                    source: e,
                })
            }
            _ => {}
        }

        if self.offset.take().is_some() {
            debug!(container = %self.container.display(), "reset checkpoint");
        }
        Ok(())
    }

    fn read_sidecar(&self) -> TransactionResult<Option<u64>> {
        read_offset(&self.sidecar)
    }
}

/// Offset saved by a write in flight on `container`, if any.
///
/// Reads the sidecar without applying it, so it is safe to call while
/// another handle owns the checkpoint.
pub fn pending_offset(container: &Path) -> TransactionResult<Option<u64>> {
    read_offset(&sidecar_path(container))
}

fn read_offset(sidecar: &Path) -> TransactionResult<Option<u64>> {
    let content = match fs::read_to_string(sidecar) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TransactionError::CheckpointFileUnusable {
                path: sidecar.to_path_buf(),
                source: e,
            })
        }
    };

    let malformed = || TransactionError::MalformedCheckpointData {
        path: sidecar.to_path_buf(),
        content: content.clone(),
    };
    let offset: i64 = content.trim().parse().map_err(|_| malformed())?;
    u64::try_from(offset).map(Some).map_err(|_| malformed())
}

fn container_len(container: &Path) -> TransactionResult<Option<u64>> {
    match fs::metadata(container) {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TransactionError::ContainerUnusable {
            path: container.to_path_buf(),
            source: e,
        }),
    }
}
