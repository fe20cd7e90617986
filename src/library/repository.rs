//! Repository handles.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::library::error::{Error, Result};
use crate::library::location::Location;
use crate::library::types::{LocationId, Mode, RepositoryId};
use crate::storage::{CommitOutcome, Storer};
use crate::transaction::{TransactionGuard, TransactionInfo};

/// An open repository.
///
/// Read-only handles see the container as it was when they were opened.
/// Read-write handles on a transactional location hold the location's write
/// permit until [`commit`](Self::commit) or [`close`](Self::close); dropping
/// an unfinished handle closes it.
pub struct Repository {
    id: RepositoryId,
    mode: Mode,
    location: Arc<Location>,
    storer: Box<dyn Storer>,
    guard: Option<TransactionGuard<Arc<Location>>>,
    /// This handle is creating the repository.
    pending_init: bool,
    closed: bool,
}

impl Repository {
    pub(crate) fn new(
        id: RepositoryId,
        mode: Mode,
        location: Arc<Location>,
        storer: Box<dyn Storer>,
        guard: Option<TransactionGuard<Arc<Location>>>,
    ) -> Self {
        debug!(
            repository = %id,
            location = %location.id(),
            %mode,
            tx_id = guard.as_ref().map(|g| g.id()),
            "opened repository"
        );
        Self {
            id,
            mode,
            location,
            storer,
            guard,
            pending_init: false,
            closed: false,
        }
    }

    pub fn id(&self) -> &RepositoryId {
        &self.id
    }

    pub fn location_id(&self) -> &LocationId {
        self.location.id()
    }

    pub fn location(&self) -> &Arc<Location> {
        &self.location
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Objects, references and config of this repository.
    pub fn storer(&self) -> &dyn Storer {
        self.storer.as_ref()
    }

    /// Check if the handle was committed or closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The write transaction this handle holds, if any.
    pub fn transaction(&self) -> Option<&TransactionInfo> {
        self.guard.as_ref().map(|guard| guard.info())
    }

    /// Persist every write made through this handle and release it.
    ///
    /// Only read-write handles on a transactional location can commit. A
    /// commit without writes succeeds with [`CommitOutcome::Empty`]. When
    /// the commit fails the container is truncated back to its state before
    /// the transaction.
    pub fn commit(&mut self) -> Result<CommitOutcome> {
        if self.closed {
            return Err(Error::RepoAlreadyClosed(self.id.clone()));
        }
        if self.mode.is_read_only() || !self.location.is_transactional() {
            return Err(Error::NonTransactional(self.id.clone()));
        }
        self.closed = true;

        let result = match self.storer.finalizer() {
            Some(finalizer) => finalizer.commit(),
            None => Ok(CommitOutcome::Empty),
        };
        let finished = self.location.finish_write(self.created(), result.is_ok());
        self.release();

        let outcome = result?;
        finished?;
        info!(
            repository = %self.id,
            location = %self.location.id(),
            bytes = outcome.bytes(),
            "committed repository"
        );
        Ok(outcome)
    }

    /// Like [`commit`](Self::commit), but a commit without writes is an
    /// [`Error::EmptyCommit`]. Returns the number of bytes committed.
    pub fn commit_checked(&mut self) -> Result<u64> {
        match self.commit()? {
            CommitOutcome::Applied { bytes } => Ok(bytes),
            CommitOutcome::Empty => Err(Error::EmptyCommit(self.id.clone())),
        }
    }

    /// Release the handle.
    ///
    /// On a transactional read-write handle this discards every write. A
    /// non-transactional read-write handle keeps its writes, which are
    /// already in the container.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::RepoAlreadyClosed(self.id.clone()));
        }
        self.closed = true;

        if self.mode.is_read_only() {
            debug!(repository = %self.id, "closed read-only repository");
            return Ok(());
        }

        let result = match self.storer.finalizer() {
            Some(finalizer) => finalizer.close(),
            None => Ok(()),
        };
        let finished = self.location.finish_write(self.created(), result.is_ok());
        self.release();

        result?;
        finished?;
        debug!(
            repository = %self.id,
            transactional = self.location.is_transactional(),
            "closed repository"
        );
        Ok(())
    }

    pub(crate) fn set_pending_init(&mut self) {
        self.pending_init = true;
    }

    fn created(&self) -> Option<&RepositoryId> {
        self.pending_init.then_some(&self.id)
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.stop();
        }
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!(repository = %self.id, error = %e, "failed to close repository");
            }
        }
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.id)
            .field("location", self.location.id())
            .field("mode", &self.mode)
            .field("closed", &self.closed)
            .finish()
    }
}
