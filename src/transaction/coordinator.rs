//! Transaction coordinator - single-writer admission per location.
//!
//! Every location has one write permit. A write transaction starts by taking
//! it, waiting at most the configured timeout, and stops by handing it back.
//! While a transaction runs its location is pinned in the registry so it
//! cannot be evicted from under the writer.
//!
//! Readers never take the permit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::registry::LocationRegistry;

/// Default time to wait for a write permit.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A one-slot permit.
#[derive(Debug)]
pub struct Permit {
    available: Mutex<bool>,
    released: Condvar,
}

impl Permit {
    fn new() -> Self {
        Self {
            available: Mutex::new(true),
            released: Condvar::new(),
        }
    }

    /// Take the permit, waiting until `deadline` at most.
    fn acquire(&self, deadline: Instant) -> bool {
        let mut available = self.available.lock();
        while !*available {
            if self.released.wait_until(&mut available, deadline).timed_out() {
                break;
            }
        }
        if !*available {
            return false;
        }
        *available = false;
        true
    }

    fn release(&self) {
        *self.available.lock() = true;
        self.released.notify_one();
    }

    /// Check if the permit can be taken right now.
    pub fn is_available(&self) -> bool {
        *self.available.lock()
    }
}

/// Details of a running transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    /// Unique transaction ID.
    pub tx_id: String,
    pub location: String,
    pub repository: String,
    /// When the permit was granted.
    pub started_at: DateTime<Utc>,
}

/// Grants write permits and pins locations while they are held.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
pub struct TransactionCoordinator<L> {
    inner: Arc<CoordinatorInner<L>>,
}

struct CoordinatorInner<L> {
    timeout: Duration,
    registry: Arc<LocationRegistry<L>>,
    permits: Mutex<HashMap<String, Arc<Permit>>>,
    /// Running transactions by location.
    active: RwLock<HashMap<String, TransactionInfo>>,
}

impl<L> Clone for TransactionCoordinator<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: Clone> TransactionCoordinator<L> {
    pub fn new(registry: Arc<LocationRegistry<L>>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                timeout,
                registry,
                permits: Mutex::new(HashMap::new()),
                active: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn registry(&self) -> &Arc<LocationRegistry<L>> {
        &self.inner.registry
    }

    fn permit(&self, location: &str) -> Arc<Permit> {
        let mut permits = self.inner.permits.lock();
        Arc::clone(
            permits
                .entry(location.to_string())
                .or_insert_with(|| Arc::new(Permit::new())),
        )
    }

    /// Start a write transaction on `location`.
    ///
    /// Blocks until the location's permit is free or the timeout elapses.
    /// The returned guard stops the transaction when dropped.
    pub fn start(
        &self,
        location: &str,
        value: L,
        repository: &str,
    ) -> TransactionResult<TransactionGuard<L>> {
        let permit = self.permit(location);
        let begin = Instant::now();

        if !permit.acquire(begin + self.inner.timeout) {
            let waited = begin.elapsed();
            warn!(
                location,
                repository,
                waited_ms = waited.as_millis() as u64,
                "timed out waiting for write permit"
            );
            return Err(TransactionError::Timeout {
                location: location.to_string(),
                repository: repository.to_string(),
                waited,
            });
        }

        self.inner.registry.pin(location, value);

        let info = TransactionInfo {
            tx_id: Ulid::new().to_string().to_lowercase(),
            location: location.to_string(),
            repository: repository.to_string(),
            started_at: Utc::now(),
        };
        self.inner
            .active
            .write()
            .insert(location.to_string(), info.clone());

        info!(
            tx_id = %info.tx_id,
            location,
            repository,
            waited_ms = begin.elapsed().as_millis() as u64,
            "transaction started"
        );

        Ok(TransactionGuard {
            coordinator: self.clone(),
            permit,
            info,
            stopped: false,
        })
    }

    /// Get the number of running transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// Check if a transaction is running on a location.
    pub fn is_active(&self, location: &str) -> bool {
        self.inner.active.read().contains_key(location)
    }

    /// Get details of the transaction running on a location.
    pub fn transaction_info(&self, location: &str) -> Option<TransactionInfo> {
        self.inner.active.read().get(location).cloned()
    }

    fn stop(&self, info: &TransactionInfo, permit: &Permit) {
        self.inner.active.write().remove(&info.location);
        self.inner.registry.unpin(&info.location);
        permit.release();

        let elapsed = Utc::now() - info.started_at;
        debug!(
            tx_id = %info.tx_id,
            location = %info.location,
            elapsed_ms = elapsed.num_milliseconds(),
            "transaction stopped"
        );
    }
}

impl<L> std::fmt::Debug for TransactionCoordinator<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("timeout", &self.inner.timeout)
            .field("active_count", &self.inner.active.read().len())
            .finish()
    }
}

/// A held write permit. Stops its transaction exactly once.
pub struct TransactionGuard<L: Clone> {
    coordinator: TransactionCoordinator<L>,
    permit: Arc<Permit>,
    info: TransactionInfo,
    stopped: bool,
}

impl<L: Clone> TransactionGuard<L> {
    pub fn info(&self) -> &TransactionInfo {
        &self.info
    }

    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.info.tx_id
    }

    /// Stop the transaction, releasing the permit.
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.coordinator.stop(&self.info, &self.permit);
        }
    }
}

impl<L: Clone> Drop for TransactionGuard<L> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<L: Clone> std::fmt::Debug for TransactionGuard<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("info", &self.info)
            .field("stopped", &self.stopped)
            .finish()
    }
}
