//! Per-manuscript mutual exclusion for document mutations

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::TrackingCode;

/// One async mutex per manuscript, created on first use.
/// Waiting longer than `wait` fails with `ConcurrentMutationConflict`.
#[derive(Debug, Clone)]
pub struct ManuscriptLocks {
    locks: Arc<DashMap<TrackingCode, Arc<Mutex<()>>>>,
    wait: Duration,
}

/// Held for the whole read-transform-write-commit sequence
#[derive(Debug)]
pub struct ManuscriptGuard {
    id: TrackingCode,
    _guard: OwnedMutexGuard<()>,
}

impl ManuscriptGuard {
    pub fn id(&self) -> TrackingCode {
        self.id
    }
}

impl ManuscriptLocks {
    pub fn new(wait: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            wait,
        }
    }

    fn lock_for(&self, id: TrackingCode) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))).value())
    }

    pub async fn acquire(&self, id: TrackingCode) -> Result<ManuscriptGuard> {
        let lock = self.lock_for(id);
        match timeout(self.wait, lock.lock_owned()).await {
            Ok(guard) => {
                debug!("Acquired mutation lock for {}", id);
                Ok(ManuscriptGuard { id, _guard: guard })
            }
            Err(_) => {
                warn!("Mutation lock for {} still held after {:?}", id, self.wait);
                Err(Error::ConcurrentMutationConflict(id))
            }
        }
    }

    /// Fails immediately instead of waiting
    pub fn try_acquire(&self, id: TrackingCode) -> Result<ManuscriptGuard> {
        self.lock_for(id)
            .try_lock_owned()
            .map(|guard| ManuscriptGuard { id, _guard: guard })
            .map_err(|_| Error::ConcurrentMutationConflict(id))
    }

    pub fn is_locked(&self, id: TrackingCode) -> bool {
        self.locks
            .get(&id)
            .map_or(false, |lock| lock.try_lock().is_err())
    }
}
