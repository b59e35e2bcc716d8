//! Exclusive per-catalog locks with bounded waiting.
//!
//! Every read-scan-rewrite sequence against a catalog file runs while holding
//! that catalog's lock. Waiting is capped by a timeout so that contention
//! surfaces as a retryable error instead of a hung request.

use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Error)]
#[error("timed out after {waited:?} waiting for catalog `{name}`")]
pub struct LockTimeout {
    pub name: String,
    pub waited: Duration,
}

/// Held while a catalog is being read or rewritten. Released on drop.
#[derive(Debug)]
pub struct CatalogGuard {
    _guard: OwnedMutexGuard<()>,
}

/// Handle to one catalog's lock. Cloning shares the same underlying mutex.
#[derive(Debug, Clone)]
pub struct CatalogLock {
    name: Arc<str>,
    inner: Arc<AsyncMutex<()>>,
    timeout: Duration,
}

impl CatalogLock {
    pub fn new(name: &str, timeout: Duration) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(AsyncMutex::new(())),
            timeout,
        }
    }

    pub async fn acquire(&self) -> Result<CatalogGuard, LockTimeout> {
        match tokio::time::timeout(self.timeout, self.inner.clone().lock_owned()).await {
            Ok(guard) => Ok(CatalogGuard { _guard: guard }),
            Err(_) => Err(LockTimeout {
                name: self.name.to_string(),
                waited: self.timeout,
            }),
        }
    }
}

/// Lazily created locks keyed by catalog name.
///
/// Entries are never removed: a bucket that is deleted and created again must
/// keep serialising on the same mutex as callers still queued on the old one.
#[derive(Debug, Clone)]
pub struct LockTable {
    slots: Arc<Mutex<HashMap<String, CatalogLock>>>,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn get(&self, name: &str) -> CatalogLock {
        let mut slots = self.slots.lock();
        slots
            .entry(name.to_string())
            .or_insert_with(|| CatalogLock::new(name, self.timeout))
            .clone()
    }
}
