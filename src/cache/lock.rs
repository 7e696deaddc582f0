//! Per-key mutual exclusion for cache writes.
//!
//! One async mutex per cache path, created on first use and dropped from the
//! table once nobody holds or waits on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    table: Arc<Mutex<HashMap<PathBuf, Slot>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `key` is free and takes it.
    pub async fn acquire(&self, key: &Path) -> KeyGuard {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(key.to_path_buf()).or_default().clone()
        };
        let guard = slot.clone().lock_owned().await;
        KeyGuard {
            table: self.table.clone(),
            key: key.to_path_buf(),
            slot,
            guard: Some(guard),
        }
    }

    /// Keys with a live lock entry.
    pub fn active(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }
}

/// Held lock for one key; releases on drop.
#[derive(Debug)]
pub struct KeyGuard {
    table: Arc<Mutex<HashMap<PathBuf, Slot>>>,
    key: PathBuf,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        self.guard.take();
        // The table and this guard hold the only references: no waiters.
        if Arc::strong_count(&self.slot) == 2 {
            table.remove(&self.key);
        }
    }
}
