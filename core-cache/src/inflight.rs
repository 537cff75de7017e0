//! Per-key download coalescing.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Map of per-key locks.
///
/// A fetch of a missing key takes the key's lock, re-checks the cache and
/// only then downloads; a second caller for the same key waits and then
/// observes the hit. Locks for distinct keys never contend.
#[derive(Default)]
pub(crate) struct InFlight {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `key`, shared by every concurrent caller.
    pub(crate) async fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the map entry once no other caller holds or awaits it.
    ///
    /// Must be called after the guard obtained from `lock` is released.
    pub(crate) async fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut map = self.locks.lock().await;
        // map + ours
        if Arc::strong_count(&lock) <= 2 {
            map.remove(key);
        }
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}
