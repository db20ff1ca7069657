use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::LedgerScope;

/// Per-scope async mutexes
///
/// Passes over the same ledger scope run one at a time; different scopes never
/// contend. Entries are created lazily and pruned once no one holds or waits on them.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<Mutex<HashMap<LedgerScope, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `scope`
    pub async fn lock(&self, scope: &LedgerScope) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(scope.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }
}
