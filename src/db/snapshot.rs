use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::redis::{Cache, CacheKey};
use crate::error::AppResult;
use crate::models::{LedgerScope, OrderSnapshot};

/// Keeps the latest desired order of each scope for drift detection
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &OrderSnapshot) -> AppResult<()>;

    async fn load(&self, scope: &LedgerScope) -> AppResult<Option<OrderSnapshot>>;
}

/// Snapshots stored as JSON in Redis with a TTL
pub struct RedisSnapshotStore {
    cache: Cache,
    ttl_secs: u64,
}

impl RedisSnapshotStore {
    pub fn new(cache: Cache, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn save(&self, snapshot: &OrderSnapshot) -> AppResult<()> {
        let key = CacheKey::OrderSnapshot(snapshot.scope.clone());
        self.cache.set(&key, snapshot, self.ttl_secs).await
    }

    async fn load(&self, scope: &LedgerScope) -> AppResult<Option<OrderSnapshot>> {
        self.cache
            .get_from_cache(&CacheKey::OrderSnapshot(scope.clone()))
            .await
    }
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<LedgerScope, OrderSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &OrderSnapshot) -> AppResult<()> {
        self.snapshots
            .write()
            .await
            .insert(snapshot.scope.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, scope: &LedgerScope) -> AppResult<Option<OrderSnapshot>> {
        Ok(self.snapshots.read().await.get(scope).cloned())
    }
}
