pub mod ledger;
pub mod postgres;
pub mod redis;
pub mod snapshot;

pub use ledger::{InMemoryLedgerStore, LedgerStore};
pub use postgres::{create_pool, PgLedgerStore};
pub use redis::create_redis_client;
pub use redis::Cache;
pub use redis::CacheKey;
pub use redis::CacheWriterHandle;
pub use snapshot::{InMemorySnapshotStore, RedisSnapshotStore, SnapshotStore};
