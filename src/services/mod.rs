pub mod ingest;
pub mod locks;
pub mod ordering;
pub mod providers;
pub mod reconciler;
pub mod refresh;
pub mod retry;
pub mod synchronizer;

#[cfg(test)]
mod testing;

pub use ingest::{IngestSettings, PerKind, SuggestionIngest};
pub use locks::KeyedLocks;
pub use ordering::{build_order, OrderPolicy, RatedItem};
pub use reconciler::{LedgerReconciler, ReconcilerSettings};
pub use refresh::{RefreshOrchestrator, RefreshSettings};
pub use retry::RetryPolicy;
pub use synchronizer::{CollectionSynchronizer, SyncTarget};
