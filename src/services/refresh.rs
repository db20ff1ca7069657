use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};

use crate::{
    config::Libraries,
    db::{LedgerStore, SnapshotStore},
    error::{AppError, AppResult},
    models::{
        ExternalId, LedgerEntry, LedgerScope, OrderSnapshot, RefreshReport,
        RefreshStatus, SyncOutcome, SyncStatus,
    },
    services::{
        locks::KeyedLocks,
        ordering::{build_order, OrderPolicy, RatedItem},
        providers::CollectionApi,
        retry::RetryPolicy,
        synchronizer::{CollectionSynchronizer, SyncTarget},
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefreshSettings {
    pub policy: OrderPolicy,
    /// Seeds the order RNG once at startup; entropy when unset
    pub seed: Option<u64>,
    pub collection_limit: Option<usize>,
    pub libraries: Libraries,
}

/// Rebuilds a scope's desired order and pushes it to every library of its kind
pub struct RefreshOrchestrator {
    store: Arc<dyn LedgerStore>,
    snapshots: Arc<dyn SnapshotStore>,
    api: Arc<dyn CollectionApi>,
    synchronizer: CollectionSynchronizer,
    locks: KeyedLocks,
    retry: RetryPolicy,
    settings: RefreshSettings,
    rng: Mutex<StdRng>,
}

impl RefreshOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        snapshots: Arc<dyn SnapshotStore>,
        api: Arc<dyn CollectionApi>,
        locks: KeyedLocks,
        retry: RetryPolicy,
        settings: RefreshSettings,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            synchronizer: CollectionSynchronizer::new(api.clone(), retry),
            store,
            snapshots,
            api,
            locks,
            retry,
            settings,
            rng: Mutex::new(rng),
        }
    }

    fn order(&self, rows: &[LedgerEntry]) -> Vec<ExternalId> {
        let items: Vec<RatedItem> = rows.iter().map(RatedItem::from).collect();
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        build_order(&items, self.settings.policy, &mut *rng)
    }

    async fn eligible_rows(&self, scope: &LedgerScope) -> AppResult<Vec<LedgerEntry>> {
        let rows = self
            .retry
            .run("ledger.list_entries", || self.store.list_entries(scope))
            .await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.is_active() && r.points > 0)
            .collect())
    }

    pub fn policy(&self) -> OrderPolicy {
        self.settings.policy
    }

    /// Desired order for `scope` without touching any external collection
    pub async fn preview_order(&self, scope: &LedgerScope) -> AppResult<Vec<ExternalId>> {
        let rows = self.eligible_rows(scope).await?;
        Ok(self.order(&rows))
    }

    /// Most recently persisted order of `scope`
    pub async fn last_snapshot(&self, scope: &LedgerScope) -> AppResult<Option<OrderSnapshot>> {
        self.snapshots.load(scope).await
    }

    pub async fn refresh(
        &self,
        scope: &LedgerScope,
        limit_override: Option<usize>,
    ) -> AppResult<RefreshReport> {
        if limit_override == Some(0) {
            return Err(AppError::InvalidInput(
                "Collection limit must be greater than zero".to_string(),
            ));
        }

        let _guard = self.locks.lock(scope).await;
        let policy = self.settings.policy;

        let rows = self.eligible_rows(scope).await?;
        if rows.is_empty() {
            tracing::info!(scope = %scope, "No active rows, skipping refresh");
            return Ok(RefreshReport::skipped(scope.clone(), policy, "no_rows"));
        }

        let desired_order = self.order(&rows);
        let libraries = self.settings.libraries.for_kind(scope.media_kind);
        if libraries.is_empty() {
            tracing::warn!(scope = %scope, "No libraries configured for media kind");
            let mut report = RefreshReport::skipped(scope.clone(), policy, "no_libraries");
            report.desired_order = desired_order;
            return Ok(report);
        }

        let limit = limit_override.or(self.settings.collection_limit);
        let mut outcomes: Vec<SyncOutcome> = Vec::with_capacity(libraries.len());

        for library in libraries {
            let target = SyncTarget {
                library: library.clone(),
                collection: scope.collection.clone(),
            };

            let catalog = self
                .retry
                .run("collection.catalog_index", || self.api.catalog_index(library))
                .await;

            let outcome = match catalog {
                Ok(catalog) => {
                    self.synchronizer
                        .reconcile(&target, &desired_order, &catalog, limit)
                        .await?
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, library = %library, error = %e, "Catalog index unavailable");
                    SyncOutcome::could_not_apply(library, &scope.collection, format!("catalog index: {}", e))
                }
            };

            tracing::info!(
                scope = %scope,
                library = %library,
                status = ?outcome.status,
                applied = outcome.applied_count,
                skipped_no_match = outcome.skipped_no_match,
                "Library refreshed"
            );
            outcomes.push(outcome);
        }

        let mut issues = Vec::new();
        let snapshot = OrderSnapshot {
            scope: scope.clone(),
            policy,
            desired_order: desired_order.clone(),
            created_at: Utc::now(),
        };
        let snapshot_persisted = match self
            .retry
            .run("snapshot.save", || self.snapshots.save(&snapshot))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                issues.push(format!("order snapshot not persisted: {}", e));
                false
            }
        };

        let failed = outcomes
            .iter()
            .any(|o| matches!(o.status, SyncStatus::CouldNotApply(_)));
        let all_unmatched = outcomes.iter().all(|o| o.status == SyncStatus::NoMatches);

        let (status, skip_reason) = if failed || !issues.is_empty() {
            (RefreshStatus::Partial, None)
        } else if all_unmatched {
            (RefreshStatus::Skipped, Some("no_matches".to_string()))
        } else {
            (RefreshStatus::Completed, None)
        };

        tracing::info!(scope = %scope, status = ?status, items = desired_order.len(), "Refresh finished");

        Ok(RefreshReport {
            scope: scope.clone(),
            status,
            skip_reason,
            policy,
            desired_order,
            libraries: outcomes,
            snapshot_persisted,
            issues,
        })
    }
}
