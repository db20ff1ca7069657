use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    models::{ExternalId, ItemHandle, SyncOutcome, SyncStatus},
    services::{providers::CollectionApi, retry::RetryPolicy},
};

const SAMPLE_UNMATCHED: usize = 10;

/// One collection inside one external library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub library: String,
    pub collection: String,
}

/// Drives an external collection to an exact ordered membership
///
/// Running it twice with the same input is a no-op the second time: the
/// current members are read first and nothing is written when they already match.
#[derive(Clone)]
pub struct CollectionSynchronizer {
    api: Arc<dyn CollectionApi>,
    retry: RetryPolicy,
}

impl CollectionSynchronizer {
    pub fn new(api: Arc<dyn CollectionApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Converges `target` to `desired`, truncated to `limit`
    ///
    /// Only invalid input is returned as an error. Everything the external
    /// system refuses ends up in the outcome as `CouldNotApply`.
    pub async fn reconcile(
        &self,
        target: &SyncTarget,
        desired: &[ExternalId],
        catalog: &HashMap<ExternalId, ItemHandle>,
        limit: Option<usize>,
    ) -> AppResult<SyncOutcome> {
        if target.library.trim().is_empty() || target.collection.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Library and collection names are required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut handles = Vec::with_capacity(desired.len());
        let mut unmatched = Vec::new();

        for id in desired {
            match catalog.get(id) {
                Some(handle) => {
                    if seen.insert(handle) {
                        handles.push(handle.clone());
                    }
                }
                None => unmatched.push(id.clone()),
            }
        }
        if let Some(limit) = limit {
            handles.truncate(limit);
        }

        let skipped_no_match = unmatched.len();
        unmatched.truncate(SAMPLE_UNMATCHED);

        let outcome = |status: SyncStatus, applied_count: usize| SyncOutcome {
            library: target.library.clone(),
            collection: target.collection.clone(),
            status,
            applied_count,
            skipped_no_match,
            sample_unmatched: unmatched.clone(),
        };

        if handles.is_empty() {
            tracing::info!(
                library = %target.library,
                collection = %target.collection,
                skipped_no_match,
                "No desired items found in library"
            );
            return Ok(outcome(SyncStatus::NoMatches, 0));
        }

        let current = self
            .retry
            .run_or_none("collection.list_members", || {
                self.api
                    .list_collection_members(&target.library, &target.collection)
            })
            .await;

        if current.as_deref() == Some(handles.as_slice()) {
            tracing::info!(
                library = %target.library,
                collection = %target.collection,
                count = handles.len(),
                "Collection already in desired order"
            );
            return Ok(outcome(SyncStatus::Unchanged, handles.len()));
        }

        let replaced = self
            .retry
            .run("collection.replace_members", || {
                self.api
                    .replace_collection_members(&target.library, &target.collection, &handles)
            })
            .await;

        match replaced {
            Ok(()) => {
                tracing::info!(
                    library = %target.library,
                    collection = %target.collection,
                    count = handles.len(),
                    skipped_no_match,
                    "Collection synchronized"
                );
                Ok(outcome(SyncStatus::Applied, handles.len()))
            }
            Err(e @ AppError::InvalidInput(_)) => Err(e),
            Err(e) => {
                tracing::warn!(
                    library = %target.library,
                    collection = %target.collection,
                    error = %e,
                    "Could not apply collection membership"
                );
                Ok(outcome(SyncStatus::CouldNotApply(e.to_string()), 0))
            }
        }
    }
}
