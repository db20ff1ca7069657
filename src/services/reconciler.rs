use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::{
    db::LedgerStore,
    error::{AppError, AppResult},
    models::{
        DownloadApproval, EntryStatus, ExternalId, LedgerCounts, LedgerEntry, LedgerScope,
        PassMarker, ReconcileSummary, Suggestion, SuggestionBatch,
    },
    services::{locks::KeyedLocks, retry::RetryPolicy},
};

pub const DEFAULT_MAX_POINTS: u32 = 50;
pub const DEFAULT_REPLAY_WINDOW_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerSettings {
    pub max_points: u32,
    /// New pending rows wait for an explicit approval before any download
    pub approval_required: bool,
    /// A repeated batch fingerprint inside this window does not decay the ledger again
    pub replay_window_secs: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            max_points: DEFAULT_MAX_POINTS,
            approval_required: false,
            replay_window_secs: DEFAULT_REPLAY_WINDOW_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Upsert(LedgerEntry),
    Delete(ExternalId),
}

impl Mutation {
    fn id(&self) -> &ExternalId {
        match self {
            Mutation::Upsert(entry) => &entry.external_id,
            Mutation::Delete(id) => id,
        }
    }
}

/// Which summary counter a committed mutation feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    CreatedActive,
    CreatedPending,
    ActivatedFromPending,
    ToppedUp,
    StillPending,
    Decayed,
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub mutation: Mutation,
    pub effect: Effect,
}

/// Computes every mutation of one pass without touching storage
///
/// `rows` is the full ledger of the scope and `candidates` the batch after
/// rejects were removed. With `replay` set, candidates are still topped up and
/// merged but nothing decays or gets evicted.
pub fn plan_pass(
    rows: &[LedgerEntry],
    candidates: &[Suggestion],
    max_points: u32,
    approval_required: bool,
    now: DateTime<Utc>,
    replay: bool,
) -> Vec<PlannedChange> {
    let existing: BTreeMap<&ExternalId, &LedgerEntry> =
        rows.iter().map(|row| (&row.external_id, row)).collect();
    let mut touched: HashSet<&ExternalId> = HashSet::with_capacity(candidates.len());
    let mut changes = Vec::with_capacity(rows.len() + candidates.len());

    for suggestion in candidates {
        touched.insert(&suggestion.external_id);

        let change = match existing.get(&suggestion.external_id) {
            None => {
                let entry =
                    LedgerEntry::from_suggestion(suggestion, max_points, approval_required, now);
                let effect = if entry.is_active() {
                    Effect::CreatedActive
                } else {
                    Effect::CreatedPending
                };
                PlannedChange {
                    mutation: Mutation::Upsert(entry),
                    effect,
                }
            }
            Some(row) => {
                let mut entry = (*row).clone();
                entry.merge_fields(suggestion);
                entry.updated_at = now;

                let effect = if entry.is_active() {
                    entry.points = max_points;
                    Effect::ToppedUp
                } else if suggestion.in_local_catalog {
                    entry.status = EntryStatus::Active;
                    entry.points = max_points;
                    entry.download_approval = DownloadApproval::None;
                    Effect::ActivatedFromPending
                } else {
                    entry.points = 0;
                    Effect::StillPending
                };

                PlannedChange {
                    mutation: Mutation::Upsert(entry),
                    effect,
                }
            }
        };
        changes.push(change);
    }

    if replay {
        return changes;
    }

    for row in rows.iter().filter(|r| r.is_active() && !touched.contains(&r.external_id)) {
        let points = row.points.min(max_points).saturating_sub(1);
        if points == 0 {
            changes.push(PlannedChange {
                mutation: Mutation::Delete(row.external_id.clone()),
                effect: Effect::Removed,
            });
        } else {
            let mut entry = row.clone();
            entry.points = points;
            entry.updated_at = now;
            changes.push(PlannedChange {
                mutation: Mutation::Upsert(entry),
                effect: Effect::Decayed,
            });
        }
    }

    changes
}

/// Merges suggestion batches into a scope's ledger
///
/// Each pass runs under the scope lock and commits row by row; a row that
/// cannot be written is reported and skipped.
#[derive(Clone)]
pub struct LedgerReconciler {
    store: Arc<dyn LedgerStore>,
    locks: KeyedLocks,
    retry: RetryPolicy,
    settings: ReconcilerSettings,
}

impl LedgerReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: KeyedLocks,
        retry: RetryPolicy,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            locks,
            retry,
            settings,
        }
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    /// Applies one suggestion batch to the ledger of `scope`
    pub async fn apply_batch(
        &self,
        scope: &LedgerScope,
        mut batch: SuggestionBatch,
        rejects: &HashSet<ExternalId>,
        max_points: u32,
    ) -> AppResult<ReconcileSummary> {
        if max_points == 0 {
            return Err(AppError::InvalidInput(
                "max_points must be greater than zero".to_string(),
            ));
        }

        let _guard = self.locks.lock(scope).await;
        let now = Utc::now();
        let fingerprint = batch.fingerprint();

        let rejected = batch.remove_rejected(rejects);
        let mut summary = ReconcileSummary {
            candidates: batch.items().len(),
            rejected: rejected.len(),
            rejected_titles: rejected
                .iter()
                .map(|s| s.title.clone().unwrap_or_else(|| s.external_id.to_string()))
                .collect(),
            ..Default::default()
        };

        let rows = self
            .retry
            .run("ledger.list_entries", || self.store.list_entries(scope))
            .await?;
        summary.before = LedgerCounts::of(&rows);

        summary.replayed = self.is_replay(scope, &fingerprint, now).await;

        let changes = plan_pass(
            &rows,
            batch.items(),
            max_points,
            self.settings.approval_required,
            now,
            summary.replayed,
        );

        let mut projected: BTreeMap<ExternalId, LedgerEntry> = rows
            .into_iter()
            .map(|row| (row.external_id.clone(), row))
            .collect();

        for change in changes {
            match self.commit(scope, &change.mutation).await {
                Ok(()) => {
                    tally(&mut summary, change.effect);
                    match change.mutation {
                        Mutation::Upsert(entry) => {
                            projected.insert(entry.external_id.clone(), entry);
                        }
                        Mutation::Delete(id) => {
                            projected.remove(&id);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        scope = %scope,
                        external_id = %change.mutation.id(),
                        error = %e,
                        "Skipping ledger row that could not be written"
                    );
                    summary.failed_writes += 1;
                    summary
                        .issues
                        .push(format!("write {} failed: {}", change.mutation.id(), e));
                }
            }
        }

        if !summary.replayed {
            let marker = PassMarker {
                fingerprint,
                applied_at: now,
            };
            let recorded = self
                .retry
                .run("ledger.record_pass", || self.store.record_pass(scope, &marker))
                .await;
            if let Err(e) = recorded {
                summary.issues.push(format!("pass marker not recorded: {}", e));
            }
        }

        summary.after = match self
            .retry
            .run("ledger.list_entries", || self.store.list_entries(scope))
            .await
        {
            Ok(rows) => LedgerCounts::of(&rows),
            Err(e) => {
                summary
                    .issues
                    .push(format!("could not reload ledger, counts are projected: {}", e));
                let rows: Vec<LedgerEntry> = projected.into_values().collect();
                LedgerCounts::of(&rows)
            }
        };

        tracing::info!(
            scope = %scope,
            candidates = summary.candidates,
            rejected = summary.rejected,
            created_active = summary.created_active,
            created_pending = summary.created_pending,
            activated = summary.activated_from_pending,
            topped_up = summary.topped_up,
            decayed = summary.decayed,
            removed = summary.removed,
            failed_writes = summary.failed_writes,
            replayed = summary.replayed,
            "Ledger pass applied"
        );

        Ok(summary)
    }

    async fn is_replay(&self, scope: &LedgerScope, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let Some(Some(marker)) = self
            .retry
            .run_or_none("ledger.last_pass", || self.store.last_pass(scope))
            .await
        else {
            return false;
        };

        let window = ChronoDuration::seconds(self.settings.replay_window_secs as i64);
        let age = now - marker.applied_at;
        let replay = marker.fingerprint == fingerprint && age >= ChronoDuration::zero() && age <= window;
        if replay {
            tracing::info!(scope = %scope, fingerprint = %fingerprint, "Batch replayed inside window, skipping decay");
        }
        replay
    }

    async fn commit(&self, scope: &LedgerScope, mutation: &Mutation) -> AppResult<()> {
        match mutation {
            Mutation::Upsert(entry) => {
                self.retry
                    .run("ledger.upsert_entry", || self.store.upsert_entry(scope, entry))
                    .await
            }
            Mutation::Delete(id) => {
                self.retry
                    .run("ledger.delete_entry", || self.store.delete_entry(scope, id))
                    .await
            }
        }
    }
}

fn tally(summary: &mut ReconcileSummary, effect: Effect) {
    let counter = match effect {
        Effect::CreatedActive => &mut summary.created_active,
        Effect::CreatedPending => &mut summary.created_pending,
        Effect::ActivatedFromPending => &mut summary.activated_from_pending,
        Effect::ToppedUp => &mut summary.topped_up,
        Effect::StillPending => &mut summary.still_pending,
        Effect::Decayed => &mut summary.decayed,
        Effect::Removed => &mut summary.removed,
    };
    *counter += 1;
}
