use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExternalId, LedgerEntry, LedgerScope};
use crate::services::ordering::OrderPolicy;

/// Row counts of a ledger at one point in time
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerCounts {
    pub total: usize,
    pub active: usize,
    pub pending: usize,
}

impl LedgerCounts {
    pub fn of(entries: &[LedgerEntry]) -> Self {
        let active = entries.iter().filter(|e| e.is_active()).count();
        Self {
            total: entries.len(),
            active,
            pending: entries.len() - active,
        }
    }
}

/// Quantified diff produced by one reconciliation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconcileSummary {
    pub before: LedgerCounts,
    pub after: LedgerCounts,
    pub candidates: usize,
    pub rejected: usize,
    pub rejected_titles: Vec<String>,
    pub created_active: usize,
    pub created_pending: usize,
    pub activated_from_pending: usize,
    pub topped_up: usize,
    pub still_pending: usize,
    pub decayed: usize,
    pub removed: usize,
    pub failed_writes: usize,
    pub replayed: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum SyncStatus {
    Applied,
    Unchanged,
    NoMatches,
    CouldNotApply(String),
}

/// Result of synchronizing one external library's collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    pub library: String,
    pub collection: String,
    pub status: SyncStatus,
    pub applied_count: usize,
    pub skipped_no_match: usize,
    pub sample_unmatched: Vec<ExternalId>,
}

impl SyncOutcome {
    pub fn could_not_apply(library: &str, collection: &str, reason: impl Into<String>) -> Self {
        Self {
            library: library.to_string(),
            collection: collection.to_string(),
            status: SyncStatus::CouldNotApply(reason.into()),
            applied_count: 0,
            skipped_no_match: 0,
            sample_unmatched: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Completed,
    Partial,
    Skipped,
}

/// Machine-readable report of one collection refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshReport {
    pub scope: LedgerScope,
    pub status: RefreshStatus,
    pub skip_reason: Option<String>,
    pub policy: OrderPolicy,
    pub desired_order: Vec<ExternalId>,
    pub libraries: Vec<SyncOutcome>,
    pub snapshot_persisted: bool,
    pub issues: Vec<String>,
}

impl RefreshReport {
    pub fn skipped(scope: LedgerScope, policy: OrderPolicy, reason: &str) -> Self {
        Self {
            scope,
            status: RefreshStatus::Skipped,
            skip_reason: Some(reason.to_string()),
            policy,
            desired_order: Vec::new(),
            libraries: Vec::new(),
            snapshot_persisted: false,
            issues: Vec::new(),
        }
    }
}

/// Canonical desired order persisted after each refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    pub scope: LedgerScope,
    pub policy: OrderPolicy,
    pub desired_order: Vec<ExternalId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchStats {
    pub added: usize,
    pub exists: usize,
    pub failed: usize,
}

/// Report of resolving suggested titles and applying them to the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    pub scope: LedgerScope,
    pub titles: usize,
    pub matched: usize,
    pub unmatched: Vec<String>,
    pub summary: ReconcileSummary,
    pub dispatch: DispatchStats,
    pub issues: Vec<String>,
}
