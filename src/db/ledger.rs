use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::models::{
    DownloadApproval, ExternalId, LedgerEntry, LedgerScope, MediaKind, PassMarker, RejectEntry,
};

/// Durable storage for ledger rows, rejects and pass markers
///
/// Rows are keyed by `(scope, external_id)`; `upsert_entry` replaces the whole row.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// All rows of a scope, ordered by external id
    async fn list_entries(&self, scope: &LedgerScope) -> AppResult<Vec<LedgerEntry>>;

    async fn upsert_entry(&self, scope: &LedgerScope, entry: &LedgerEntry) -> AppResult<()>;

    async fn delete_entry(&self, scope: &LedgerScope, id: &ExternalId) -> AppResult<()>;

    /// Stamps `sent_to_downloader_at` on an existing row
    async fn mark_sent(
        &self,
        scope: &LedgerScope,
        id: &ExternalId,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Returns false when the row does not exist
    async fn set_download_approval(
        &self,
        scope: &LedgerScope,
        id: &ExternalId,
        approval: DownloadApproval,
    ) -> AppResult<bool>;

    async fn list_rejects(&self, owner_id: &str, kind: MediaKind) -> AppResult<Vec<RejectEntry>>;

    /// Adds a reject; re-adding an existing one keeps the original record
    async fn add_reject(&self, entry: &RejectEntry) -> AppResult<()>;

    async fn last_pass(&self, scope: &LedgerScope) -> AppResult<Option<PassMarker>>;

    async fn record_pass(&self, scope: &LedgerScope, marker: &PassMarker) -> AppResult<()>;
}

/// Process-local store used by tests and the `memory` backend
#[derive(Default)]
pub struct InMemoryLedgerStore {
    entries: RwLock<HashMap<LedgerScope, BTreeMap<ExternalId, LedgerEntry>>>,
    rejects: RwLock<HashMap<(String, MediaKind), BTreeMap<ExternalId, RejectEntry>>>,
    passes: RwLock<HashMap<LedgerScope, PassMarker>>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn list_entries(&self, scope: &LedgerScope) -> AppResult<Vec<LedgerEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(scope)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_entry(&self, scope: &LedgerScope, entry: &LedgerEntry) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        entries
            .entry(scope.clone())
            .or_default()
            .insert(entry.external_id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_entry(&self, scope: &LedgerScope, id: &ExternalId) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(rows) = entries.get_mut(scope) {
            rows.remove(id);
        }
        Ok(())
    }

    async fn mark_sent(
        &self,
        scope: &LedgerScope,
        id: &ExternalId,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(row) = entries.get_mut(scope).and_then(|rows| rows.get_mut(id)) {
            row.sent_to_downloader_at = Some(at);
            row.updated_at = at;
        }
        Ok(())
    }

    async fn set_download_approval(
        &self,
        scope: &LedgerScope,
        id: &ExternalId,
        approval: DownloadApproval,
    ) -> AppResult<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(scope).and_then(|rows| rows.get_mut(id)) {
            Some(row) => {
                row.download_approval = approval;
                row.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_rejects(&self, owner_id: &str, kind: MediaKind) -> AppResult<Vec<RejectEntry>> {
        let rejects = self.rejects.read().await;
        Ok(rejects
            .get(&(owner_id.to_string(), kind))
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_reject(&self, entry: &RejectEntry) -> AppResult<()> {
        let mut rejects = self.rejects.write().await;
        rejects
            .entry((entry.owner_id.clone(), entry.media_kind))
            .or_default()
            .entry(entry.external_id.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn last_pass(&self, scope: &LedgerScope) -> AppResult<Option<PassMarker>> {
        Ok(self.passes.read().await.get(scope).cloned())
    }

    async fn record_pass(&self, scope: &LedgerScope, marker: &PassMarker) -> AppResult<()> {
        self.passes.write().await.insert(scope.clone(), marker.clone());
        Ok(())
    }
}
