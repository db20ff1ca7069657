//! From free-text suggestions to ledger rows and downloader requests
//!
//! Titles are resolved through the catalog matcher in fixed-size chunks, checked
//! against the local libraries, merged into the ledger, and any row that is
//! still missing locally is handed to the downloader for its media kind.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    config::Libraries,
    db::LedgerStore,
    error::{AppError, AppResult},
    models::{
        CatalogMatch, DispatchStats, ExternalId, IngestReport, LedgerEntry, LedgerScope,
        MediaKind, ReconcileSummary, SuggestionBatch,
    },
    services::{
        providers::{AddOutcome, CatalogMatcher, CollectionApi, Downloader, RecommendationSource},
        reconciler::LedgerReconciler,
        retry::RetryPolicy,
    },
};

pub const DEFAULT_LOOKUP_CHUNK_SIZE: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    pub lookup_chunk_size: usize,
    pub auto_download: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            lookup_chunk_size: DEFAULT_LOOKUP_CHUNK_SIZE,
            auto_download: true,
        }
    }
}

/// One optional collaborator per media kind
pub struct PerKind<T> {
    pub movie: Option<T>,
    pub show: Option<T>,
}

impl<T> Default for PerKind<T> {
    fn default() -> Self {
        Self {
            movie: None,
            show: None,
        }
    }
}

impl<T> PerKind<T> {
    pub fn get(&self, kind: MediaKind) -> Option<&T> {
        match kind {
            MediaKind::Movie => self.movie.as_ref(),
            MediaKind::Show => self.show.as_ref(),
        }
    }
}

pub struct SuggestionIngest {
    reconciler: LedgerReconciler,
    store: Arc<dyn LedgerStore>,
    matcher: Arc<dyn CatalogMatcher>,
    api: Arc<dyn CollectionApi>,
    sources: PerKind<Arc<dyn RecommendationSource>>,
    downloaders: PerKind<Arc<dyn Downloader>>,
    libraries: Libraries,
    retry: RetryPolicy,
    settings: IngestSettings,
}

/// Trims, drops blanks and removes case-insensitive duplicates, keeping first spellings
fn normalize_titles(titles: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    titles
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
        .collect()
}

impl SuggestionIngest {
    pub fn new(
        reconciler: LedgerReconciler,
        store: Arc<dyn LedgerStore>,
        matcher: Arc<dyn CatalogMatcher>,
        api: Arc<dyn CollectionApi>,
        libraries: Libraries,
        retry: RetryPolicy,
        settings: IngestSettings,
    ) -> Self {
        Self {
            reconciler,
            store,
            matcher,
            api,
            sources: PerKind::default(),
            downloaders: PerKind::default(),
            libraries,
            retry,
            settings,
        }
    }

    pub fn with_sources(mut self, sources: PerKind<Arc<dyn RecommendationSource>>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_downloaders(mut self, downloaders: PerKind<Arc<dyn Downloader>>) -> Self {
        self.downloaders = downloaders;
        self
    }

    /// Asks the recommendation source for titles related to `seed` and ingests them
    pub async fn ingest_seed(&self, scope: &LedgerScope, seed: &str) -> AppResult<IngestReport> {
        let seed = seed.trim();
        if seed.is_empty() {
            return Err(AppError::InvalidInput("Seed title cannot be empty".to_string()));
        }
        let source = self.sources.get(scope.media_kind).ok_or_else(|| {
            AppError::InvalidInput(format!(
                "No recommendation source configured for {}",
                scope.media_kind
            ))
        })?;

        let titles = self
            .retry
            .run("source.generate", || source.generate(seed))
            .await?;
        tracing::info!(scope = %scope, seed = %seed, count = titles.len(), "Recommendations generated");

        self.ingest_titles(scope, titles, None).await
    }

    pub async fn ingest_titles(
        &self,
        scope: &LedgerScope,
        titles: Vec<String>,
        batch_id: Option<String>,
    ) -> AppResult<IngestReport> {
        let titles = normalize_titles(titles);
        if titles.is_empty() {
            return Err(AppError::InvalidInput("No titles to ingest".to_string()));
        }

        let (matches, unmatched) = self.resolve_all(&titles, scope.media_kind).await;
        let mut issues = Vec::new();

        let summary = if matches.is_empty() {
            tracing::warn!(scope = %scope, titles = titles.len(), "No title could be matched, ledger left untouched");
            issues.push("no title matched the catalog; ledger pass skipped".to_string());
            ReconcileSummary::default()
        } else {
            let local = self.local_ids(scope, &mut issues).await;
            let suggestions = matches
                .into_iter()
                .map(|m| {
                    let in_local = local.contains(&m.external_id);
                    m.into_suggestion(in_local)
                })
                .collect();
            let batch = SuggestionBatch::new(batch_id, suggestions);
            let rejects = self.rejected_ids(scope).await?;

            self.reconciler
                .apply_batch(scope, batch, &rejects, self.reconciler.settings().max_points)
                .await?
        };
        issues.extend(summary.issues.iter().cloned());

        let dispatch = self.dispatch(scope, &mut issues).await;

        tracing::info!(
            scope = %scope,
            titles = titles.len(),
            unmatched = unmatched.len(),
            added = dispatch.added,
            exists = dispatch.exists,
            failed = dispatch.failed,
            "Suggestions ingested"
        );

        Ok(IngestReport {
            scope: scope.clone(),
            titles: titles.len(),
            matched: titles.len() - unmatched.len(),
            unmatched,
            summary,
            dispatch,
            issues,
        })
    }

    /// Resolves titles chunk by chunk; each chunk runs concurrently
    async fn resolve_all(&self, titles: &[String], kind: MediaKind) -> (Vec<CatalogMatch>, Vec<String>) {
        let mut matches = Vec::with_capacity(titles.len());
        let mut unmatched = Vec::new();

        for chunk in titles.chunks(self.settings.lookup_chunk_size.max(1)) {
            let lookups = chunk.iter().map(|title| async move {
                let found = self
                    .retry
                    .run_or_none("matcher.resolve", || self.matcher.resolve(title, kind))
                    .await
                    .flatten();
                (title, found)
            });

            for (title, found) in join_all(lookups).await {
                match found {
                    Some(m) => matches.push(m),
                    None => unmatched.push(title.clone()),
                }
            }
        }

        (matches, unmatched)
    }

    /// Ids present in any readable library of the scope's kind
    ///
    /// An unreadable library is recorded in `issues` and contributes nothing, so
    /// its items come out as not available locally.
    async fn local_ids(&self, scope: &LedgerScope, issues: &mut Vec<String>) -> HashSet<ExternalId> {
        let mut local = HashSet::new();
        for library in self.libraries.for_kind(scope.media_kind) {
            match self
                .retry
                .run("collection.catalog_index", || self.api.catalog_index(library))
                .await
            {
                Ok(index) => local.extend(index.into_keys()),
                Err(e) => {
                    tracing::warn!(scope = %scope, library = %library, error = %e, "Library unreadable, skipping");
                    issues.push(format!("library {} unreadable: {}", library, e));
                }
            }
        }
        local
    }

    async fn rejected_ids(&self, scope: &LedgerScope) -> AppResult<HashSet<ExternalId>> {
        let rejects = self
            .retry
            .run("ledger.list_rejects", || {
                self.store.list_rejects(&scope.owner_id, scope.media_kind)
            })
            .await?;
        Ok(rejects.into_iter().map(|r| r.external_id).collect())
    }

    async fn dispatch(&self, scope: &LedgerScope, issues: &mut Vec<String>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let Some(downloader) = self.downloaders.get(scope.media_kind) else {
            return stats;
        };
        if !self.settings.auto_download {
            return stats;
        }

        let rows = match self.retry.run("ledger.list_entries", || self.store.list_entries(scope)).await {
            Ok(rows) => rows,
            Err(e) => {
                issues.push(format!("downloader dispatch skipped: {}", e));
                return stats;
            }
        };
        let rejects = match self.rejected_ids(scope).await {
            Ok(rejects) => rejects,
            Err(e) => {
                issues.push(format!("downloader dispatch skipped: {}", e));
                return stats;
            }
        };

        let waiting: Vec<LedgerEntry> = rows
            .into_iter()
            .filter(|r| r.awaits_dispatch() && !rejects.contains(&r.external_id))
            .collect();

        for chunk in waiting.chunks(self.settings.lookup_chunk_size.max(1)) {
            let requests = chunk.iter().map(|entry| async move {
                let outcome = self
                    .retry
                    .run("downloader.add_item", || downloader.add_item(entry))
                    .await;
                (entry, outcome)
            });

            for (entry, outcome) in join_all(requests).await {
                match outcome {
                    Ok(outcome) => {
                        match outcome {
                            AddOutcome::Added => stats.added += 1,
                            AddOutcome::Exists => stats.exists += 1,
                        }
                        let marked = self
                            .retry
                            .run("ledger.mark_sent", || {
                                self.store.mark_sent(scope, &entry.external_id, Utc::now())
                            })
                            .await;
                        if let Err(e) = marked {
                            issues.push(format!("could not mark {} as sent: {}", entry.external_id, e));
                        }
                    }
                    Err(e) => {
                        tracing::warn!(scope = %scope, external_id = %entry.external_id, error = %e, "Downloader rejected item");
                        stats.failed += 1;
                        issues.push(format!("download of {} failed: {}", entry.external_id, e));
                    }
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryLedgerStore;
    use crate::models::{EntryStatus, RejectEntry};
    use crate::services::locks::KeyedLocks;
    use crate::services::reconciler::ReconcilerSettings;
    use crate::services::testing::FakeCollections;
    use async_trait::async_trait;
    use mockall::mock;
    use std::time::Duration;

    mock! {
        Matcher {}

        #[async_trait]
        impl CatalogMatcher for Matcher {
            async fn resolve(&self, title: &str, kind: MediaKind) -> AppResult<Option<CatalogMatch>>;
        }
    }

    mock! {
        Arr {}

        #[async_trait]
        impl Downloader for Arr {
            async fn add_item(&self, entry: &LedgerEntry) -> AppResult<AddOutcome>;
        }
    }

    mock! {
        Source {}

        #[async_trait]
        impl RecommendationSource for Source {
            async fn generate(&self, seed: &str) -> AppResult<Vec<String>>;
        }
    }

    fn scope() -> LedgerScope {
        LedgerScope::new("alice", "immaculate-taste", MediaKind::Movie).unwrap()
    }

    /// Matcher resolving "Title {n}" to id n and nothing else
    fn numbered_matcher() -> MockMatcher {
        let mut matcher = MockMatcher::new();
        matcher.expect_resolve().returning(|title, _| {
            Ok(title
                .strip_prefix("Title ")
                .and_then(|n| n.parse::<u64>().ok())
                .map(|n| CatalogMatch {
                    external_id: ExternalId::from(n),
                    secondary_external_id: None,
                    title: Some(format!("Title {}", n)),
                    rating_average: Some(7.0),
                    rating_count: Some(10),
                }))
        });
        matcher
    }

    fn libraries() -> Libraries {
        Libraries {
            movie: vec!["Movies".to_string()],
            show: vec![],
        }
    }

    fn ingest(
        store: Arc<InMemoryLedgerStore>,
        matcher: MockMatcher,
        api: FakeCollections,
        chunk_size: usize,
    ) -> SuggestionIngest {
        let retry = RetryPolicy::new(2, Duration::from_millis(1));
        let reconciler = LedgerReconciler::new(
            store.clone(),
            KeyedLocks::new(),
            retry,
            ReconcilerSettings::default(),
        );
        SuggestionIngest::new(
            reconciler,
            store,
            Arc::new(matcher),
            Arc::new(api),
            libraries(),
            retry,
            IngestSettings {
                lookup_chunk_size: chunk_size,
                auto_download: true,
            },
        )
    }

    fn titles(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_normalize_titles() {
        let normalized = normalize_titles(titles(&["  Heat ", "heat", "", "Ronin", "   "]));
        assert_eq!(normalized, titles(&["Heat", "Ronin"]));
    }

    #[tokio::test]
    async fn test_titles_become_ledger_rows() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let api = FakeCollections::new().with_catalog("Movies", &[1]);
        let ingest = ingest(store.clone(), numbered_matcher(), api, 2);

        let report = ingest
            .ingest_titles(&scope(), titles(&["Title 1", "title 1", "Title 2", "Nope", "Title 3"]), None)
            .await
            .unwrap();

        assert_eq!(report.titles, 4);
        assert_eq!(report.matched, 3);
        assert_eq!(report.unmatched, titles(&["Nope"]));
        assert_eq!(report.summary.created_active, 1);
        assert_eq!(report.summary.created_pending, 2);

        let rows = store.list_entries(&scope()).await.unwrap();
        let active: Vec<_> = rows.iter().filter(|r| r.is_active()).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].external_id, ExternalId::from(1));
    }

    #[tokio::test]
    async fn test_every_chunk_is_resolved() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let mut matcher = MockMatcher::new();
        matcher.expect_resolve().times(5).returning(|_, _| Ok(None));
        let ingest = ingest(store, matcher, FakeCollections::new(), 2);

        let report = ingest
            .ingest_titles(&scope(), titles(&["a", "b", "c", "d", "e"]), None)
            .await
            .unwrap();

        assert_eq!(report.unmatched.len(), 5);
        assert_eq!(report.summary, ReconcileSummary::default());
        assert_eq!(report.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_items_are_dispatched_once() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let api = FakeCollections::new().with_catalog("Movies", &[1]);
        let mut arr = MockArr::new();
        arr.expect_add_item()
            .times(2)
            .returning(|entry| {
                if entry.external_id == ExternalId::from(2) {
                    Ok(AddOutcome::Added)
                } else {
                    Ok(AddOutcome::Exists)
                }
            });
        let downloaders: PerKind<Arc<dyn Downloader>> = PerKind {
            movie: Some(Arc::new(arr)),
            show: None,
        };
        let ingest = ingest(store.clone(), numbered_matcher(), api, 6).with_downloaders(downloaders);

        let first = ingest
            .ingest_titles(&scope(), titles(&["Title 1", "Title 2", "Title 3"]), None)
            .await
            .unwrap();
        let second = ingest
            .ingest_titles(&scope(), titles(&["Title 2", "Title 3"]), Some("again".to_string()))
            .await
            .unwrap();

        assert_eq!(first.dispatch, DispatchStats { added: 1, exists: 1, failed: 0 });
        assert_eq!(second.dispatch, DispatchStats::default());

        let rows = store.list_entries(&scope()).await.unwrap();
        assert!(rows
            .iter()
            .filter(|r| r.status == EntryStatus::Pending)
            .all(|r| r.sent_to_downloader_at.is_some()));
    }

    #[tokio::test]
    async fn test_downloader_failures_are_counted() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let mut arr = MockArr::new();
        arr.expect_add_item()
            .times(1)
            .returning(|_| Err(AppError::Upstream { service: "radarr", status: 400, body: "bad".to_string() }));
        let ingest = ingest(store.clone(), numbered_matcher(), FakeCollections::new(), 6)
            .with_downloaders(PerKind {
                movie: Some(Arc::new(arr) as Arc<dyn Downloader>),
                show: None,
            });

        let report = ingest.ingest_titles(&scope(), titles(&["Title 4"]), None).await.unwrap();

        assert_eq!(report.dispatch.failed, 1);
        let rows = store.list_entries(&scope()).await.unwrap();
        assert!(rows[0].sent_to_downloader_at.is_none());
    }

    #[tokio::test]
    async fn test_rejected_items_are_neither_stored_nor_dispatched() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store
            .add_reject(&RejectEntry {
                owner_id: "alice".to_string(),
                media_kind: MediaKind::Movie,
                external_id: ExternalId::from(5),
                title: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let mut arr = MockArr::new();
        arr.expect_add_item().times(0);
        let ingest = ingest(store.clone(), numbered_matcher(), FakeCollections::new(), 6)
            .with_downloaders(PerKind {
                movie: Some(Arc::new(arr) as Arc<dyn Downloader>),
                show: None,
            });

        let report = ingest.ingest_titles(&scope(), titles(&["Title 5"]), None).await.unwrap();

        assert_eq!(report.summary.rejected, 1);
        assert!(store.list_entries(&scope()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_library_is_reported_and_skipped() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let api = FakeCollections::new().with_broken_library("Movies");
        let ingest = ingest(store.clone(), numbered_matcher(), api, 6);

        let report = ingest
            .ingest_titles(&scope(), titles(&["Title 1"]), None)
            .await
            .unwrap();

        assert!(report.issues.iter().any(|i| i.contains("library Movies unreadable")));
        let rows = store.list_entries(&scope()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn test_blank_titles_are_invalid_input() {
        let ingest = ingest(
            Arc::new(InMemoryLedgerStore::new()),
            MockMatcher::new(),
            FakeCollections::new(),
            6,
        );

        let result = ingest.ingest_titles(&scope(), titles(&[" ", ""]), None).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_seed_goes_through_recommendation_source() {
        let mut source = MockSource::new();
        source
            .expect_generate()
            .withf(|seed| seed.to_string() == "Heat")
            .times(1)
            .returning(|_| Ok(vec!["Title 8".to_string(), "Title 9".to_string()]));
        let ingest = ingest(
            Arc::new(InMemoryLedgerStore::new()),
            numbered_matcher(),
            FakeCollections::new(),
            6,
        )
        .with_sources(PerKind {
            movie: Some(Arc::new(source) as Arc<dyn RecommendationSource>),
            show: None,
        });

        let report = ingest.ingest_seed(&scope(), " Heat ").await.unwrap();

        assert_eq!(report.matched, 2);
        assert_eq!(report.summary.created_pending, 2);
    }

    #[tokio::test]
    async fn test_seed_without_source_is_invalid_input() {
        let ingest = ingest(
            Arc::new(InMemoryLedgerStore::new()),
            MockMatcher::new(),
            FakeCollections::new(),
            6,
        );

        let result = ingest.ingest_seed(&scope(), "Heat").await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }
}
