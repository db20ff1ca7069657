use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taste_ledger::{
    config::Libraries,
    db::{InMemoryLedgerStore, InMemorySnapshotStore, LedgerStore},
    error::AppResult,
    models::{CatalogMatch, ExternalId, ItemHandle, MediaKind},
    routes::{create_router, AppState},
    services::{
        providers::{CatalogMatcher, CollectionApi},
        IngestSettings, KeyedLocks, LedgerReconciler, OrderPolicy, ReconcilerSettings,
        RefreshOrchestrator, RefreshSettings, RetryPolicy, SuggestionIngest,
    },
};

const SCOPE: &str = "/api/v1/scopes/alice/Inspired%20by%20your%20Taste/movie";

/// Plex stand-in: one "Movies" library holding ids 1..=5
#[derive(Default)]
struct FakePlex {
    members: Mutex<HashMap<String, Vec<ItemHandle>>>,
}

#[async_trait]
impl CollectionApi for FakePlex {
    async fn catalog_index(&self, _library: &str) -> AppResult<HashMap<ExternalId, ItemHandle>> {
        Ok((1..=5u64)
            .map(|id| (ExternalId::from(id), ItemHandle(format!("rk{id}"))))
            .collect())
    }

    async fn list_collection_members(
        &self,
        _library: &str,
        collection: &str,
    ) -> AppResult<Vec<ItemHandle>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_collection_members(
        &self,
        _library: &str,
        collection: &str,
        handles: &[ItemHandle],
    ) -> AppResult<()> {
        self.members
            .lock()
            .unwrap()
            .insert(collection.to_string(), handles.to_vec());
        Ok(())
    }
}

/// Matches "Title N" to id N
struct NumberedTitles;

#[async_trait]
impl CatalogMatcher for NumberedTitles {
    async fn resolve(&self, title: &str, _kind: MediaKind) -> AppResult<Option<CatalogMatch>> {
        Ok(title
            .strip_prefix("Title ")
            .and_then(|n| n.parse::<u64>().ok())
            .map(|id| CatalogMatch {
                external_id: ExternalId::from(id),
                secondary_external_id: None,
                title: Some(title.to_string()),
                rating_average: Some(id as f64),
                rating_count: Some(100),
            }))
    }
}

fn create_test_server_with(settings: ReconcilerSettings) -> (TestServer, Arc<FakePlex>) {
    let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
    let plex = Arc::new(FakePlex::default());
    let locks = KeyedLocks::new();
    let retry = RetryPolicy::new(1, Duration::from_millis(1));
    let libraries = Libraries {
        movie: vec!["Movies".to_string()],
        show: Vec::new(),
    };

    let reconciler = LedgerReconciler::new(
        store.clone(),
        locks.clone(),
        retry,
        settings,
    );
    let refresh = RefreshOrchestrator::new(
        store.clone(),
        Arc::new(InMemorySnapshotStore::new()),
        plex.clone(),
        locks.clone(),
        retry,
        RefreshSettings {
            policy: OrderPolicy::RankThirds,
            seed: Some(7),
            collection_limit: None,
            libraries: libraries.clone(),
        },
    );
    let ingest = SuggestionIngest::new(
        reconciler.clone(),
        store.clone(),
        Arc::new(NumberedTitles),
        plex.clone(),
        libraries,
        retry,
        IngestSettings::default(),
    );

    let state = AppState {
        store,
        locks,
        reconciler,
        refresh: Arc::new(refresh),
        ingest: Arc::new(ingest),
    };

    (TestServer::new(create_router(state)).unwrap(), plex)
}

fn create_test_server() -> TestServer {
    create_test_server_with(ReconcilerSettings::default()).0
}

fn suggestion(id: u64, local: bool) -> Value {
    json!({
        "external_id": id,
        "title": format!("Title {id}"),
        "rating_average": id as f64,
        "rating_count": 100,
        "in_local_catalog": local
    })
}

#[tokio::test]
async fn test_health_check() {
    let server = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn test_caller_request_id_is_echoed() {
    let server = create_test_server();
    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("nightly-refresh-1"),
        )
        .await;

    assert_eq!(response.header("x-request-id"), "nightly-refresh-1");
}

#[tokio::test]
async fn test_batch_creates_active_row_at_max_points() {
    let server = create_test_server();

    let response = server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(1, true)] }))
        .await;

    response.assert_status_ok();
    let summary: Value = response.json();
    assert_eq!(summary["created_active"], 1);
    assert_eq!(summary["after"]["active"], 1);

    let rows: Vec<Value> = server.get(&format!("{SCOPE}/ledger")).await.json();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["external_id"], "1");
    assert_eq!(rows[0]["points"], 50);
    assert_eq!(rows[0]["status"], "active");
}

#[tokio::test]
async fn test_empty_batch_decays_rows() {
    let (server, _) = create_test_server_with(ReconcilerSettings {
        max_points: 2,
        ..Default::default()
    });

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(1, true)] }))
        .await
        .assert_status_ok();

    let summary: Value = server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [], "batch_id": "second" }))
        .await
        .json();
    assert_eq!(summary["decayed"], 1);
    assert_eq!(summary["removed"], 0);

    let summary: Value = server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [], "batch_id": "third" }))
        .await
        .json();
    assert_eq!(summary["removed"], 1);
    assert_eq!(summary["after"]["total"], 0);
}

#[tokio::test]
async fn test_unknown_media_kind_is_bad_request() {
    let server = create_test_server();

    let response = server
        .post("/api/v1/scopes/alice/taste/music/batch")
        .json(&json!({ "suggestions": [] }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("music"));
}

#[tokio::test]
async fn test_zero_max_points_is_bad_request() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(1, true)], "max_points": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_max_points_override_below_configured_is_bad_request() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(1, true)] }))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [], "batch_id": "second", "max_points": 10 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let rows: Vec<Value> = server.get(&format!("{SCOPE}/ledger")).await.json();
    assert_eq!(rows[0]["points"], 50);

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(2, true)], "max_points": 80 }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_refresh_with_zero_limit_is_bad_request() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(1, true)] }))
        .await
        .assert_status_ok();

    server
        .post(&format!("{SCOPE}/refresh"))
        .json(&json!({ "limit": 0 }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reject_removes_row_and_filters_later_batches() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(1, true), suggestion(2, true)] }))
        .await
        .assert_status_ok();

    let response = server
        .post(&format!("{SCOPE}/rejects"))
        .json(&json!({ "external_id": "2", "title": "Title 2" }))
        .await;
    response.assert_status(StatusCode::CREATED);

    let rows: Vec<Value> = server.get(&format!("{SCOPE}/ledger")).await.json();
    assert_eq!(rows.len(), 1);

    let summary: Value = server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(2, true)], "batch_id": "again" }))
        .await
        .json();
    assert_eq!(summary["rejected"], 1);
    assert_eq!(summary["created_active"], 0);
}

#[tokio::test]
async fn test_ingest_titles_resolves_and_marks_local_items() {
    let server = create_test_server();

    let response = server
        .post(&format!("{SCOPE}/suggestions"))
        .json(&json!({ "titles": ["Title 1", "Title 9", "Unknown film"] }))
        .await;

    response.assert_status_ok();
    let report: Value = response.json();
    assert_eq!(report["titles"], 3);
    assert_eq!(report["matched"], 2);
    assert_eq!(report["unmatched"], json!(["Unknown film"]));
    assert_eq!(report["summary"]["created_active"], 1);
    assert_eq!(report["summary"]["created_pending"], 1);
}

#[tokio::test]
async fn test_ingest_requires_titles_or_seed() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/suggestions"))
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_seed_without_source_is_bad_request() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/suggestions"))
        .json(&json!({ "seed": "Heat" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_pushes_order_to_collection() {
    let (server, plex) = create_test_server_with(ReconcilerSettings::default());

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [
            suggestion(1, true), suggestion(2, true), suggestion(3, true), suggestion(4, true)
        ] }))
        .await
        .assert_status_ok();

    let response = server.post(&format!("{SCOPE}/refresh")).json(&json!({})).await;
    response.assert_status_ok();

    let report: Value = response.json();
    assert_eq!(report["status"], "completed");
    assert_eq!(report["libraries"][0]["status"]["kind"], "applied");
    assert_eq!(report["desired_order"].as_array().unwrap().len(), 4);

    let members = plex.members.lock().unwrap().get("Inspired by your Taste").cloned().unwrap();
    assert_eq!(members.len(), 4);

    let order: Value = server.get(&format!("{SCOPE}/order")).await.json();
    assert_eq!(order["desired_order"].as_array().unwrap().len(), 4);
    assert_eq!(order["last_snapshot"]["desired_order"], report["desired_order"]);
}

#[tokio::test]
async fn test_refresh_with_limit_and_without_body() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(1, true), suggestion(2, true), suggestion(3, true)] }))
        .await
        .assert_status_ok();

    let report: Value = server
        .post(&format!("{SCOPE}/refresh"))
        .json(&json!({ "limit": 2 }))
        .await
        .json();
    assert_eq!(report["libraries"][0]["applied_count"], 2);

    let report: Value = server.post(&format!("{SCOPE}/refresh")).await.json();
    assert_eq!(report["status"], "completed");
}

#[tokio::test]
async fn test_refresh_of_empty_ledger_is_skipped() {
    let server = create_test_server();

    let report: Value = server.post(&format!("{SCOPE}/refresh")).json(&json!({})).await.json();
    assert_eq!(report["status"], "skipped");
    assert_eq!(report["skip_reason"], "no_rows");
}

#[tokio::test]
async fn test_approve_clears_pending_approval() {
    let (server, _) = create_test_server_with(ReconcilerSettings {
        approval_required: true,
        ..Default::default()
    });

    server
        .post(&format!("{SCOPE}/batch"))
        .json(&json!({ "suggestions": [suggestion(7, false)] }))
        .await
        .assert_status_ok();

    let rows: Vec<Value> = server.get(&format!("{SCOPE}/ledger")).await.json();
    assert_eq!(rows[0]["download_approval"], "pending");

    let response = server.post(&format!("{SCOPE}/entries/7/approve")).await;
    response.assert_status_ok();

    let rows: Vec<Value> = server.get(&format!("{SCOPE}/ledger")).await.json();
    assert_eq!(rows[0]["download_approval"], "none");
}

#[tokio::test]
async fn test_approve_unknown_entry_is_not_found() {
    let server = create_test_server();

    server
        .post(&format!("{SCOPE}/entries/404/approve"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}
