use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    db::LedgerStore,
    middleware::{make_span_with_request_id, request_id_middleware},
    services::{KeyedLocks, LedgerReconciler, RefreshOrchestrator, SuggestionIngest},
};

pub mod ledger;

/// Shared handles for the HTTP handlers
///
/// `locks` must be the same instance the reconciler and orchestrator were built with.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub locks: KeyedLocks,
    pub reconciler: LedgerReconciler,
    pub refresh: Arc<RefreshOrchestrator>,
    pub ingest: Arc<SuggestionIngest>,
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id)),
        )
}

/// API routes under /api/v1
fn api_routes() -> Router<AppState> {
    let scope = "/scopes/:owner/:collection/:kind";

    Router::new()
        .route(&format!("{scope}/batch"), post(ledger::apply_batch))
        .route(&format!("{scope}/suggestions"), post(ledger::ingest))
        .route(&format!("{scope}/refresh"), post(ledger::refresh))
        .route(&format!("{scope}/order"), get(ledger::order))
        .route(&format!("{scope}/ledger"), get(ledger::list_entries))
        .route(&format!("{scope}/rejects"), post(ledger::add_reject))
        .route(
            &format!("{scope}/entries/:external_id/approve"),
            post(ledger::approve_download),
        )
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
