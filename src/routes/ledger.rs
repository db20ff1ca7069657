use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{
    error::{AppError, AppResult},
    models::{
        DownloadApproval, ExternalId, IngestReport, LedgerEntry, LedgerScope, OrderSnapshot,
        ReconcileSummary, RefreshReport, RejectEntry, Suggestion, SuggestionBatch,
    },
    services::OrderPolicy,
};

use super::AppState;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct ScopePath {
    pub owner: String,
    pub collection: String,
    pub kind: String,
}

impl ScopePath {
    fn scope(self) -> AppResult<LedgerScope> {
        LedgerScope::new(self.owner, self.collection, self.kind.parse()?)
    }
}

#[derive(Debug, Deserialize)]
pub struct EntryPath {
    pub owner: String,
    pub collection: String,
    pub kind: String,
    pub external_id: String,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub max_points: Option<u32>,
    pub suggestions: Vec<Suggestion>,
}

/// Either explicit titles or a seed for the recommendation source
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub titles: Option<Vec<String>>,
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub scope: LedgerScope,
    pub policy: OrderPolicy,
    pub desired_order: Vec<ExternalId>,
    pub last_snapshot: Option<OrderSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub external_id: ExternalId,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub external_id: ExternalId,
    pub download_approval: DownloadApproval,
}

// Handlers

/// Merges a batch of already-resolved suggestions into the ledger
pub async fn apply_batch(
    State(state): State<AppState>,
    Path(path): Path<ScopePath>,
    Json(request): Json<BatchRequest>,
) -> AppResult<Json<ReconcileSummary>> {
    let scope = path.scope()?;
    let configured = state.reconciler.settings().max_points;
    let max_points = request.max_points.unwrap_or(configured);
    // Stored points above a lower cap would be clamped, losing more than one per pass
    if max_points < configured {
        return Err(AppError::InvalidInput(format!(
            "max_points override {} is below the configured {}",
            max_points, configured
        )));
    }

    let rejects: HashSet<ExternalId> = state
        .store
        .list_rejects(&scope.owner_id, scope.media_kind)
        .await?
        .into_iter()
        .map(|r| r.external_id)
        .collect();

    let batch = SuggestionBatch::new(request.batch_id, request.suggestions);
    let summary = state
        .reconciler
        .apply_batch(&scope, batch, &rejects, max_points)
        .await?;
    Ok(Json(summary))
}

/// Resolves free-text titles (or a seed's recommendations) and merges them
pub async fn ingest(
    State(state): State<AppState>,
    Path(path): Path<ScopePath>,
    Json(request): Json<IngestRequest>,
) -> AppResult<Json<IngestReport>> {
    let scope = path.scope()?;

    let report = match (request.titles, request.seed) {
        (Some(titles), _) => {
            state
                .ingest
                .ingest_titles(&scope, titles, request.batch_id)
                .await?
        }
        (None, Some(seed)) => state.ingest.ingest_seed(&scope, &seed).await?,
        (None, None) => {
            return Err(AppError::InvalidInput(
                "Either titles or seed is required".to_string(),
            ))
        }
    };
    Ok(Json(report))
}

pub async fn refresh(
    State(state): State<AppState>,
    Path(path): Path<ScopePath>,
    request: Option<Json<RefreshRequest>>,
) -> AppResult<Json<RefreshReport>> {
    let scope = path.scope()?;
    let limit = request.and_then(|Json(r)| r.limit);

    let report = state.refresh.refresh(&scope, limit).await?;
    Ok(Json(report))
}

/// Preview of the order a refresh would push, alongside the last pushed one
pub async fn order(
    State(state): State<AppState>,
    Path(path): Path<ScopePath>,
) -> AppResult<Json<OrderResponse>> {
    let scope = path.scope()?;
    let desired_order = state.refresh.preview_order(&scope).await?;
    let last_snapshot = state.refresh.last_snapshot(&scope).await?;

    Ok(Json(OrderResponse {
        policy: state.refresh.policy(),
        scope,
        desired_order,
        last_snapshot,
    }))
}

pub async fn list_entries(
    State(state): State<AppState>,
    Path(path): Path<ScopePath>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    let scope = path.scope()?;
    Ok(Json(state.store.list_entries(&scope).await?))
}

/// Rejects an item for the owner and media kind, dropping it from this ledger
pub async fn add_reject(
    State(state): State<AppState>,
    Path(path): Path<ScopePath>,
    Json(request): Json<RejectRequest>,
) -> AppResult<(StatusCode, Json<RejectEntry>)> {
    let scope = path.scope()?;
    let reject = RejectEntry {
        owner_id: scope.owner_id.clone(),
        media_kind: scope.media_kind,
        external_id: request.external_id,
        title: request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        created_at: Utc::now(),
    };

    let _guard = state.locks.lock(&scope).await;
    state.store.add_reject(&reject).await?;
    state.store.delete_entry(&scope, &reject.external_id).await?;

    tracing::info!(scope = %scope, external_id = %reject.external_id, "Item rejected");
    Ok((StatusCode::CREATED, Json(reject)))
}

/// Clears a pending download approval so the next ingest dispatches the row
pub async fn approve_download(
    State(state): State<AppState>,
    Path(path): Path<EntryPath>,
) -> AppResult<Json<ApprovalResponse>> {
    let scope = LedgerScope::new(path.owner, path.collection, path.kind.parse()?)?;
    let external_id = ExternalId::parse(&path.external_id)?;

    let _guard = state.locks.lock(&scope).await;
    let updated = state
        .store
        .set_download_approval(&scope, &external_id, DownloadApproval::None)
        .await?;
    if !updated {
        return Err(AppError::NotFound(format!(
            "No ledger entry {} in {}",
            external_id, scope
        )));
    }

    tracing::info!(scope = %scope, external_id = %external_id, "Download approved");
    Ok(Json(ApprovalResponse {
        external_id,
        download_approval: DownloadApproval::None,
    }))
}
