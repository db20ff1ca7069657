use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, query, query_as, FromRow, PgPool};

use super::ledger::LedgerStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    DownloadApproval, ExternalId, LedgerEntry, LedgerScope, MediaKind, PassMarker, RejectEntry,
};

/// Creates a PostgreSQL connection pool and applies pending migrations
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

#[derive(FromRow)]
struct LedgerRow {
    external_id: String,
    status: String,
    points: i32,
    title: Option<String>,
    secondary_external_id: Option<String>,
    rating_average: Option<f64>,
    rating_count: Option<i64>,
    download_approval: String,
    sent_to_downloader_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            external_id: ExternalId::parse(&row.external_id)?,
            status: row.status.parse()?,
            points: u32::try_from(row.points)
                .map_err(|_| AppError::Internal(format!("Negative points for {}", row.external_id)))?,
            title: row.title,
            secondary_external_id: row.secondary_external_id,
            rating_average: row.rating_average,
            rating_count: row.rating_count,
            download_approval: row.download_approval.parse()?,
            sent_to_downloader_at: row.sent_to_downloader_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RejectRow {
    owner_id: String,
    media_kind: String,
    external_id: String,
    title: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<RejectRow> for RejectEntry {
    type Error = AppError;

    fn try_from(row: RejectRow) -> Result<Self, Self::Error> {
        Ok(Self {
            owner_id: row.owner_id,
            media_kind: row.media_kind.parse()?,
            external_id: ExternalId::parse(&row.external_id)?,
            title: row.title,
            created_at: row.created_at,
        })
    }
}

/// Ledger store on Postgres
///
/// Every table is keyed by the full scope, so one database serves any number
/// of owners and collections.
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn list_entries(&self, scope: &LedgerScope) -> AppResult<Vec<LedgerEntry>> {
        let rows = query_as::<_, LedgerRow>(
            r#"
            SELECT external_id, status, points, title, secondary_external_id,
                   rating_average, rating_count, download_approval,
                   sent_to_downloader_at, updated_at
            FROM ledger_entries
            WHERE owner_id = $1 AND collection = $2 AND media_kind = $3
            ORDER BY external_id
            "#,
        )
        .bind(&scope.owner_id)
        .bind(&scope.collection)
        .bind(scope.media_kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn upsert_entry(&self, scope: &LedgerScope, entry: &LedgerEntry) -> AppResult<()> {
        let points = i32::try_from(entry.points)
            .map_err(|_| AppError::InvalidInput(format!("Points out of range: {}", entry.points)))?;

        query(
            r#"
            INSERT INTO ledger_entries (
                owner_id, collection, media_kind, external_id, status, points, title,
                secondary_external_id, rating_average, rating_count, download_approval,
                sent_to_downloader_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (owner_id, collection, media_kind, external_id) DO UPDATE SET
                status = EXCLUDED.status,
                points = EXCLUDED.points,
                title = EXCLUDED.title,
                secondary_external_id = EXCLUDED.secondary_external_id,
                rating_average = EXCLUDED.rating_average,
                rating_count = EXCLUDED.rating_count,
                download_approval = EXCLUDED.download_approval,
                sent_to_downloader_at = EXCLUDED.sent_to_downloader_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&scope.owner_id)
        .bind(&scope.collection)
        .bind(scope.media_kind.as_str())
        .bind(entry.external_id.as_str())
        .bind(entry.status.as_str())
        .bind(points)
        .bind(&entry.title)
        .bind(&entry.secondary_external_id)
        .bind(entry.rating_average)
        .bind(entry.rating_count)
        .bind(entry.download_approval.as_str())
        .bind(entry.sent_to_downloader_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_entry(&self, scope: &LedgerScope, id: &ExternalId) -> AppResult<()> {
        query(
            r#"
            DELETE FROM ledger_entries
            WHERE owner_id = $1 AND collection = $2 AND media_kind = $3 AND external_id = $4
            "#,
        )
        .bind(&scope.owner_id)
        .bind(&scope.collection)
        .bind(scope.media_kind.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_sent(
        &self,
        scope: &LedgerScope,
        id: &ExternalId,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        query(
            r#"
            UPDATE ledger_entries
            SET sent_to_downloader_at = $5, updated_at = $5
            WHERE owner_id = $1 AND collection = $2 AND media_kind = $3 AND external_id = $4
            "#,
        )
        .bind(&scope.owner_id)
        .bind(&scope.collection)
        .bind(scope.media_kind.as_str())
        .bind(id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_download_approval(
        &self,
        scope: &LedgerScope,
        id: &ExternalId,
        approval: DownloadApproval,
    ) -> AppResult<bool> {
        let result = query(
            r#"
            UPDATE ledger_entries
            SET download_approval = $5, updated_at = now()
            WHERE owner_id = $1 AND collection = $2 AND media_kind = $3 AND external_id = $4
            "#,
        )
        .bind(&scope.owner_id)
        .bind(&scope.collection)
        .bind(scope.media_kind.as_str())
        .bind(id.as_str())
        .bind(approval.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_rejects(&self, owner_id: &str, kind: MediaKind) -> AppResult<Vec<RejectEntry>> {
        let rows = query_as::<_, RejectRow>(
            r#"
            SELECT owner_id, media_kind, external_id, title, created_at
            FROM reject_entries
            WHERE owner_id = $1 AND media_kind = $2
            ORDER BY external_id
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RejectEntry::try_from).collect()
    }

    async fn add_reject(&self, entry: &RejectEntry) -> AppResult<()> {
        query(
            r#"
            INSERT INTO reject_entries (owner_id, media_kind, external_id, title, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (owner_id, media_kind, external_id) DO NOTHING
            "#,
        )
        .bind(&entry.owner_id)
        .bind(entry.media_kind.as_str())
        .bind(entry.external_id.as_str())
        .bind(&entry.title)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_pass(&self, scope: &LedgerScope) -> AppResult<Option<PassMarker>> {
        let row: Option<(String, DateTime<Utc>)> = query_as(
            r#"
            SELECT fingerprint, applied_at
            FROM ledger_passes
            WHERE owner_id = $1 AND collection = $2 AND media_kind = $3
            "#,
        )
        .bind(&scope.owner_id)
        .bind(&scope.collection)
        .bind(scope.media_kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(fingerprint, applied_at)| PassMarker {
            fingerprint,
            applied_at,
        }))
    }

    async fn record_pass(&self, scope: &LedgerScope, marker: &PassMarker) -> AppResult<()> {
        query(
            r#"
            INSERT INTO ledger_passes (owner_id, collection, media_kind, fingerprint, applied_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (owner_id, collection, media_kind) DO UPDATE SET
                fingerprint = EXCLUDED.fingerprint,
                applied_at = EXCLUDED.applied_at
            "#,
        )
        .bind(&scope.owner_id)
        .bind(&scope.collection)
        .bind(scope.media_kind.as_str())
        .bind(&marker.fingerprint)
        .bind(marker.applied_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
