use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;

use crate::db::models::{CategoryRow, ListingRecord, PriorState, RunLogRow};
use crate::error::Result;

/// Persistence consumed by the pipeline. Listing rows are upserted by id
/// with a photo-preserving conflict rule; run logs are upserted by run id.
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Category rules in evaluation order.
    async fn load_categories(&self) -> Result<Vec<CategoryRow>>;

    /// Everything needed to reconcile fresh lots against what is stored.
    async fn load_state(&self) -> Result<Vec<PriorState>>;

    /// Upsert one batch in a single transaction. Core fields always take the
    /// incoming value. The photo list only changes when the stored list is
    /// empty or the incoming one is strictly longer.
    async fn upsert_listings(&self, rows: &[ListingRecord]) -> Result<()>;

    /// Unconditionally replace a listing's photo list (hydration output).
    async fn replace_photos(&self, id: &str, photos: &[String]) -> Result<()>;

    async fn set_snapshot_key(&self, id: &str, key: &str) -> Result<()>;

    async fn get_listing(&self, id: &str) -> Result<Option<ListingRecord>>;

    async fn write_run_log(&self, row: &RunLogRow) -> Result<()>;

    /// Fold background enrichment results into an existing run-log row.
    async fn update_run_enrichment(&self, run_id: &str, snapshots: i64, hydrations: i64, failures: i64) -> Result<()>;

    async fn recent_runs(&self, limit: i64) -> Result<Vec<RunLogRow>>;
}

const UPSERT_LISTING: &str = r#"
    INSERT INTO listings (
        id, source, source_lot_id, source_url, title, description,
        auction_end_at, lot_status, location_text,
        price_amount, price_kind, price_verified, currency, price_source_field,
        image_url, photos, source_categories, source_tags,
        status, category_id, category_name, score, rejection_reason,
        first_seen_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        source_url = excluded.source_url,
        title = excluded.title,
        description = excluded.description,
        auction_end_at = excluded.auction_end_at,
        lot_status = excluded.lot_status,
        location_text = excluded.location_text,
        price_amount = excluded.price_amount,
        price_kind = excluded.price_kind,
        price_verified = excluded.price_verified,
        currency = excluded.currency,
        price_source_field = excluded.price_source_field,
        image_url = CASE
            WHEN listings.photos IS NULL THEN COALESCE(excluded.image_url, listings.image_url)
            WHEN json_valid(listings.photos) = 0 THEN COALESCE(excluded.image_url, listings.image_url)
            WHEN json_array_length(listings.photos) = 0 THEN COALESCE(excluded.image_url, listings.image_url)
            WHEN json_array_length(excluded.photos) > json_array_length(listings.photos)
                THEN COALESCE(excluded.image_url, listings.image_url)
            ELSE COALESCE(listings.image_url, excluded.image_url)
        END,
        photos = CASE
            WHEN listings.photos IS NULL THEN excluded.photos
            WHEN json_valid(listings.photos) = 0 THEN excluded.photos
            WHEN json_array_length(listings.photos) = 0 THEN excluded.photos
            WHEN json_array_length(excluded.photos) > json_array_length(listings.photos) THEN excluded.photos
            ELSE listings.photos
        END,
        source_categories = excluded.source_categories,
        source_tags = excluded.source_tags,
        status = excluded.status,
        category_id = excluded.category_id,
        category_name = excluded.category_name,
        score = excluded.score,
        rejection_reason = excluded.rejection_reason,
        updated_at = excluded.updated_at
"#;

const UPSERT_RUN_LOG: &str = r#"
    INSERT INTO run_logs (
        run_id, started_at, finished_at, duration_ms, source_filter, dry_run,
        fetched, parsed, normalize_failures, candidates, rejected,
        new_listings, updated_listings, refreshed_listings,
        snapshots, hydrations, enrich_failures,
        top_rejections, warnings, quota_used, quota_ceiling, quota_exhausted
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(run_id) DO UPDATE SET
        started_at = excluded.started_at,
        finished_at = excluded.finished_at,
        duration_ms = excluded.duration_ms,
        source_filter = excluded.source_filter,
        dry_run = excluded.dry_run,
        fetched = excluded.fetched,
        parsed = excluded.parsed,
        normalize_failures = excluded.normalize_failures,
        candidates = excluded.candidates,
        rejected = excluded.rejected,
        new_listings = excluded.new_listings,
        updated_listings = excluded.updated_listings,
        refreshed_listings = excluded.refreshed_listings,
        snapshots = excluded.snapshots,
        hydrations = excluded.hydrations,
        enrich_failures = excluded.enrich_failures,
        top_rejections = excluded.top_rejections,
        warnings = excluded.warnings,
        quota_used = excluded.quota_used,
        quota_ceiling = excluded.quota_ceiling,
        quota_exhausted = excluded.quota_exhausted
"#;

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply migrations.
    pub async fn connect(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database ready at {db_path}");
        Ok(Self { pool })
    }

    /// Private in-memory database with migrations applied. The single
    /// connection is never recycled, otherwise the data would vanish.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ListingStore for SqliteStore {
    async fn load_categories(&self) -> Result<Vec<CategoryRow>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            r#"
            SELECT id, name, enabled, min_score, requires_snapshot,
                   positive_keywords, negative_keywords, hard_gates
            FROM categories
            ORDER BY sort_order, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_state(&self) -> Result<Vec<PriorState>> {
        let rows = sqlx::query_as::<_, PriorState>(
            "SELECT id, price_amount, snapshot_key, photos FROM listings",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_listings(&self, rows: &[ListingRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in rows {
            sqlx::query(UPSERT_LISTING)
                .bind(&r.id)
                .bind(&r.source)
                .bind(&r.source_lot_id)
                .bind(&r.source_url)
                .bind(&r.title)
                .bind(&r.description)
                .bind(&r.auction_end_at)
                .bind(&r.lot_status)
                .bind(&r.location_text)
                .bind(r.price_amount)
                .bind(&r.price_kind)
                .bind(r.price_verified)
                .bind(&r.currency)
                .bind(&r.price_source_field)
                .bind(&r.image_url)
                .bind(&r.photos)
                .bind(&r.source_categories)
                .bind(&r.source_tags)
                .bind(&r.status)
                .bind(&r.category_id)
                .bind(&r.category_name)
                .bind(r.score)
                .bind(&r.rejection_reason)
                .bind(&r.first_seen_at)
                .bind(&r.updated_at)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_photos(&self, id: &str, photos: &[String]) -> Result<()> {
        let encoded = serde_json::to_string(photos)?;
        sqlx::query(
            r#"
            UPDATE listings
            SET photos = ?, image_url = COALESCE(?, image_url)
            WHERE id = ?
            "#,
        )
        .bind(encoded)
        .bind(photos.first().cloned())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_snapshot_key(&self, id: &str, key: &str) -> Result<()> {
        sqlx::query("UPDATE listings SET snapshot_key = ? WHERE id = ?")
            .bind(key)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_listing(&self, id: &str) -> Result<Option<ListingRecord>> {
        let row = sqlx::query_as::<_, ListingRecord>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn write_run_log(&self, r: &RunLogRow) -> Result<()> {
        sqlx::query(UPSERT_RUN_LOG)
            .bind(&r.run_id)
            .bind(&r.started_at)
            .bind(&r.finished_at)
            .bind(r.duration_ms)
            .bind(&r.source_filter)
            .bind(r.dry_run)
            .bind(r.fetched)
            .bind(r.parsed)
            .bind(r.normalize_failures)
            .bind(r.candidates)
            .bind(r.rejected)
            .bind(r.new_listings)
            .bind(r.updated_listings)
            .bind(r.refreshed_listings)
            .bind(r.snapshots)
            .bind(r.hydrations)
            .bind(r.enrich_failures)
            .bind(&r.top_rejections)
            .bind(&r.warnings)
            .bind(r.quota_used)
            .bind(r.quota_ceiling)
            .bind(r.quota_exhausted)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_run_enrichment(&self, run_id: &str, snapshots: i64, hydrations: i64, failures: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE run_logs
            SET snapshots = snapshots + ?, hydrations = hydrations + ?, enrich_failures = enrich_failures + ?
            WHERE run_id = ?
            "#,
        )
        .bind(snapshots)
        .bind(hydrations)
        .bind(failures)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_runs(&self, limit: i64) -> Result<Vec<RunLogRow>> {
        let rows = sqlx::query_as::<_, RunLogRow>(
            "SELECT * FROM run_logs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
