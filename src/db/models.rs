/// Database row types matching the schema in migrations/0001_init.sql.
/// Used by sqlx for typed queries.
use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
    pub enabled: i64,
    pub min_score: i64,
    pub requires_snapshot: i64,
    pub positive_keywords: Option<String>,
    pub negative_keywords: Option<String>,
    pub hard_gates: Option<String>,
}

/// One `listings` row, keyed by the stable listing id.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ListingRecord {
    pub id: String,
    pub source: String,
    pub source_lot_id: String,
    pub source_url: String,
    pub title: String,
    pub description: Option<String>,
    pub auction_end_at: Option<String>,
    pub lot_status: String,
    pub location_text: Option<String>,
    pub price_amount: f64,
    pub price_kind: String,
    pub price_verified: i64,
    pub currency: String,
    pub price_source_field: Option<String>,
    pub image_url: Option<String>,
    /// JSON-encoded ordered URL list.
    pub photos: String,
    pub source_categories: String,
    pub source_tags: String,
    pub status: String,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub score: i64,
    pub rejection_reason: Option<String>,
    pub snapshot_key: Option<String>,
    pub first_seen_at: String,
    pub updated_at: String,
}

impl ListingRecord {
    #[cfg(test)]
    pub fn photo_list(&self) -> Vec<String> {
        decode_photos(Some(&self.photos))
    }
}

/// The slice of a stored listing the pipeline needs to reconcile a fresh
/// fetch against.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PriorState {
    pub id: String,
    pub price_amount: f64,
    pub snapshot_key: Option<String>,
    pub photos: Option<String>,
}

impl PriorState {
    pub fn photo_count(&self) -> usize {
        decode_photos(self.photos.as_deref()).len()
    }
}

/// `run_logs` row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RunLogRow {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: i64,
    pub source_filter: Option<String>,
    pub dry_run: i64,
    pub fetched: i64,
    pub parsed: i64,
    pub normalize_failures: i64,
    pub candidates: i64,
    pub rejected: i64,
    pub new_listings: i64,
    pub updated_listings: i64,
    pub refreshed_listings: i64,
    pub snapshots: i64,
    pub hydrations: i64,
    pub enrich_failures: i64,
    pub top_rejections: String,
    pub warnings: String,
    pub quota_used: i64,
    pub quota_ceiling: i64,
    pub quota_exhausted: i64,
}

/// Stored photo lists are JSON arrays; anything unreadable counts as empty.
pub fn decode_photos(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
        .unwrap_or_default()
}
