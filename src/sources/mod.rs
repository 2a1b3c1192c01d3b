//! Source adapter contract.
//!
//! Adding a source means implementing `SourceAdapter` and adding it to
//! `init_registry`. The pipeline only ever sees `Arc<dyn SourceAdapter>`.

pub mod auction_feed;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::normalize::{validate, NormalizeFailure};
use crate::types::NormalizedLot;

pub use auction_feed::AuctionFeedAdapter;
pub use registry::SourceRegistry;

/// Raw source payload, kept opaque until the adapter normalizes it.
pub type RawLot = serde_json::Value;

/// One auction (sale event) on a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionHandle {
    pub auction_id: String,
    pub title: Option<String>,
    pub lot_count: Option<u32>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Injected into every adapter call: the HTTP client to fetch with and the
/// clock to normalize against.
#[derive(Clone)]
pub struct FetchCtx {
    pub http: reqwest::Client,
    pub clock: Arc<dyn Clock>,
}

impl FetchCtx {
    pub fn new(http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self { http, clock }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()?;
        Ok(Self::new(http, Arc::new(SystemClock)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Normalized lots of one auction plus the records that failed.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub lots: Vec<NormalizedLot>,
    pub failures: Vec<NormalizeFailure>,
    /// Raw records returned by the source before normalization.
    pub fetched: usize,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique registry key.
    fn source(&self) -> &str;

    async fn fetch_active_auctions(&self, ctx: &FetchCtx) -> Result<Vec<AuctionHandle>>;

    async fn fetch_lots(&self, auction: &AuctionHandle, ctx: &FetchCtx) -> Result<Vec<RawLot>>;

    /// Map one raw record onto the canonical shape. Must not panic.
    fn normalize(&self, raw: &RawLot, now: DateTime<Utc>) -> Result<NormalizedLot>;

    /// Fetch then normalize, isolating every per-record failure. Records are
    /// kept in fetch order.
    async fn fetch_lots_normalized(
        &self,
        auction: &AuctionHandle,
        ctx: &FetchCtx,
    ) -> Result<NormalizedBatch> {
        let raw = self.fetch_lots(auction, ctx).await?;
        Ok(normalize_all(self, &auction.auction_id, raw, ctx.now()))
    }

    /// Whether `hydrate_photos_for_lot` returns anything useful.
    fn supports_photo_hydration(&self) -> bool {
        false
    }

    /// Full photo gallery for a lot whose list view only carried a thumbnail.
    async fn hydrate_photos_for_lot(&self, _source_lot_id: &str, _ctx: &FetchCtx) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Normalize and validate a raw batch. Failures never abort the batch.
pub fn normalize_all<A: SourceAdapter + ?Sized>(
    adapter: &A,
    auction_id: &str,
    raw: Vec<RawLot>,
    now: DateTime<Utc>,
) -> NormalizedBatch {
    let mut batch = NormalizedBatch { fetched: raw.len(), ..Default::default() };
    for record in raw {
        match adapter.normalize(&record, now).and_then(|lot| validate(&lot).map(|_| lot)) {
            Ok(lot) => batch.lots.push(lot),
            Err(e) => {
                warn!(
                    source = adapter.source(),
                    auction_id,
                    error = %e,
                    "Skipping lot that failed normalization"
                );
                batch.failures.push(NormalizeFailure::new(e, record));
            }
        }
    }
    batch
}

/// Build the registry from the configured sources. This is the one place a
/// new adapter gets wired in.
pub fn init_registry(cfg: &Config) -> Result<Arc<SourceRegistry>> {
    let registry = SourceRegistry::new();
    for feed in &cfg.feed_sources {
        registry.register(Arc::new(AuctionFeedAdapter::new(&feed.key, &feed.base_url)))?;
    }
    info!(sources = registry.count(), "Source registry initialised: [{}]", registry.keys().join(", "));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::types::{LotStatus, Price};
    use chrono::TimeZone;

    struct EchoAdapter;

    #[async_trait]
    impl SourceAdapter for EchoAdapter {
        fn source(&self) -> &str {
            "echo"
        }

        async fn fetch_active_auctions(&self, _ctx: &FetchCtx) -> Result<Vec<AuctionHandle>> {
            Ok(vec![])
        }

        async fn fetch_lots(&self, _auction: &AuctionHandle, _ctx: &FetchCtx) -> Result<Vec<RawLot>> {
            Ok(vec![
                serde_json::json!({"id": "1", "title": "First"}),
                serde_json::json!({"title": "No id"}),
                serde_json::json!({"id": "", "title": "Empty id"}),
                serde_json::json!({"id": "2", "title": "Second"}),
            ])
        }

        fn normalize(&self, raw: &RawLot, _now: DateTime<Utc>) -> Result<NormalizedLot> {
            let id = raw
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| AppError::Normalize("missing id".to_string()))?;
            Ok(NormalizedLot {
                source: "echo".into(),
                source_lot_id: id.to_string(),
                source_url: String::new(),
                title: raw["title"].as_str().unwrap_or_default().to_string(),
                description: None,
                auction_end_at: None,
                lot_status: LotStatus::Unknown,
                location_text: None,
                price: Price::none(),
                image_url: None,
                photo_urls: vec![],
                source_categories: vec![],
                source_tags: vec![],
                raw: raw.clone(),
            })
        }
    }

    #[tokio::test]
    async fn default_normalized_fetch_isolates_bad_records() {
        let ctx = FetchCtx::new(
            reqwest::Client::new(),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())),
        );
        let auction = AuctionHandle { auction_id: "a1".into(), title: None, lot_count: None };
        let batch = EchoAdapter.fetch_lots_normalized(&auction, &ctx).await.unwrap();

        assert_eq!(batch.fetched, 4);
        let ids: Vec<_> = batch.lots.iter().map(|l| l.source_lot_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.failures[0].raw["title"], "No id");
    }

    #[tokio::test]
    async fn hydration_defaults_to_unsupported_and_empty() {
        let ctx = FetchCtx::new(reqwest::Client::new(), Arc::new(SystemClock));
        assert!(!EchoAdapter.supports_photo_hydration());
        assert!(EchoAdapter.hydrate_photos_for_lot("1", &ctx).await.unwrap().is_empty());
    }
}
