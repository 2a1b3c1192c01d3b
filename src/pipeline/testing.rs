//! Test doubles shared by the pipeline tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use crate::error::{AppError, Result};
use crate::sources::{AuctionHandle, FetchCtx, RawLot, SourceAdapter};
use crate::types::{LotStatus, NormalizedLot, Price, PriceKind};

/// In-memory source. Lots are `{id, title, price?, photos?}` objects keyed by
/// auction id; galleries are keyed by lot id.
pub struct ScriptedAdapter {
    pub key: String,
    pub auctions: Vec<String>,
    pub lots: HashMap<String, Vec<RawLot>>,
    pub galleries: HashMap<String, Vec<String>>,
    pub fail_auctions: bool,
    pub hydrate_delay: Duration,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            auctions: Vec::new(),
            lots: HashMap::new(),
            galleries: HashMap::new(),
            fail_auctions: false,
            hydrate_delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_auction(mut self, auction_id: &str, lots: Vec<RawLot>) -> Self {
        self.auctions.push(auction_id.to_string());
        self.lots.insert(auction_id.to_string(), lots);
        self
    }

    pub fn with_gallery(mut self, lot_id: &str, photos: &[&str]) -> Self {
        self.galleries
            .insert(lot_id.to_string(), photos.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn raw_lot(id: &str, title: &str, price: Option<f64>, photos: &[&str]) -> RawLot {
    json!({ "id": id, "title": title, "price": price, "photos": photos })
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn source(&self) -> &str {
        &self.key
    }

    async fn fetch_active_auctions(&self, _ctx: &FetchCtx) -> Result<Vec<AuctionHandle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_auctions {
            return Err(AppError::SourceFetch {
                source_key: self.key.clone(),
                message: "HTTP 503".to_string(),
            });
        }
        Ok(self
            .auctions
            .iter()
            .map(|id| AuctionHandle { auction_id: id.clone(), title: None, lot_count: None })
            .collect())
    }

    async fn fetch_lots(&self, auction: &AuctionHandle, _ctx: &FetchCtx) -> Result<Vec<RawLot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lots.get(&auction.auction_id).cloned().unwrap_or_default())
    }

    fn normalize(&self, raw: &RawLot, _now: DateTime<Utc>) -> Result<NormalizedLot> {
        let id = raw["id"]
            .as_str()
            .ok_or_else(|| AppError::Normalize("missing id".to_string()))?;
        let price = match raw["price"].as_f64() {
            Some(amount) => Price {
                amount,
                kind: PriceKind::CurrentBid,
                verified: true,
                currency: "USD".to_string(),
                source_field: "price".to_string(),
            },
            None => Price::none(),
        };
        let photo_urls: Vec<String> = raw["photos"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(NormalizedLot {
            source: self.key.clone(),
            source_lot_id: id.to_string(),
            source_url: format!("https://{}.test/lots/{id}", self.key),
            title: raw["title"].as_str().unwrap_or_default().to_string(),
            description: None,
            auction_end_at: None,
            lot_status: LotStatus::Active,
            location_text: None,
            price,
            image_url: photo_urls.first().cloned(),
            photo_urls,
            source_categories: vec![],
            source_tags: vec![],
            raw: raw.clone(),
        })
    }

    fn supports_photo_hydration(&self) -> bool {
        true
    }

    async fn hydrate_photos_for_lot(&self, source_lot_id: &str, _ctx: &FetchCtx) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hydrate_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.galleries.get(source_lot_id) {
            Some(photos) => Ok(photos.clone()),
            None => Err(AppError::SourceFetch {
                source_key: self.key.clone(),
                message: format!("no gallery for {source_lot_id}"),
            }),
        }
    }
}
