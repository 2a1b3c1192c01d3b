//! Adapter for auction platforms exposing the common JSON listing feed:
//!
//! - `GET {base}/auctions`: open sales
//! - `GET {base}/auctions/{id}/lots`: lots of one sale (thumbnail only)
//! - `GET {base}/lots/{id}/photos`: full gallery of one lot
//!
//! Every endpoint may answer with a bare array or an object wrapping it
//! (`{"auctions": [...]}`, `{"lots": [...]}`, `{"photos": [...]}`).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::CLOSING_WINDOW_MINUTES;
use crate::error::{AppError, Result};
use crate::normalize::{
    best_image, classify_price, dedupe_urls, lot_status_for, parse_end_time, EndTime, ImageVariant,
    PriceSignals,
};
use crate::sources::{AuctionHandle, FetchCtx, RawLot, SourceAdapter};
use crate::types::{LotStatus, NormalizedLot};

pub struct AuctionFeedAdapter {
    source: String,
    base_url: String,
}

impl AuctionFeedAdapter {
    pub fn new(source: &str, base_url: &str) -> Self {
        Self {
            source: source.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_json(&self, ctx: &FetchCtx, url: &str) -> Result<serde_json::Value> {
        debug!(source = %self.source, %url, "GET");
        let resp = ctx.http.get(url).send().await?.error_for_status()?;
        Ok(resp.json().await?)
    }

    fn fetch_error(&self, message: impl Into<String>) -> AppError {
        AppError::SourceFetch { source_key: self.source.clone(), message: message.into() }
    }
}

/// Unwrap `[...]` or `{"<key>": [...]}`.
fn items(v: serde_json::Value, key: &str) -> Option<Vec<serde_json::Value>> {
    match v {
        serde_json::Value::Array(a) => Some(a),
        serde_json::Value::Object(mut o) => match o.remove(key) {
            Some(serde_json::Value::Array(a)) => Some(a),
            _ => None,
        },
        _ => None,
    }
}

fn str_field(v: &serde_json::Value, key: &str) -> Option<String> {
    v.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Numbers arrive as JSON numbers or as strings like `"1,250.00"` / `"$310"`.
fn num_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    v.get(key).and_then(|x| {
        x.as_f64().or_else(|| {
            x.as_str().and_then(|s| {
                let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-').collect();
                cleaned.parse().ok()
            })
        })
    })
}

/// Ids arrive as strings or integers.
fn id_field(v: &serde_json::Value, key: &str) -> Option<String> {
    match v.get(key)? {
        serde_json::Value::String(s) => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(v: &serde_json::Value, key: &str) -> Vec<String> {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|s| s.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// `"Springfield, IL"` or `{"city": "Springfield", "state": "IL"}`.
fn location_field(v: &serde_json::Value) -> Option<String> {
    match v.get("location")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        obj @ serde_json::Value::Object(_) => {
            let parts: Vec<String> = ["city", "state", "zip"]
                .iter()
                .filter_map(|k| str_field(obj, k))
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    }
}

/// Image entries are either plain URL strings or `{"url", "width"}` objects.
fn image_variants(v: &serde_json::Value, key: &str) -> Vec<ImageVariant> {
    v.get(key)
        .and_then(|x| x.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|img| match img {
                    serde_json::Value::String(s) => Some(ImageVariant { url: s.clone(), width: None }),
                    serde_json::Value::Object(_) => str_field(img, "url").map(|url| ImageVariant {
                        url,
                        width: img.get("width").and_then(|w| w.as_u64()).map(|w| w as u32),
                    }),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl SourceAdapter for AuctionFeedAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch_active_auctions(&self, ctx: &FetchCtx) -> Result<Vec<AuctionHandle>> {
        let url = format!("{}/auctions", self.base_url);
        let body = self.get_json(ctx, &url).await?;
        let auctions = items(body, "auctions")
            .ok_or_else(|| self.fetch_error("/auctions response was not a list"))?;

        Ok(auctions
            .iter()
            .filter_map(|a| {
                let auction_id = id_field(a, "id").or_else(|| id_field(a, "auctionId"))?;
                Some(AuctionHandle {
                    auction_id,
                    title: str_field(a, "title"),
                    lot_count: a.get("lotCount").and_then(|n| n.as_u64()).map(|n| n as u32),
                })
            })
            .collect())
    }

    async fn fetch_lots(&self, auction: &AuctionHandle, ctx: &FetchCtx) -> Result<Vec<RawLot>> {
        let url = format!("{}/auctions/{}/lots", self.base_url, auction.auction_id);
        let body = self.get_json(ctx, &url).await?;
        items(body, "lots").ok_or_else(|| {
            self.fetch_error(format!("lots response for auction {} was not a list", auction.auction_id))
        })
    }

    fn normalize(&self, raw: &RawLot, now: DateTime<Utc>) -> Result<NormalizedLot> {
        let source_lot_id = id_field(raw, "id")
            .or_else(|| id_field(raw, "lotId"))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Normalize("lot has no id".to_string()))?;

        let end = str_field(raw, "endTime")
            .map(|s| parse_end_time(&s, now))
            .filter(|e| *e != EndTime::Unparsed)
            .or_else(|| str_field(raw, "timeLeft").map(|s| parse_end_time(&s, now)))
            .unwrap_or(EndTime::Unparsed);
        let (auction_end_at, lot_status) =
            lot_status_for(end, now, Duration::minutes(CLOSING_WINDOW_MINUTES));

        let price = classify_price(&PriceSignals {
            sold_price: num_field(raw, "soldPrice"),
            current_bid: num_field(raw, "currentBid"),
            bid_count: raw.get("bidCount").and_then(|n| n.as_u64()).map(|n| n as u32),
            starting_bid: num_field(raw, "startingBid"),
            buy_now: num_field(raw, "buyNowPrice"),
            estimate: num_field(raw, "estimate"),
            closed: lot_status == LotStatus::Closed,
            currency: str_field(raw, "currency"),
        });

        let mut variants = image_variants(raw, "images");
        let thumbnail = str_field(raw, "thumbnailUrl");
        if let Some(ref thumb) = thumbnail {
            variants.push(ImageVariant { url: thumb.clone(), width: None });
        }
        let image_url = best_image(&variants);
        let mut photo_urls = dedupe_urls(image_variants(raw, "images").into_iter().map(|v| v.url));
        if photo_urls.is_empty() {
            photo_urls.extend(image_url.clone());
        }

        Ok(NormalizedLot {
            source: self.source.clone(),
            source_url: str_field(raw, "url")
                .unwrap_or_else(|| format!("{}/lots/{}", self.base_url, source_lot_id)),
            source_lot_id,
            title: str_field(raw, "title").unwrap_or_default(),
            description: str_field(raw, "description"),
            auction_end_at,
            lot_status,
            location_text: location_field(raw),
            price,
            image_url,
            photo_urls,
            source_categories: string_list(raw, "categories"),
            source_tags: string_list(raw, "tags"),
            raw: raw.clone(),
        })
    }

    fn supports_photo_hydration(&self) -> bool {
        true
    }

    async fn hydrate_photos_for_lot(&self, source_lot_id: &str, ctx: &FetchCtx) -> Result<Vec<String>> {
        let url = format!("{}/lots/{}/photos", self.base_url, source_lot_id);
        let body = self.get_json(ctx, &url).await?;
        let wrapped = serde_json::json!({ "photos": items(body, "photos").unwrap_or_default() });
        Ok(dedupe_urls(image_variants(&wrapped, "photos").into_iter().map(|v| v.url)))
    }
}
