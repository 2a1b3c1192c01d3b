//! Source-independent normalization helpers.
//!
//! Adapters map their raw records onto `NormalizedLot` using these pieces so
//! that id derivation, price semantics, end-time parsing and image selection
//! behave the same for every source. Nothing here panics on bad input; the
//! only hard failures come from `validate`.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};
use crate::types::{LotStatus, NormalizedLot, Price, PriceKind};

/// A raw record that could not be normalized. Kept with its payload so the
/// failure can be logged with context and counted.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizeFailure {
    pub error: String,
    pub raw: serde_json::Value,
}

impl NormalizeFailure {
    pub fn new(error: impl std::fmt::Display, raw: serde_json::Value) -> Self {
        Self { error: error.to_string(), raw }
    }
}

/// Stable listing id. `(source, source_lot_id)` is the only input.
pub fn stable_listing_id(source: &str, source_lot_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(source_lot_id.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..12])
}

// ---------------------------------------------------------------------------
// End time
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTime {
    At(DateTime<Utc>),
    /// The source says the auction is over but gives no timestamp.
    Ended,
    Unparsed,
}

static DURATION_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s*(days?|d|hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)")
        .expect("valid duration regex")
});

/// Parse a free-text time-remaining string (`2d 4h 13m`, `3 days 2 hours`,
/// `1:02:03:04`) or an absolute RFC 3339 timestamp into an end time.
pub fn parse_end_time(text: &str, now: DateTime<Utc>) -> EndTime {
    let t = text.trim().to_lowercase();
    if t.is_empty() {
        return EndTime::Unparsed;
    }
    if matches!(t.as_str(), "closed" | "ended" | "auction ended" | "expired" | "sold") {
        return EndTime::Ended;
    }
    if let Ok(at) = DateTime::parse_from_rfc3339(text.trim()) {
        return EndTime::At(at.with_timezone(&Utc));
    }
    if let Some(d) = parse_colon_duration(&t) {
        return now.checked_add_signed(d).map_or(EndTime::Unparsed, EndTime::At);
    }

    let mut total = Duration::zero();
    let mut matched = false;
    for cap in DURATION_PART.captures_iter(&t) {
        let (Some(whole), Some(unit)) = (cap.get(0), cap.get(2)) else { continue };
        // `2 dollars` is not a day count; `1h30m` still splits on the digit.
        if t[whole.end()..].starts_with(|c: char| c.is_alphabetic()) {
            continue;
        }
        let Ok(n) = cap[1].parse::<i64>() else { return EndTime::Unparsed };
        let part = match unit.as_str().as_bytes()[0] {
            b'd' => Duration::try_days(n),
            b'h' => Duration::try_hours(n),
            b'm' => Duration::try_minutes(n),
            _ => Duration::try_seconds(n),
        };
        let Some(sum) = part.and_then(|p| total.checked_add(&p)) else {
            return EndTime::Unparsed;
        };
        total = sum;
        matched = true;
    }
    match now.checked_add_signed(total) {
        Some(at) if matched => EndTime::At(at),
        _ => EndTime::Unparsed,
    }
}

/// `d:hh:mm:ss` or `hh:mm:ss`.
fn parse_colon_duration(t: &str) -> Option<Duration> {
    let parts: Vec<i64> = t
        .split(':')
        .map(|p| p.trim().parse::<i64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (d, h, m, s) = match parts.as_slice() {
        [d, h, m, s] => (*d, *h, *m, *s),
        [h, m, s] => (0, *h, *m, *s),
        _ => return None,
    };
    Duration::try_days(d)?
        .checked_add(&Duration::try_hours(h)?)?
        .checked_add(&Duration::try_minutes(m)?)?
        .checked_add(&Duration::try_seconds(s)?)
}

/// Resolve an end time into `(auction_end_at, lot_status)`.
pub fn lot_status_for(
    end: EndTime,
    now: DateTime<Utc>,
    closing_window: Duration,
) -> (Option<DateTime<Utc>>, LotStatus) {
    match end {
        EndTime::At(at) if at <= now => (Some(at), LotStatus::Closed),
        EndTime::At(at) if at - now <= closing_window => (Some(at), LotStatus::Closing),
        EndTime::At(at) => (Some(at), LotStatus::Active),
        EndTime::Ended => (None, LotStatus::Closed),
        EndTime::Unparsed => (None, LotStatus::Unknown),
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

/// Price-bearing fields a source may expose. Any subset can be present.
#[derive(Debug, Clone, Default)]
pub struct PriceSignals {
    pub sold_price: Option<f64>,
    pub current_bid: Option<f64>,
    pub bid_count: Option<u32>,
    pub starting_bid: Option<f64>,
    pub buy_now: Option<f64>,
    pub estimate: Option<f64>,
    pub closed: bool,
    pub currency: Option<String>,
}

fn present(v: Option<f64>) -> Option<f64> {
    v.filter(|x| !x.is_nan() && *x != 0.0)
}

/// Pick the most trustworthy price signal.
///
/// A current bid only counts as verified when the source reports at least
/// one bid; otherwise it is just the opening ask.
pub fn classify_price(s: &PriceSignals) -> Price {
    let currency = s.currency.clone().unwrap_or_else(|| "USD".to_string());
    let price = |amount: f64, kind: PriceKind, field: &str| Price {
        amount,
        kind,
        verified: kind.is_verifiable(),
        currency: currency.clone(),
        source_field: field.to_string(),
    };

    if let Some(v) = present(s.sold_price) {
        return price(v, PriceKind::Sold, "sold_price");
    }
    if let Some(v) = present(s.current_bid) {
        if s.bid_count.unwrap_or(0) > 0 {
            let kind = if s.closed { PriceKind::WinningBid } else { PriceKind::CurrentBid };
            return price(v, kind, "current_bid");
        }
    }
    if let Some(v) = present(s.buy_now) {
        return price(v, PriceKind::BuyNow, "buy_now");
    }
    if let Some(v) = present(s.current_bid) {
        return price(v, PriceKind::StartingBid, "current_bid");
    }
    if let Some(v) = present(s.starting_bid) {
        return price(v, PriceKind::StartingBid, "starting_bid");
    }
    if let Some(v) = present(s.estimate) {
        return price(v, PriceKind::Estimate, "estimate");
    }
    Price { currency, ..Price::none() }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ImageVariant {
    pub url: String,
    pub width: Option<u32>,
}

fn size_rank(url: &str) -> u8 {
    let u = url.to_lowercase();
    if ["original", "full", "large", "_xl", "/xl/"].iter().any(|k| u.contains(k)) {
        3
    } else if ["medium", "_med", "/med/"].iter().any(|k| u.contains(k)) {
        2
    } else if ["thumb", "small", "_tn", "/tn/"].iter().any(|k| u.contains(k)) {
        0
    } else {
        1
    }
}

/// Best image: widest known width, then size keyword in the URL. Ties keep
/// source order.
pub fn best_image(variants: &[ImageVariant]) -> Option<String> {
    variants
        .iter()
        .filter(|v| !v.url.trim().is_empty())
        .fold(None::<(&ImageVariant, (u32, u8))>, |best, v| {
            let rank = (v.width.unwrap_or(0), size_rank(&v.url));
            match best {
                Some((_, r)) if r >= rank => best,
                _ => Some((v, rank)),
            }
        })
        .map(|(v, _)| v.url.trim().to_string())
}

/// Drop blanks and duplicates, keep order.
pub fn dedupe_urls<I: IntoIterator<Item = String>>(urls: I) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty() && seen.insert(u.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Post-construction checks. A lot failing these must not reach the router.
pub fn validate(lot: &NormalizedLot) -> Result<()> {
    if lot.source.trim().is_empty() {
        return Err(AppError::Normalize("source is empty".to_string()));
    }
    if lot.source_lot_id.trim().is_empty() {
        return Err(AppError::Normalize("source_lot_id is missing or empty".to_string()));
    }
    if !lot.price.amount.is_finite() || lot.price.amount < 0.0 {
        return Err(AppError::Normalize(format!(
            "price amount {} is not a non-negative number",
            lot.price.amount
        )));
    }
    if lot.price.verified && !lot.price.kind.is_verifiable() {
        return Err(AppError::Normalize(format!(
            "price kind {} cannot be verified",
            lot.price.kind
        )));
    }
    if lot.price.kind == PriceKind::None && lot.price.amount != 0.0 {
        return Err(AppError::Normalize("unpriced lot carries a non-zero amount".to_string()));
    }
    Ok(())
}
