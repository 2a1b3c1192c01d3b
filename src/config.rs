use crate::error::{AppError, Result};

/// Default ceiling on tracked outbound calls per run. Kept below the
/// platform's enforced limit of 50 so writes always have headroom.
pub const DEFAULT_REQUEST_BUDGET: u32 = 45;

/// Budget slots held back for bookkeeping: the run-log write and the
/// enrichment-count update that follows the background tail.
pub const DEFAULT_BUDGET_RESERVE: u32 = 2;

/// Concurrent operations per background enrichment batch.
pub const DEFAULT_ENRICH_BATCH_SIZE: usize = 10;

/// Listing rows per persistence transaction.
pub const DEFAULT_PERSIST_BATCH_SIZE: usize = 50;

/// Rejection reasons kept in the run summary frequency table.
pub const TOP_REJECTION_REASONS: usize = 5;

/// Lots ending within this many minutes are `closing` rather than `active`.
pub const CLOSING_WINDOW_MINUTES: i64 = 120;

/// Keyword and price scoring weights. The defaults are the empirically tuned
/// values the classifier has always shipped with.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub base: i64,
    pub positive_per_match: i64,
    pub positive_cap: i64,
    pub negative_per_match: i64,
    pub negative_cap: i64,
    /// Points for prices at or below the steal threshold.
    pub steal_points: i64,
    /// `(inclusive upper bound, points)` for prices above the steal threshold,
    /// ascending. Prices above the last bound score zero.
    pub price_tiers: Vec<(f64, i64)>,
    /// Added on top of a non-zero tier when the price is an observed bid or
    /// a binding price.
    pub verified_bonus: i64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 10,
            positive_per_match: 20,
            positive_cap: 60,
            negative_per_match: 30,
            negative_cap: 60,
            steal_points: 35,
            price_tiers: vec![(2_500.0, 25), (5_000.0, 15), (10_000.0, 5)],
            verified_bonus: 5,
        }
    }
}

impl ScoringWeights {
    /// Defaults with any `SCORE_*` overrides applied. Price tiers are not
    /// overridable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut w = Self::default();
        for (var, slot) in [
            ("SCORE_BASE", &mut w.base),
            ("SCORE_POSITIVE_PER_MATCH", &mut w.positive_per_match),
            ("SCORE_POSITIVE_CAP", &mut w.positive_cap),
            ("SCORE_NEGATIVE_PER_MATCH", &mut w.negative_per_match),
            ("SCORE_NEGATIVE_CAP", &mut w.negative_cap),
            ("SCORE_STEAL_POINTS", &mut w.steal_points),
            ("SCORE_VERIFIED_BONUS", &mut w.verified_bonus),
        ] {
            if let Some(raw) = lookup(var) {
                *slot = raw
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| AppError::Config(format!("{var} must be an integer")))?;
            }
        }
        Ok(w)
    }
}

/// One `key=base_url` entry from FEED_SOURCES.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub key: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Root directory for archival snapshots (BLOB_DIR)
    pub blob_dir: String,
    /// Ceiling on tracked calls per run (REQUEST_BUDGET)
    pub request_budget: u32,
    /// Slots reserved for run-log bookkeeping (REQUEST_BUDGET_RESERVE)
    pub budget_reserve: u32,
    pub enrich_batch_size: usize,
    pub persist_batch_size: usize,
    /// Scheduled run interval; 0 disables the scheduler (RUN_INTERVAL_SECS)
    pub run_interval_secs: u64,
    /// Lots priced above this are rejected outright (MAX_BID)
    pub max_bid: f64,
    /// Prices at or below this get full price score (STEAL_THRESHOLD)
    pub steal_threshold: f64,
    pub http_timeout_secs: u64,
    /// HTTP feed adapters to register (FEED_SOURCES, comma-separated key=url).
    /// Example: "hibid=https://feeds.example.com/hibid,govdeals=https://..."
    pub feed_sources: Vec<FeedSource>,
    pub weights: ScoringWeights,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "lots.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            blob_dir: std::env::var("BLOB_DIR").unwrap_or_else(|_| "snapshots".to_string()),
            request_budget: std::env::var("REQUEST_BUDGET")
                .unwrap_or_else(|_| DEFAULT_REQUEST_BUDGET.to_string())
                .parse::<u32>()
                .map_err(|_| AppError::Config("REQUEST_BUDGET must be a positive integer".to_string()))?,
            budget_reserve: std::env::var("REQUEST_BUDGET_RESERVE")
                .unwrap_or_else(|_| DEFAULT_BUDGET_RESERVE.to_string())
                .parse::<u32>()
                .unwrap_or(DEFAULT_BUDGET_RESERVE),
            enrich_batch_size: std::env::var("ENRICH_BATCH_SIZE")
                .unwrap_or_else(|_| DEFAULT_ENRICH_BATCH_SIZE.to_string())
                .parse::<usize>()
                .unwrap_or(DEFAULT_ENRICH_BATCH_SIZE)
                .max(1),
            persist_batch_size: std::env::var("PERSIST_BATCH_SIZE")
                .unwrap_or_else(|_| DEFAULT_PERSIST_BATCH_SIZE.to_string())
                .parse::<usize>()
                .unwrap_or(DEFAULT_PERSIST_BATCH_SIZE)
                .max(1),
            run_interval_secs: std::env::var("RUN_INTERVAL_SECS")
                .unwrap_or_else(|_| "0".to_string())
                .parse::<u64>()
                .unwrap_or(0),
            max_bid: std::env::var("MAX_BID")
                .unwrap_or_else(|_| "5000".to_string())
                .parse::<f64>()
                .map_err(|_| AppError::Config("MAX_BID must be a number".to_string()))?,
            steal_threshold: std::env::var("STEAL_THRESHOLD")
                .unwrap_or_else(|_| "1000".to_string())
                .parse::<f64>()
                .unwrap_or(1000.0),
            http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            feed_sources: parse_feed_sources(&std::env::var("FEED_SOURCES").unwrap_or_default())?,
            weights: ScoringWeights::from_lookup(|var| std::env::var(var).ok())?,
        };

        if cfg.budget_reserve >= cfg.request_budget {
            return Err(AppError::Config(
                "REQUEST_BUDGET_RESERVE must be smaller than REQUEST_BUDGET".to_string(),
            ));
        }
        Ok(cfg)
    }
}

/// Parse `key=url,key=url`. Blank entries are ignored; an entry without `=`
/// or with an empty side is a configuration error.
pub fn parse_feed_sources(raw: &str) -> Result<Vec<FeedSource>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (key, url) = entry.split_once('=').ok_or_else(|| {
                AppError::Config(format!("FEED_SOURCES entry '{entry}' must be key=base_url"))
            })?;
            let (key, url) = (key.trim(), url.trim().trim_end_matches('/'));
            if key.is_empty() || url.is_empty() {
                return Err(AppError::Config(format!(
                    "FEED_SOURCES entry '{entry}' has an empty key or url"
                )));
            }
            Ok(FeedSource {
                key: key.to_string(),
                base_url: url.to_string(),
            })
        })
        .collect()
}
