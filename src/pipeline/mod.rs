//! Ingestion orchestrator.
//!
//! One run: load categories and stored state, fetch every selected source
//! auction by auction, classify and diff each lot, persist in batches, write
//! the run log, then hand the enrichment tail to the background hook.
//! Every store and source call the run issues goes through its
//! `RequestBudget`.

pub mod budget;
pub mod enrich;
pub mod hook;
pub mod latency;
pub mod stats;
#[cfg(test)]
pub mod testing;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::categories;
use crate::config::{Config, TOP_REJECTION_REASONS};
use crate::db::models::{ListingRecord, PriorState, RunLogRow};
use crate::db::ListingStore;
use crate::error::Result;
use crate::normalize::stable_listing_id;
use crate::router::{CategoryRouter, RouterConfig, RouterInput};
use crate::sources::{FetchCtx, SourceAdapter, SourceRegistry};
use crate::types::{CategoryDefinition, NormalizedLot, Verdict};

use budget::{QuotaUsage, RequestBudget};
use enrich::{EnrichJob, Enricher};
use hook::BackgroundHook;
use latency::LatencySummary;
use stats::{Change, ReasonCount, RunStats};

// ---------------------------------------------------------------------------
// Request / summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunRequest {
    /// Restrict the run to one registered source.
    pub source: Option<String>,
    /// Classify and report without writing anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateBrief {
    pub listing_id: String,
    pub source: String,
    pub title: String,
    pub category_id: Option<String>,
    pub score: i64,
    pub price: f64,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub source_filter: Option<String>,
    pub dry_run: bool,
    pub sources: Vec<String>,
    pub sources_failed: u64,
    pub auctions: u64,
    pub fetched: u64,
    pub parsed: u64,
    pub normalize_failures: u64,
    pub candidates: u64,
    pub rejected: u64,
    pub new_listings: u64,
    pub updated_listings: u64,
    pub refreshed_listings: u64,
    pub persisted: u64,
    pub top_rejections: Vec<ReasonCount>,
    pub candidate_lots: Vec<CandidateBrief>,
    /// Jobs handed to the background tail. Their results land in the run log.
    pub enrichment_queued: usize,
    pub quota: QuotaUsage,
    /// Wall time of the tracked operations issued so far.
    pub op_latency: LatencySummary,
    pub warnings: Vec<String>,
}

impl RunSummary {
    fn to_run_log(&self, finished_at: DateTime<Utc>) -> RunLogRow {
        RunLogRow {
            run_id: self.run_id.clone(),
            started_at: self.started_at.to_rfc3339(),
            finished_at: finished_at.to_rfc3339(),
            duration_ms: self.duration_ms as i64,
            source_filter: self.source_filter.clone(),
            dry_run: self.dry_run as i64,
            fetched: self.fetched as i64,
            parsed: self.parsed as i64,
            normalize_failures: self.normalize_failures as i64,
            candidates: self.candidates as i64,
            rejected: self.rejected as i64,
            new_listings: self.new_listings as i64,
            updated_listings: self.updated_listings as i64,
            refreshed_listings: self.refreshed_listings as i64,
            snapshots: 0,
            hydrations: 0,
            enrich_failures: 0,
            top_rejections: serde_json::to_string(&self.top_rejections).unwrap_or_else(|_| "[]".to_string()),
            warnings: serde_json::to_string(&self.warnings).unwrap_or_else(|_| "[]".to_string()),
            quota_used: i64::from(self.quota.used),
            quota_ceiling: i64::from(self.quota.ceiling),
            quota_exhausted: self.quota.exhausted as i64,
        }
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Mutable state of exactly one run. Never shared between runs.
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub budget: Arc<RequestBudget>,
    pub stats: RunStats,
    pub prior: HashMap<String, PriorState>,
    pub pending: Vec<ListingRecord>,
    pub candidates: Vec<CandidateBrief>,
    pub enrich_queue: Vec<EnrichJob>,
    pub warnings: Vec<String>,
}

impl RunContext {
    fn new(settings: &PipelineSettings, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: now,
            budget: Arc::new(RequestBudget::new(settings.request_budget, settings.budget_reserve)),
            stats: RunStats::default(),
            prior: HashMap::new(),
            pending: Vec::new(),
            candidates: Vec::new(),
            enrich_queue: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub request_budget: u32,
    pub budget_reserve: u32,
    pub persist_batch_size: usize,
    pub enrich_batch_size: usize,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            request_budget: cfg.request_budget,
            budget_reserve: cfg.budget_reserve,
            persist_batch_size: cfg.persist_batch_size,
            enrich_batch_size: cfg.enrich_batch_size,
        }
    }
}

pub struct Pipeline {
    registry: Arc<SourceRegistry>,
    store: Arc<dyn ListingStore>,
    blob: Arc<dyn BlobStore>,
    fetch: FetchCtx,
    router_cfg: RouterConfig,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        registry: Arc<SourceRegistry>,
        store: Arc<dyn ListingStore>,
        blob: Arc<dyn BlobStore>,
        fetch: FetchCtx,
        router_cfg: RouterConfig,
        settings: PipelineSettings,
    ) -> Self {
        Self { registry, store, blob, fetch, router_cfg, settings }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Execute one run. Only an unknown source filter fails the call; every
    /// other problem degrades into a warning on the summary.
    pub async fn run(&self, req: RunRequest, hook: &dyn BackgroundHook) -> Result<RunSummary> {
        let source_filter = req
            .source
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let adapters = match &source_filter {
            Some(key) => vec![self.registry.get(key)?],
            None => self.registry.list(),
        };

        let clock_start = Instant::now();
        let mut ctx = RunContext::new(&self.settings, self.fetch.now());
        info!(
            run_id = %ctx.run_id,
            sources = adapters.len(),
            dry_run = req.dry_run,
            budget = self.settings.request_budget,
            "Run started"
        );

        let categories = self.load_categories(&mut ctx).await;
        let router = CategoryRouter::new(categories, self.router_cfg.clone());
        self.load_state(&mut ctx).await;

        for adapter in &adapters {
            match self.process_source(&mut ctx, adapter, &router, req.dry_run).await {
                Ok(()) => {}
                Err(e) => {
                    error!(run_id = %ctx.run_id, source = adapter.source(), error = %e, "Source failed, skipping");
                    ctx.stats.sources_failed += 1;
                    ctx.warnings.push(format!("source '{}' failed: {e}", adapter.source()));
                }
            }
        }

        if !req.dry_run {
            self.persist(&mut ctx).await;
        }

        let quota = ctx.budget.usage();
        if quota.exhausted {
            ctx.warnings.push(format!(
                "request budget exhausted: {} of {} tracked calls used, {} skipped; results are partial",
                quota.used, quota.ceiling, quota.skipped
            ));
        }

        let mut summary = RunSummary {
            run_id: ctx.run_id.clone(),
            started_at: ctx.started_at,
            duration_ms: clock_start.elapsed().as_millis() as u64,
            source_filter,
            dry_run: req.dry_run,
            sources: adapters.iter().map(|a| a.source().to_string()).collect(),
            sources_failed: ctx.stats.sources_failed,
            auctions: ctx.stats.auctions,
            fetched: ctx.stats.fetched,
            parsed: ctx.stats.parsed,
            normalize_failures: ctx.stats.normalize_failures,
            candidates: ctx.stats.candidates,
            rejected: ctx.stats.rejected,
            new_listings: ctx.stats.new_listings,
            updated_listings: ctx.stats.updated_listings,
            refreshed_listings: ctx.stats.refreshed_listings,
            persisted: ctx.stats.persisted,
            top_rejections: ctx.stats.top_rejections(TOP_REJECTION_REASONS),
            candidate_lots: std::mem::take(&mut ctx.candidates),
            enrichment_queued: 0,
            quota,
            op_latency: ctx.budget.latency(),
            warnings: ctx.warnings.clone(),
        };

        if !req.dry_run {
            let row = summary.to_run_log(self.fetch.now());
            match ctx.budget.track_reserved("write_run_log", || self.store.write_run_log(&row)).await {
                Some(Ok(())) => {}
                Some(Err(e)) => {
                    error!(run_id = %summary.run_id, error = %e, "Failed to write run log");
                    summary.warnings.push(format!("run log write failed: {e}"));
                }
                None => summary.warnings.push("run log skipped: request budget exhausted".to_string()),
            }
            summary.enrichment_queued = self.schedule_enrichment(&mut ctx, hook);
        }
        summary.quota = ctx.budget.usage();
        summary.op_latency = ctx.budget.latency();

        info!(
            run_id = %summary.run_id,
            fetched = summary.fetched,
            parsed = summary.parsed,
            candidates = summary.candidates,
            rejected = summary.rejected,
            new = summary.new_listings,
            updated = summary.updated_listings,
            refreshed = summary.refreshed_listings,
            quota_used = summary.quota.used,
            warnings = summary.warnings.len(),
            "Run finished in {}ms",
            summary.duration_ms
        );
        Ok(summary)
    }

    // ---- loading ---------------------------------------------------------

    /// An unreadable category table yields an empty rule set, which the
    /// router reports as `router_not_loaded` for every lot.
    async fn load_categories(&self, ctx: &mut RunContext) -> Vec<CategoryDefinition> {
        match ctx.budget.track("load_categories", || self.store.load_categories()).await {
            Some(Ok(rows)) => {
                let (defs, errors) = categories::from_rows(rows);
                for e in errors {
                    warn!(run_id = %ctx.run_id, error = %e, "Skipping invalid category");
                    ctx.warnings.push(e);
                }
                info!(run_id = %ctx.run_id, categories = defs.len(), "Categories loaded");
                defs
            }
            Some(Err(e)) => {
                warn!(run_id = %ctx.run_id, error = %e, "Category load failed, continuing without categories");
                ctx.warnings.push(format!("category load failed: {e}"));
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    async fn load_state(&self, ctx: &mut RunContext) {
        match ctx.budget.track("load_state", || self.store.load_state()).await {
            Some(Ok(rows)) => {
                ctx.prior = rows.into_iter().map(|r| (r.id.clone(), r)).collect();
                info!(run_id = %ctx.run_id, listings = ctx.prior.len(), "Previous state loaded");
            }
            Some(Err(e)) => {
                warn!(run_id = %ctx.run_id, error = %e, "State load failed, treating every lot as new");
                ctx.warnings.push(format!("state load failed: {e}"));
            }
            None => {}
        }
    }

    // ---- fetch + classify ------------------------------------------------

    /// A skipped (over-budget) fetch ends the source quietly; a failed one
    /// propagates so the caller can isolate it.
    async fn process_source(
        &self,
        ctx: &mut RunContext,
        adapter: &Arc<dyn SourceAdapter>,
        router: &CategoryRouter,
        dry_run: bool,
    ) -> Result<()> {
        // Fetches leave enough working slots to upsert every row gathered so
        // far plus one more batch.
        let next_batch = u32::from(!dry_run);
        let needed = self.persist_slots(ctx.pending.len()).saturating_add(1);
        if !ctx.budget.has_headroom("fetch_active_auctions", needed) {
            return Ok(());
        }
        let Some(auctions) = ctx
            .budget
            .track("fetch_active_auctions", || adapter.fetch_active_auctions(&self.fetch))
            .await
        else {
            return Ok(());
        };
        let auctions = auctions?;
        info!(run_id = %ctx.run_id, source = adapter.source(), auctions = auctions.len(), "Fetched active auctions");

        for auction in &auctions {
            let needed = self.persist_slots(ctx.pending.len()).saturating_add(next_batch + 1);
            if !ctx.budget.has_headroom("fetch_lots", needed) {
                return Ok(());
            }
            let Some(batch) = ctx
                .budget
                .track("fetch_lots", || adapter.fetch_lots_normalized(auction, &self.fetch))
                .await
            else {
                return Ok(());
            };
            let batch = batch?;
            ctx.stats.auctions += 1;
            ctx.stats.fetched += batch.fetched as u64;
            ctx.stats.normalize_failures += batch.failures.len() as u64;
            for lot in batch.lots {
                self.ingest_lot(ctx, adapter, router, lot, dry_run);
            }
        }
        Ok(())
    }

    fn ingest_lot(
        &self,
        ctx: &mut RunContext,
        adapter: &Arc<dyn SourceAdapter>,
        router: &CategoryRouter,
        lot: NormalizedLot,
        dry_run: bool,
    ) {
        ctx.stats.parsed += 1;
        let verdict = router.classify(&RouterInput::from(&lot));
        ctx.stats.record_verdict(&verdict);

        let id = stable_listing_id(&lot.source, &lot.source_lot_id);
        let prior = ctx.prior.get(&id);
        let change = match prior {
            None => Change::New,
            Some(p) if (p.price_amount - lot.price.amount).abs() > f64::EPSILON => Change::PriceChanged,
            Some(_) => Change::Refreshed,
        };
        ctx.stats.record_change(change);

        if verdict.is_candidate() {
            ctx.candidates.push(CandidateBrief {
                listing_id: id.clone(),
                source: lot.source.clone(),
                title: lot.title.clone(),
                category_id: verdict.category_id.clone(),
                score: verdict.score,
                price: lot.price.amount,
                flags: verdict.flags.clone(),
            });

            let requires_snapshot = verdict
                .category_id
                .as_deref()
                .and_then(|c| router.category(c))
                .is_some_and(|c| c.requires_snapshot);
            let owes_snapshot = requires_snapshot && prior.map_or(true, |p| p.snapshot_key.is_none());
            let known_photos = prior.map_or(0, PriorState::photo_count).max(lot.photo_urls.len());
            let needs_photos = adapter.supports_photo_hydration() && known_photos <= 1;
            let queued = ctx.enrich_queue.iter().any(|j| j.listing_id == id);

            if !dry_run && !queued && (owes_snapshot || needs_photos) {
                ctx.enrich_queue.push(EnrichJob {
                    listing_id: id.clone(),
                    source_lot_id: lot.source_lot_id.clone(),
                    raw: lot.raw.clone(),
                    needs_photos,
                    owes_snapshot,
                    adapter: Arc::clone(adapter),
                });
            }
        }

        if !dry_run {
            let now = self.fetch.now();
            ctx.pending.push(listing_record(id, lot, &verdict, now));
        }
    }

    // ---- persistence -----------------------------------------------------

    /// Upsert calls needed to write `rows` pending listings.
    fn persist_slots(&self, rows: usize) -> u32 {
        u32::try_from(rows.div_ceil(self.settings.persist_batch_size.max(1))).unwrap_or(u32::MAX)
    }

    async fn persist(&self, ctx: &mut RunContext) {
        let rows = std::mem::take(&mut ctx.pending);
        let batch_size = self.settings.persist_batch_size.max(1);
        let mut unsaved: HashSet<String> = HashSet::new();

        for (i, chunk) in rows.chunks(batch_size).enumerate() {
            match ctx.budget.track("upsert_listings", || self.store.upsert_listings(chunk)).await {
                Some(Ok(())) => ctx.stats.persisted += chunk.len() as u64,
                Some(Err(e)) => {
                    error!(run_id = %ctx.run_id, rows = chunk.len(), error = %e, "Listing batch upsert failed");
                    ctx.warnings.push(format!("failed to persist {} listings: {e}", chunk.len()));
                    unsaved.extend(chunk.iter().map(|r| r.id.clone()));
                }
                None => {
                    let rest = &rows[i * batch_size..];
                    ctx.warnings.push(format!("{} listings not persisted: request budget exhausted", rest.len()));
                    unsaved.extend(rest.iter().map(|r| r.id.clone()));
                    break;
                }
            }
        }

        if !unsaved.is_empty() {
            ctx.enrich_queue.retain(|job| !unsaved.contains(&job.listing_id));
        }
    }

    /// Hand the enrichment queue to `hook`. Returns the number of jobs.
    fn schedule_enrichment(&self, ctx: &mut RunContext, hook: &dyn BackgroundHook) -> usize {
        let jobs = std::mem::take(&mut ctx.enrich_queue);
        if jobs.is_empty() {
            return 0;
        }
        let count = jobs.len();
        let enricher = Enricher {
            store: Arc::clone(&self.store),
            blob: Arc::clone(&self.blob),
            fetch: self.fetch.clone(),
            budget: Arc::clone(&ctx.budget),
            batch_size: self.settings.enrich_batch_size,
        };
        let run_id = ctx.run_id.clone();
        info!(run_id = %run_id, jobs = count, batch_size = enricher.batch_size, "Scheduling background enrichment");
        hook.wait_until(
            async move {
                enricher.run_and_record(&run_id, jobs).await;
            }
            .boxed(),
        );
        count
    }
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn listing_record(id: String, lot: NormalizedLot, verdict: &Verdict, now: DateTime<Utc>) -> ListingRecord {
    let now = now.to_rfc3339();
    ListingRecord {
        id,
        photos: json_list(&lot.photo_urls),
        source_categories: json_list(&lot.source_categories),
        source_tags: json_list(&lot.source_tags),
        source: lot.source,
        source_lot_id: lot.source_lot_id,
        source_url: lot.source_url,
        title: lot.title,
        description: lot.description,
        auction_end_at: lot.auction_end_at.map(|t| t.to_rfc3339()),
        lot_status: lot.lot_status.as_str().to_string(),
        location_text: lot.location_text,
        price_amount: lot.price.amount,
        price_kind: lot.price.kind.as_str().to_string(),
        price_verified: lot.price.verified as i64,
        currency: lot.price.currency,
        price_source_field: Some(lot.price.source_field).filter(|s| !s.is_empty()),
        image_url: lot.image_url,
        status: verdict.status.as_str().to_string(),
        category_id: verdict.category_id.clone(),
        category_name: verdict.category_name.clone(),
        score: verdict.score,
        rejection_reason: verdict.rejection_reason.map(|r| r.as_str().to_string()),
        snapshot_key: None,
        first_seen_at: now.clone(),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::config::ScoringWeights;
    use crate::db::SqliteStore;
    use crate::error::AppError;
    use crate::sources::FixedClock;
    use crate::types::RejectionReason;
    use chrono::TimeZone;
    use hook::TokioHook;
    use std::time::Duration;
    use testing::{raw_lot, ScriptedAdapter};

    struct Harness {
        pipeline: Pipeline,
        store: Arc<SqliteStore>,
        blob: Arc<MemoryBlobStore>,
        registry: Arc<SourceRegistry>,
        hook: TokioHook,
    }

    fn fetch_ctx() -> FetchCtx {
        FetchCtx::new(
            reqwest::Client::new(),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())),
        )
    }

    async fn harness(request_budget: u32, budget_reserve: u32) -> Harness {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let blob = Arc::new(MemoryBlobStore::default());
        let registry = SourceRegistry::new();
        let pipeline = Pipeline::new(
            Arc::clone(&registry),
            store.clone() as Arc<dyn ListingStore>,
            blob.clone() as Arc<dyn BlobStore>,
            fetch_ctx(),
            RouterConfig { max_bid: 5_000.0, steal_threshold: 1_000.0, weights: ScoringWeights::default() },
            PipelineSettings { request_budget, budget_reserve, persist_batch_size: 50, enrich_batch_size: 10 },
        );
        Harness { pipeline, store, blob, registry, hook: TokioHook::new() }
    }

    fn trailer(id: &str, price: f64, photos: &[&str]) -> serde_json::Value {
        raw_lot(id, "Utility trailer, 6x12 cargo trailer", Some(price), photos)
    }

    async fn run(h: &Harness, req: RunRequest) -> RunSummary {
        let summary = h.pipeline.run(req, &h.hook).await.unwrap();
        h.hook.drain().await;
        summary
    }

    #[tokio::test]
    async fn candidate_is_persisted_hydrated_and_snapshotted() {
        let h = harness(45, 2).await;
        let adapter = ScriptedAdapter::new("hibid")
            .with_auction("a1", vec![trailer("t1", 800.0, &["thumb.jpg"]), raw_lot("r1", "Box of records", Some(10.0), &[])])
            .with_gallery("t1", &["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg", "6.jpg", "7.jpg", "8.jpg"]);
        h.registry.register(Arc::new(adapter)).unwrap();

        let summary = run(&h, RunRequest::default()).await;
        assert_eq!(summary.parsed, 2);
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.new_listings, 2);
        assert_eq!(summary.persisted, 2);
        assert_eq!(summary.enrichment_queued, 1);
        assert_eq!(summary.top_rejections[0].reason, RejectionReason::NoCategoryMatch);
        assert_eq!(summary.candidate_lots[0].category_id.as_deref(), Some("TRAILERS"));
        assert!(summary.warnings.is_empty(), "{:?}", summary.warnings);

        let id = stable_listing_id("hibid", "t1");
        let stored = h.store.get_listing(&id).await.unwrap().unwrap();
        assert_eq!(stored.photo_list().len(), 8);
        assert_eq!(stored.image_url.as_deref(), Some("1.jpg"));
        let key = stored.snapshot_key.unwrap();
        assert_eq!(key, format!("snapshots/hibid/{id}.json"));
        assert!(h.blob.blobs.contains_key(&key));

        let runs = h.store.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].hydrations, 1);
        assert_eq!(runs[0].snapshots, 1);
        assert_eq!(runs[0].enrich_failures, 0);
    }

    #[tokio::test]
    async fn refresh_with_thumbnail_keeps_hydrated_gallery() {
        let h = harness(45, 2).await;
        let first = ScriptedAdapter::new("hibid")
            .with_auction("a1", vec![trailer("t1", 800.0, &["thumb.jpg"])])
            .with_gallery("t1", &["1.jpg", "2.jpg", "3.jpg", "4.jpg", "5.jpg", "6.jpg", "7.jpg", "8.jpg"]);
        h.registry.register(Arc::new(first)).unwrap();
        run(&h, RunRequest::default()).await;

        let second = ScriptedAdapter::new("hibid").with_auction("a1", vec![trailer("t1", 800.0, &["thumb.jpg"])]);
        h.registry.register(Arc::new(second)).unwrap();
        let summary = run(&h, RunRequest::default()).await;

        assert_eq!(summary.refreshed_listings, 1);
        assert_eq!(summary.enrichment_queued, 0, "gallery and snapshot already present");
        let stored = h.store.get_listing(&stable_listing_id("hibid", "t1")).await.unwrap().unwrap();
        assert_eq!(stored.photo_list().len(), 8);
    }

    #[tokio::test]
    async fn price_change_is_reported_as_update() {
        let h = harness(45, 2).await;
        h.registry
            .register(Arc::new(ScriptedAdapter::new("hibid").with_auction("a1", vec![trailer("t1", 800.0, &["a.jpg", "b.jpg"])])))
            .unwrap();
        run(&h, RunRequest::default()).await;

        h.registry
            .register(Arc::new(ScriptedAdapter::new("hibid").with_auction("a1", vec![trailer("t1", 950.0, &["a.jpg", "b.jpg"])])))
            .unwrap();
        let summary = run(&h, RunRequest::default()).await;
        assert_eq!(summary.updated_listings, 1);
        assert_eq!(summary.new_listings, 0);
        let stored = h.store.get_listing(&stable_listing_id("hibid", "t1")).await.unwrap().unwrap();
        assert_eq!(stored.price_amount, 950.0);
    }

    #[tokio::test]
    async fn budget_exhaustion_still_persists_accumulated_lots() {
        // 7 slots, 2 reserved: categories, state, auctions, one lot fetch and
        // the upsert it needs. The second lot fetch would leave no room.
        let h = harness(7, 2).await;
        let adapter = Arc::new(
            ScriptedAdapter::new("hibid")
                .with_auction("a1", vec![trailer("t1", 800.0, &["a.jpg", "b.jpg"])])
                .with_auction("a2", vec![trailer("t2", 800.0, &["a.jpg", "b.jpg"])])
                .with_auction("a3", vec![trailer("t3", 800.0, &["a.jpg", "b.jpg"])]),
        );
        h.registry.register(adapter.clone()).unwrap();

        let summary = run(&h, RunRequest::default()).await;
        assert_eq!(adapter.calls(), 2, "auctions + one lot fetch");
        assert_eq!(summary.parsed, 1);
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.persisted, 1);
        assert!(summary.quota.exhausted);
        assert!(summary.quota.used <= 7);
        assert!(summary.warnings.iter().any(|w| w.contains("request budget exhausted")));
        assert!(!summary.warnings.iter().any(|w| w.contains("not persisted")), "{:?}", summary.warnings);

        assert!(h.store.get_listing(&stable_listing_id("hibid", "t1")).await.unwrap().is_some());
        assert!(h.store.get_listing(&stable_listing_id("hibid", "t2")).await.unwrap().is_none());

        let runs = h.store.recent_runs(5).await.unwrap();
        assert_eq!(runs.len(), 1, "run log uses the reserve");
        assert_eq!(runs[0].quota_exhausted, 1);
    }

    #[tokio::test]
    async fn tight_budget_skips_fetching_instead_of_dropping_rows() {
        // 6 slots, 2 reserved: after categories, state and auctions only one
        // working slot remains, which a lot fetch and its upsert cannot share.
        let h = harness(6, 2).await;
        let adapter = Arc::new(ScriptedAdapter::new("hibid").with_auction("a1", vec![trailer("t1", 800.0, &["a.jpg", "b.jpg"])]));
        h.registry.register(adapter.clone()).unwrap();

        let summary = run(&h, RunRequest::default()).await;
        assert_eq!(adapter.calls(), 1, "auctions only");
        assert_eq!(summary.parsed, 0);
        assert!(summary.quota.exhausted);
        assert!(!summary.warnings.iter().any(|w| w.contains("not persisted")));
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_others() {
        let h = harness(45, 2).await;
        let mut broken = ScriptedAdapter::new("broken");
        broken.fail_auctions = true;
        h.registry.register(Arc::new(broken)).unwrap();
        h.registry
            .register(Arc::new(ScriptedAdapter::new("good").with_auction("a1", vec![trailer("g1", 500.0, &["a.jpg", "b.jpg"])])))
            .unwrap();

        let summary = run(&h, RunRequest::default()).await;
        assert_eq!(summary.sources_failed, 1);
        assert!(summary.warnings.iter().any(|w| w.contains("broken")));
        assert_eq!(summary.persisted, 1);
        assert!(h.store.get_listing(&stable_listing_id("good", "g1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dry_run_classifies_without_writing() {
        let h = harness(45, 2).await;
        h.registry
            .register(Arc::new(
                ScriptedAdapter::new("hibid")
                    .with_auction("a1", vec![trailer("t1", 800.0, &["thumb.jpg"])])
                    .with_gallery("t1", &["1.jpg", "2.jpg"]),
            ))
            .unwrap();

        let summary = run(&h, RunRequest { source: Some("hibid".into()), dry_run: true }).await;
        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.persisted, 0);
        assert_eq!(summary.enrichment_queued, 0);
        assert!(h.store.get_listing(&stable_listing_id("hibid", "t1")).await.unwrap().is_none());
        assert!(h.store.recent_runs(5).await.unwrap().is_empty());
        assert!(h.blob.blobs.is_empty());
    }

    #[tokio::test]
    async fn unknown_source_filter_is_an_error() {
        let h = harness(45, 2).await;
        h.registry.register(Arc::new(ScriptedAdapter::new("hibid"))).unwrap();
        let err = h
            .pipeline
            .run(RunRequest { source: Some("govdeals".into()), dry_run: false }, &h.hook)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownSource { ref registered, .. } if registered == &vec!["hibid".to_string()]));
    }

    #[tokio::test]
    async fn missing_categories_reject_everything_as_not_loaded() {
        let h = harness(45, 2).await;
        sqlx::query("DELETE FROM categories").execute(h.store.pool()).await.unwrap();
        h.registry
            .register(Arc::new(ScriptedAdapter::new("hibid").with_auction("a1", vec![trailer("t1", 800.0, &["a.jpg"])])))
            .unwrap();

        let summary = run(&h, RunRequest::default()).await;
        assert_eq!(summary.candidates, 0);
        assert_eq!(summary.top_rejections[0].reason, RejectionReason::RouterNotLoaded);
    }

    #[tokio::test]
    async fn enrichment_failures_are_counted_not_fatal() {
        let h = harness(45, 2).await;
        h.blob.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        // No gallery registered: hydration errors too.
        h.registry
            .register(Arc::new(ScriptedAdapter::new("hibid").with_auction("a1", vec![trailer("t1", 800.0, &["thumb.jpg"])])))
            .unwrap();

        let summary = run(&h, RunRequest::default()).await;
        assert_eq!(summary.enrichment_queued, 1);
        let runs = h.store.recent_runs(5).await.unwrap();
        assert_eq!(runs[0].enrich_failures, 2);
        let stored = h.store.get_listing(&stable_listing_id("hibid", "t1")).await.unwrap().unwrap();
        assert_eq!(stored.photo_list(), vec!["thumb.jpg"]);
        assert!(stored.snapshot_key.is_none());
    }

    #[tokio::test]
    async fn enrichment_batches_bound_concurrency() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let mut adapter = ScriptedAdapter::new("hibid");
        adapter.hydrate_delay = Duration::from_millis(10);
        for i in 0..25 {
            adapter = adapter.with_gallery(&format!("lot{i}"), &["x.jpg", "y.jpg"]);
        }
        let adapter: Arc<ScriptedAdapter> = Arc::new(adapter);

        let jobs: Vec<EnrichJob> = (0..25)
            .map(|i| EnrichJob {
                listing_id: format!("id{i}"),
                source_lot_id: format!("lot{i}"),
                raw: serde_json::Value::Null,
                needs_photos: true,
                owes_snapshot: false,
                adapter: adapter.clone(),
            })
            .collect();
        let enricher = Enricher {
            store: store as Arc<dyn ListingStore>,
            blob: Arc::new(MemoryBlobStore::default()),
            fetch: fetch_ctx(),
            budget: Arc::new(RequestBudget::new(1_000, 0)),
            batch_size: 4,
        };

        let outcome = enricher.run(&jobs).await;
        assert_eq!(outcome.hydrations, 25);
        assert_eq!(outcome.failures, 0);
        assert_eq!(adapter.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 4);
    }
}
