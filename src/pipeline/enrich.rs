//! Background enrichment: photo hydration and first-time snapshots for
//! candidates. Runs after the primary response path, in fixed-size batches.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::blob::{snapshot_key, BlobStore};
use crate::db::ListingStore;
use crate::error::Result;
use crate::normalize::dedupe_urls;
use crate::pipeline::budget::RequestBudget;
use crate::sources::{FetchCtx, SourceAdapter};

/// One candidate owed hydration and/or a snapshot.
#[derive(Clone)]
pub struct EnrichJob {
    pub listing_id: String,
    pub source_lot_id: String,
    pub raw: serde_json::Value,
    pub needs_photos: bool,
    pub owes_snapshot: bool,
    pub adapter: Arc<dyn SourceAdapter>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOutcome {
    pub hydrations: u64,
    pub snapshots: u64,
    pub failures: u64,
    /// Steps not attempted because the budget ran out.
    pub skipped: u64,
}

impl EnrichOutcome {
    fn merge(&mut self, other: EnrichOutcome) {
        self.hydrations += other.hydrations;
        self.snapshots += other.snapshots;
        self.failures += other.failures;
        self.skipped += other.skipped;
    }
}

enum Step {
    Done,
    Nothing,
    OverBudget,
}

pub struct Enricher {
    pub store: Arc<dyn ListingStore>,
    pub blob: Arc<dyn BlobStore>,
    pub fetch: FetchCtx,
    pub budget: Arc<RequestBudget>,
    pub batch_size: usize,
}

impl Enricher {
    /// Process `jobs` in batches of `batch_size`. Each batch is awaited in
    /// full before the next starts.
    pub async fn run(&self, jobs: &[EnrichJob]) -> EnrichOutcome {
        let mut outcome = EnrichOutcome::default();
        for batch in jobs.chunks(self.batch_size.max(1)) {
            for item in join_all(batch.iter().map(|job| self.enrich_one(job))).await {
                outcome.merge(item);
            }
        }
        outcome
    }

    /// `run`, then fold the counts into the run-log row.
    pub async fn run_and_record(&self, run_id: &str, jobs: Vec<EnrichJob>) -> EnrichOutcome {
        let outcome = self.run(&jobs).await;
        info!(
            run_id,
            jobs = jobs.len(),
            hydrations = outcome.hydrations,
            snapshots = outcome.snapshots,
            failures = outcome.failures,
            skipped = outcome.skipped,
            "Enrichment finished"
        );

        let recorded = self
            .budget
            .track_reserved("update_run_enrichment", || {
                self.store.update_run_enrichment(
                    run_id,
                    outcome.snapshots as i64,
                    outcome.hydrations as i64,
                    outcome.failures as i64,
                )
            })
            .await;
        if let Some(Err(e)) = recorded {
            warn!(run_id, error = %e, "Failed to record enrichment counts");
        }
        outcome
    }

    async fn enrich_one(&self, job: &EnrichJob) -> EnrichOutcome {
        let mut out = EnrichOutcome::default();

        if job.needs_photos {
            match self.hydrate(job).await {
                Ok(Step::Done) => out.hydrations += 1,
                Ok(Step::Nothing) => {}
                Ok(Step::OverBudget) => out.skipped += 1,
                Err(e) => {
                    warn!(listing_id = %job.listing_id, source = job.adapter.source(), error = %e, "Photo hydration failed");
                    out.failures += 1;
                }
            }
        }

        if job.owes_snapshot {
            match self.snapshot(job).await {
                Ok(Step::Done) => out.snapshots += 1,
                Ok(Step::Nothing) => {}
                Ok(Step::OverBudget) => out.skipped += 1,
                Err(e) => {
                    warn!(listing_id = %job.listing_id, source = job.adapter.source(), error = %e, "Snapshot failed");
                    out.failures += 1;
                }
            }
        }

        out
    }

    /// Hydration output replaces the stored list outright. An empty gallery
    /// leaves the thumbnail in place.
    async fn hydrate(&self, job: &EnrichJob) -> Result<Step> {
        let fetched = self
            .budget
            .track("hydrate_photos", || job.adapter.hydrate_photos_for_lot(&job.source_lot_id, &self.fetch))
            .await;
        let Some(photos) = fetched else {
            return Ok(Step::OverBudget);
        };
        let photos = dedupe_urls(photos?);
        if photos.is_empty() {
            return Ok(Step::Nothing);
        }

        match self
            .budget
            .track("replace_photos", || self.store.replace_photos(&job.listing_id, &photos))
            .await
        {
            Some(result) => result.map(|_| Step::Done),
            None => Ok(Step::OverBudget),
        }
    }

    async fn snapshot(&self, job: &EnrichJob) -> Result<Step> {
        let key = snapshot_key(job.adapter.source(), &job.listing_id);
        let bytes = serde_json::to_vec(&job.raw)?;

        let Some(written) = self.budget.track("blob_put", || self.blob.put(&key, bytes)).await else {
            return Ok(Step::OverBudget);
        };
        let written = written?;

        match self
            .budget
            .track("set_snapshot_key", || self.store.set_snapshot_key(&job.listing_id, &written))
            .await
        {
            Some(result) => result.map(|_| Step::Done),
            None => Ok(Step::OverBudget),
        }
    }
}
