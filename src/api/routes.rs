use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::api::health::{HealthState, LastRun};
use crate::db::models::{ListingRecord, RunLogRow};
use crate::db::ListingStore;
use crate::error::{AppError, Result};
use crate::pipeline::hook::TokioHook;
use crate::pipeline::{Pipeline, RunRequest, RunSummary};

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<dyn ListingStore>,
    pub health: Arc<HealthState>,
    pub hook: Arc<TokioHook>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/runs", post(post_run))
        .route("/runs/recent", get(get_recent_runs))
        .route("/listings/:id", get(get_listing))
        .route("/health", get(get_health))
        .with_state(state)
}

/// Run the pipeline once, refusing to overlap with a run already in flight.
/// Shared by the HTTP trigger and the scheduler.
pub async fn execute_run(state: &ApiState, req: RunRequest) -> Result<RunSummary> {
    let Some(_guard) = state.health.try_begin() else {
        return Err(AppError::RunInProgress);
    };
    match state.pipeline.run(req, state.hook.as_ref()).await {
        Ok(summary) => {
            state.health.record_success(&summary);
            Ok(summary)
        }
        Err(e) => {
            state.health.record_failure();
            error!(error = %e, "Run failed");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentRunsQuery {
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct RunLogResponse {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: i64,
    pub source_filter: Option<String>,
    pub dry_run: bool,
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
    pub top_rejections: serde_json::Value,
    pub warnings: serde_json::Value,
    pub quota_used: i64,
    pub quota_ceiling: i64,
    pub quota_exhausted: bool,
}

impl From<RunLogRow> for RunLogResponse {
    fn from(r: RunLogRow) -> Self {
        let json = |s: &str| serde_json::from_str(s).unwrap_or(serde_json::Value::Array(vec![]));
        Self {
            top_rejections: json(&r.top_rejections),
            warnings: json(&r.warnings),
            run_id: r.run_id,
            started_at: r.started_at,
            finished_at: r.finished_at,
            duration_ms: r.duration_ms,
            source_filter: r.source_filter,
            dry_run: r.dry_run != 0,
            fetched: r.fetched,
            parsed: r.parsed,
            normalize_failures: r.normalize_failures,
            candidates: r.candidates,
            rejected: r.rejected,
            new_listings: r.new_listings,
            updated_listings: r.updated_listings,
            refreshed_listings: r.refreshed_listings,
            snapshots: r.snapshots,
            hydrations: r.hydrations,
            enrich_failures: r.enrich_failures,
            quota_used: r.quota_used,
            quota_ceiling: r.quota_ceiling,
            quota_exhausted: r.quota_exhausted != 0,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sources: Vec<String>,
    pub running: bool,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub last_run: Option<LastRun>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn post_run(
    State(state): State<ApiState>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunSummary>> {
    info!(source = ?req.source, dry_run = req.dry_run, "Run requested over HTTP");
    let summary = execute_run(&state, req).await?;
    Ok(Json(summary))
}

async fn get_recent_runs(
    State(state): State<ApiState>,
    Query(params): Query<RecentRunsQuery>,
) -> Result<Json<Vec<RunLogResponse>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let rows = state.store.recent_runs(limit).await?;
    Ok(Json(rows.into_iter().map(RunLogResponse::from).collect()))
}

async fn get_listing(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<ListingRecord>> {
    match state.store.get_listing(&id).await? {
        Some(listing) => Ok(Json(listing)),
        None => Err(AppError::ListingNotFound(id)),
    }
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sources: state.pipeline.registry().keys(),
        running: state.health.running(),
        runs_completed: state.health.runs_completed(),
        runs_failed: state.health.runs_failed(),
        last_run: state.health.last_run(),
    })
}
