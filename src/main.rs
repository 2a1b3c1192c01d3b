mod api;
mod blob;
mod categories;
mod config;
mod db;
mod error;
mod normalize;
mod pipeline;
mod router;
mod sources;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::api::scheduler::Scheduler;
use crate::blob::{BlobStore, FsBlobStore};
use crate::config::Config;
use crate::db::{ListingStore, SqliteStore};
use crate::error::Result;
use crate::pipeline::hook::TokioHook;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::router::RouterConfig;
use crate::sources::{init_registry, FetchCtx};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store: Arc<dyn ListingStore> = Arc::new(SqliteStore::connect(&cfg.db_path).await?);

    // --- Sources ---
    let registry = init_registry(&cfg)?;
    if registry.count() == 0 {
        warn!("FEED_SOURCES not set: runs will fetch nothing. Example: FEED_SOURCES=hibid=https://feeds.example.com/hibid");
    }

    // --- Pipeline ---
    let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&cfg.blob_dir));
    let pipeline = Pipeline::new(
        registry,
        Arc::clone(&store),
        blob,
        FetchCtx::from_config(&cfg)?,
        RouterConfig::from_config(&cfg),
        PipelineSettings::from_config(&cfg),
    );
    info!(
        "Pipeline ready (budget={} reserve={} max_bid=${:.0} steal=${:.0} blobs={})",
        cfg.request_budget, cfg.budget_reserve, cfg.max_bid, cfg.steal_threshold, cfg.blob_dir,
    );

    let api_state = ApiState {
        pipeline: Arc::new(pipeline),
        store,
        health: Arc::new(HealthState::new()),
        hook: Arc::new(TokioHook::new()),
    };

    // Scheduler (background, every RUN_INTERVAL_SECS)
    if cfg.run_interval_secs > 0 {
        let scheduler = Scheduler::new(api_state.clone(), cfg.run_interval_secs);
        tokio::spawn(async move { scheduler.run().await });
    } else {
        info!("RUN_INTERVAL_SECS=0: runs are triggered over HTTP only");
    }

    // HTTP API server
    let hook = Arc::clone(&api_state.hook);
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested, waiting for background enrichment");
        })
        .await?;
    hook.drain().await;

    Ok(())
}
