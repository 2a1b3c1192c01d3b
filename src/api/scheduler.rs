use std::time::Duration;

use tracing::{error, info, warn};

use crate::api::routes::{execute_run, ApiState};
use crate::error::AppError;
use crate::pipeline::RunRequest;

/// Periodic full run over every registered source.
pub struct Scheduler {
    state: ApiState,
    interval: Duration,
}

impl Scheduler {
    pub fn new(state: ApiState, interval_secs: u64) -> Self {
        Self {
            state,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // consume immediate first tick
        info!(every_secs = self.interval.as_secs(), "Scheduler started");

        loop {
            interval.tick().await;
            match execute_run(&self.state, RunRequest::default()).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    candidates = summary.candidates,
                    warnings = summary.warnings.len(),
                    "Scheduled run complete"
                ),
                Err(AppError::RunInProgress) => warn!("Previous run still in progress, skipping tick"),
                Err(e) => error!("Scheduled run error: {e}"),
            }
        }
    }
}
