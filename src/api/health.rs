//! Shared run state for the /health endpoint.
//! Updated by every run trigger (HTTP and scheduler), read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::pipeline::RunSummary;

#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub candidates: u64,
    pub warnings: usize,
}

#[derive(Default)]
pub struct HealthState {
    /// True while a run is executing; at most one at a time.
    running: AtomicBool,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    last_run: Mutex<Option<LastRun>>,
}

/// Held for the duration of a run. Dropping it frees the slot.
pub struct RunGuard<'a> {
    state: &'a HealthState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if another run holds the slot.
    pub fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard { state: self })
    }

    pub fn record_success(&self, summary: &RunSummary) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(LastRun {
                run_id: summary.run_id.clone(),
                started_at: summary.started_at,
                duration_ms: summary.duration_ms,
                candidates: summary.candidates,
                warnings: summary.warnings.len(),
            });
        }
    }

    pub fn record_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn last_run(&self) -> Option<LastRun> {
        self.last_run.lock().ok().and_then(|l| l.clone())
    }
}
