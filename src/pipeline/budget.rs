//! Request budget shared by every chatty operation of one run.
//!
//! The ceiling is split in two pools: working slots for fetches and
//! persistence, and a small reserve only `track_reserved` may draw from.
//! The sum of both can never exceed the ceiling.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::pipeline::latency::{LatencyStats, LatencySummary};

pub struct RequestBudget {
    ceiling: u32,
    reserve: u32,
    working_used: AtomicU32,
    reserve_used: AtomicU32,
    skipped: AtomicU32,
    latency: LatencyStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub used: u32,
    pub ceiling: u32,
    pub skipped: u32,
    pub exhausted: bool,
}

impl RequestBudget {
    /// `reserve` is clamped to the ceiling.
    pub fn new(ceiling: u32, reserve: u32) -> Self {
        Self {
            ceiling,
            reserve: reserve.min(ceiling),
            working_used: AtomicU32::new(0),
            reserve_used: AtomicU32::new(0),
            skipped: AtomicU32::new(0),
            latency: LatencyStats::new(),
        }
    }

    /// Run `op` if a working slot is free, `None` otherwise.
    pub async fn track<T, F, Fut>(&self, label: &str, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let limit = self.ceiling - self.reserve;
        self.run_in(&self.working_used, limit, label, op).await
    }

    /// Run `op` against the reserved pool.
    pub async fn track_reserved<T, F, Fut>(&self, label: &str, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.run_in(&self.reserve_used, self.reserve, label, op).await
    }

    async fn run_in<T, F, Fut>(&self, pool: &AtomicU32, limit: u32, label: &str, op: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let acquired = pool
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .is_ok();
        if !acquired {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn!(
                op = label,
                used = self.used(),
                ceiling = self.ceiling,
                "Request budget exhausted, skipping operation"
            );
            return None;
        }

        let started = Instant::now();
        let out = op().await;
        self.latency.record(started.elapsed());
        debug!(op = label, used = self.used(), "Tracked operation");
        Some(out)
    }

    /// True when at least `slots` working slots are still free. A refusal
    /// counts as a skipped operation, like an exhausted `track`.
    pub fn has_headroom(&self, label: &str, slots: u32) -> bool {
        let free = self.working_remaining();
        if free >= slots {
            return true;
        }
        self.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(op = label, free, needed = slots, "Not enough request budget left, skipping operation");
        false
    }

    pub fn working_remaining(&self) -> u32 {
        (self.ceiling - self.reserve).saturating_sub(self.working_used.load(Ordering::SeqCst))
    }

    /// Total slots consumed across both pools.
    pub fn used(&self) -> u32 {
        self.working_used.load(Ordering::SeqCst) + self.reserve_used.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u32 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn usage(&self) -> QuotaUsage {
        QuotaUsage {
            used: self.used(),
            ceiling: self.ceiling,
            skipped: self.skipped(),
            exhausted: self.skipped() > 0,
        }
    }

    pub fn latency(&self) -> LatencySummary {
        self.latency.summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn working_pool_stops_before_reserve() {
        let budget = RequestBudget::new(4, 1);
        let mut ran = 0;
        for _ in 0..10 {
            if budget.track("fetch", || async { 1 }).await.is_some() {
                ran += 1;
            }
        }
        assert_eq!(ran, 3);
        assert_eq!(budget.skipped(), 7);

        assert_eq!(budget.track_reserved("run_log", || async { "ok" }).await, Some("ok"));
        assert_eq!(budget.track_reserved("run_log", || async { "again" }).await, None);
        assert_eq!(budget.used(), 4);
        assert!(budget.usage().exhausted);
    }

    #[tokio::test]
    async fn headroom_check_counts_refusals() {
        let budget = RequestBudget::new(5, 2);
        assert!(budget.has_headroom("fetch_lots", 3));
        budget.track("fetch", || async {}).await;
        assert_eq!(budget.working_remaining(), 2);
        assert!(!budget.has_headroom("fetch_lots", 3));
        assert_eq!(budget.skipped(), 1);
        assert!(budget.usage().exhausted);
        assert_eq!(budget.used(), 1, "a refusal consumes nothing");
    }

    #[tokio::test]
    async fn skipped_operation_is_never_invoked() {
        let budget = RequestBudget::new(1, 1);
        let mut called = false;
        let out = budget
            .track("fetch", || {
                called = true;
                async {}
            })
            .await;
        assert!(out.is_none());
        assert!(!called);
    }

    #[tokio::test]
    async fn concurrent_callers_never_overshoot() {
        let budget = Arc::new(RequestBudget::new(10, 0));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let b = Arc::clone(&budget);
                tokio::spawn(async move { b.track("x", || async {}).await.is_some() })
            })
            .collect();
        let mut ok = 0;
        for h in handles {
            if h.await.unwrap() {
                ok += 1;
            }
        }
        assert_eq!(ok, 10);
        assert_eq!(budget.used(), 10);
        assert_eq!(budget.latency().samples, 10);
    }
}
