use std::collections::HashMap;

use serde::Serialize;

use crate::types::{RejectionReason, Verdict};

/// Counters accumulated over one run. Reporting only.
#[derive(Debug, Default, Clone)]
pub struct RunStats {
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
    rejections: HashMap<RejectionReason, u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasonCount {
    pub reason: RejectionReason,
    pub count: u64,
}

/// How a fresh lot relates to what was stored before the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    PriceChanged,
    Refreshed,
}

impl RunStats {
    pub fn record_verdict(&mut self, verdict: &Verdict) {
        if verdict.is_candidate() {
            self.candidates += 1;
        } else {
            self.rejected += 1;
            if let Some(reason) = verdict.rejection_reason {
                *self.rejections.entry(reason).or_insert(0) += 1;
            }
        }
    }

    pub fn record_change(&mut self, change: Change) {
        match change {
            Change::New => self.new_listings += 1,
            Change::PriceChanged => self.updated_listings += 1,
            Change::Refreshed => self.refreshed_listings += 1,
        }
    }

    /// Most frequent rejection reasons, ties broken by reason order.
    pub fn top_rejections(&self, n: usize) -> Vec<ReasonCount> {
        let mut counts: Vec<ReasonCount> = self
            .rejections
            .iter()
            .map(|(&reason, &count)| ReasonCount { reason, count })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then(a.reason.cmp(&b.reason)));
        counts.truncate(n);
        counts
    }
}
