//! Category router: decides whether a normalized lot is worth deeper
//! analysis.
//!
//! Evaluation order is fixed:
//! 1. price ceiling (`price_over_max`)
//! 2. global negatives (`global_negative_trigger`)
//! 3. no categories loaded (`router_not_loaded`)
//! 4. per-category keyword + price scoring
//! 5. candidacy gate (negatives, reject gates, unpriced, min score)
//! 6. best candidate by score, else best attempt, else `no_category_match`
//!
//! The router does no I/O and holds no mutable state.

pub mod gates;
pub mod keywords;
pub mod scoring;

use std::sync::LazyLock;

use crate::config::{Config, ScoringWeights};
use crate::router::keywords::PhraseMatcher;
use crate::types::{
    CategoryDefinition, GateAction, LotStatus, NormalizedLot, PriceKind, RejectionReason, Verdict,
    VerdictStatus,
};

/// Source-independent disqualifiers. These override every category.
pub const GLOBAL_NEGATIVES: &[&str] = &[
    "for parts",
    "parts only",
    "salvage title",
    "rebuilt title",
    "total loss",
    "fire damage",
    "fire damaged",
    "flood damage",
    "flood damaged",
];

static GLOBAL_NEGATIVE_MATCHERS: LazyLock<Vec<PhraseMatcher>> =
    LazyLock::new(|| GLOBAL_NEGATIVES.iter().filter_map(|p| PhraseMatcher::new(p)).collect());

/// Fields the router looks at.
#[derive(Debug, Clone)]
pub struct RouterInput {
    pub source: String,
    pub title: String,
    pub description: Option<String>,
    /// `None` when the lot is unpriced.
    pub price: Option<f64>,
    pub price_kind: PriceKind,
    pub price_verified: bool,
    pub lot_status: LotStatus,
    pub location: Option<String>,
    pub source_categories: Vec<String>,
    pub source_tags: Vec<String>,
}

impl From<&NormalizedLot> for RouterInput {
    fn from(lot: &NormalizedLot) -> Self {
        Self {
            source: lot.source.clone(),
            title: lot.title.clone(),
            description: lot.description.clone(),
            price: lot.price.is_priced().then_some(lot.price.amount),
            price_kind: lot.price.kind,
            price_verified: lot.price.verified,
            lot_status: lot.lot_status,
            location: lot.location_text.clone(),
            source_categories: lot.source_categories.clone(),
            source_tags: lot.source_tags.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_bid: f64,
    pub steal_threshold: f64,
    pub weights: ScoringWeights,
}

impl RouterConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_bid: cfg.max_bid,
            steal_threshold: cfg.steal_threshold,
            weights: cfg.weights.clone(),
        }
    }
}

struct CompiledCategory {
    def: CategoryDefinition,
    positive: Vec<PhraseMatcher>,
    negative: Vec<PhraseMatcher>,
}

/// Category rules compiled for one run.
pub struct CategoryRouter {
    categories: Vec<CompiledCategory>,
    cfg: RouterConfig,
}

impl CategoryRouter {
    pub fn new(categories: Vec<CategoryDefinition>, cfg: RouterConfig) -> Self {
        let categories = categories
            .into_iter()
            .map(|def| CompiledCategory {
                positive: keywords::compile(&def.positive_keywords),
                negative: keywords::compile(&def.negative_keywords),
                def,
            })
            .collect();
        Self { categories, cfg }
    }

    /// Look up a loaded category by id.
    pub fn category(&self, id: &str) -> Option<&CategoryDefinition> {
        self.categories.iter().map(|c| &c.def).find(|d| d.id == id)
    }

    pub fn classify(&self, input: &RouterInput) -> Verdict {
        if let Some(price) = input.price {
            if price.is_finite() && price > self.cfg.max_bid {
                return Verdict::rejected(RejectionReason::PriceOverMax);
            }
        }

        let text = match &input.description {
            Some(d) => format!("{} {}", input.title, d).to_lowercase(),
            None => input.title.to_lowercase(),
        };

        let globals = keywords::matches(&GLOBAL_NEGATIVE_MATCHERS, &text);
        if !globals.is_empty() {
            return Verdict {
                global_negatives: globals,
                ..Verdict::rejected(RejectionReason::GlobalNegativeTrigger)
            };
        }

        if self.categories.is_empty() {
            return Verdict::rejected(RejectionReason::RouterNotLoaded);
        }

        let mut best_candidate: Option<Verdict> = None;
        let mut best_attempt: Option<Verdict> = None;

        for cat in self.categories.iter().filter(|c| c.def.enabled) {
            let Some(verdict) = self.score_category(cat, input, &text) else {
                continue;
            };
            let slot = if verdict.is_candidate() { &mut best_candidate } else { &mut best_attempt };
            if slot.as_ref().map_or(true, |b| verdict.score > b.score) {
                *slot = Some(verdict);
            }
        }

        best_candidate
            .or(best_attempt)
            .unwrap_or_else(|| Verdict::rejected(RejectionReason::NoCategoryMatch))
    }

    /// `None` when the category had no positive match at all.
    fn score_category(&self, cat: &CompiledCategory, input: &RouterInput, text: &str) -> Option<Verdict> {
        let matched_positive = keywords::matches(&cat.positive, text);
        if matched_positive.is_empty() {
            return None;
        }
        let matched_negative = keywords::matches(&cat.negative, text);

        let w = &self.cfg.weights;
        let price_points = input
            .price
            .map(|p| scoring::price_score(p, input.price_verified, self.cfg.steal_threshold, w))
            .unwrap_or(0);
        let score = (scoring::keyword_score(matched_positive.len(), matched_negative.len(), w) + price_points)
            .clamp(0, 100);

        let mut hard_gate_failures = Vec::new();
        let mut flags = Vec::new();
        for gate in cat.def.hard_gates.iter().filter(|g| gates::fires(g, input)) {
            match gate.action {
                GateAction::Reject => hard_gate_failures.push(gate.to_string()),
                GateAction::Flag => flags.push(gate.to_string()),
            }
        }

        let rejection_reason = if !matched_negative.is_empty() {
            Some(RejectionReason::MatchedNegativeKeywords)
        } else if !hard_gate_failures.is_empty() {
            Some(RejectionReason::HardGateFailed)
        } else if input.price.is_none() {
            Some(RejectionReason::Unpriced)
        } else if score < cat.def.min_score {
            Some(RejectionReason::BelowMinScore)
        } else {
            None
        };

        Some(Verdict {
            status: if rejection_reason.is_none() { VerdictStatus::Candidate } else { VerdictStatus::Rejected },
            category_id: Some(cat.def.id.clone()),
            category_name: Some(cat.def.name.clone()),
            score,
            min_score: cat.def.min_score,
            matched_positive,
            matched_negative,
            hard_gate_failures,
            flags,
            global_negatives: Vec::new(),
            rejection_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GateField, GateOperator, GateValue, HardGate};

    fn category(id: &str, name: &str, positive: &[&str], negative: &[&str]) -> CategoryDefinition {
        CategoryDefinition {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            min_score: 70,
            requires_snapshot: false,
            positive_keywords: positive.iter().map(|s| s.to_string()).collect(),
            negative_keywords: negative.iter().map(|s| s.to_string()).collect(),
            hard_gates: vec![],
        }
    }

    fn trailers() -> CategoryDefinition {
        category(
            "TRAILERS",
            "Trailers",
            &["utility trailer", "dump trailer", "cargo trailer"],
            &["toy", "hitch", "parts"],
        )
    }

    fn generators() -> CategoryDefinition {
        category("GENERATORS", "Generators", &["portable generator", "generator"], &["toy"])
    }

    fn cfg() -> RouterConfig {
        RouterConfig { max_bid: 5_000.0, steal_threshold: 1_000.0, weights: ScoringWeights::default() }
    }

    fn input(title: &str, description: Option<&str>, price: Option<f64>, kind: PriceKind) -> RouterInput {
        RouterInput {
            source: "hibid".into(),
            title: title.into(),
            description: description.map(str::to_string),
            price,
            price_kind: kind,
            price_verified: kind.is_verifiable(),
            lot_status: LotStatus::Active,
            location: None,
            source_categories: vec![],
            source_tags: vec![],
        }
    }

    fn router(cats: Vec<CategoryDefinition>) -> CategoryRouter {
        CategoryRouter::new(cats, cfg())
    }

    #[test]
    fn utility_trailer_becomes_candidate() {
        let v = router(vec![trailers()]).classify(&input(
            "Utility Trailer",
            Some("6x12 flatbed cargo trailer"),
            Some(800.0),
            PriceKind::WinningBid,
        ));
        assert_eq!(v.status, VerdictStatus::Candidate);
        assert_eq!(v.category_id.as_deref(), Some("TRAILERS"));
        assert_eq!(v.score, 90);
        assert_eq!(v.matched_positive, vec!["utility trailer", "cargo trailer"]);
        assert!(v.rejection_reason.is_none());
    }

    #[test]
    fn hitch_adapter_rejected_on_negative_keyword() {
        let v = router(vec![trailers()]).classify(&input(
            "Utility Trailer Hitch Adapter",
            None,
            Some(75.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.status, VerdictStatus::Rejected);
        assert_eq!(v.rejection_reason, Some(RejectionReason::MatchedNegativeKeywords));
        assert!(v.matched_negative.contains(&"hitch".to_string()));
        assert_eq!(v.category_id.as_deref(), Some("TRAILERS"));
    }

    #[test]
    fn price_ceiling_wins_over_keywords() {
        let v = router(vec![trailers()]).classify(&input(
            "Utility Trailer dump trailer cargo trailer",
            None,
            Some(5_000.01),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.rejection_reason, Some(RejectionReason::PriceOverMax));
        assert!(v.matched_positive.is_empty(), "no keyword work after the ceiling");
    }

    #[test]
    fn global_negative_overrides_strong_category_match() {
        let v = router(vec![generators()]).classify(&input(
            "Honda Portable Generator - Salvage title, runs great",
            None,
            Some(800.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.status, VerdictStatus::Rejected);
        assert_eq!(v.rejection_reason, Some(RejectionReason::GlobalNegativeTrigger));
        assert_eq!(v.global_negatives, vec!["salvage title"]);
        assert!(v.category_id.is_none());
    }

    #[test]
    fn global_negative_checks_description_too() {
        let v = router(vec![trailers()]).classify(&input(
            "Utility Trailer",
            Some("Sold for parts only"),
            Some(100.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.rejection_reason, Some(RejectionReason::GlobalNegativeTrigger));
        assert_eq!(v.global_negatives, vec!["for parts", "parts only"]);
    }

    #[test]
    fn empty_category_list_is_not_loaded() {
        let v = router(vec![]).classify(&input("Utility Trailer", None, Some(800.0), PriceKind::CurrentBid));
        assert_eq!(v.rejection_reason, Some(RejectionReason::RouterNotLoaded));
        let v = router(vec![]).classify(&input("", None, None, PriceKind::None));
        assert_eq!(v.rejection_reason, Some(RejectionReason::RouterNotLoaded));
    }

    #[test]
    fn nothing_matching_is_no_category_match() {
        let v = router(vec![trailers(), generators()]).classify(&input(
            "Box of vintage records",
            None,
            Some(20.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.rejection_reason, Some(RejectionReason::NoCategoryMatch));
    }

    #[test]
    fn non_utility_trailer_does_not_match() {
        let v = router(vec![category("TRAILERS", "Trailers", &["utility trailer"], &[])]).classify(&input(
            "Non-utility trailer",
            None,
            Some(100.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.rejection_reason, Some(RejectionReason::NoCategoryMatch));
    }

    #[test]
    fn unpriced_lot_cannot_be_candidate() {
        let v = router(vec![trailers()]).classify(&input(
            "Utility Trailer",
            Some("cargo trailer, dump trailer"),
            None,
            PriceKind::None,
        ));
        assert_eq!(v.status, VerdictStatus::Rejected);
        assert_eq!(v.rejection_reason, Some(RejectionReason::Unpriced));
        assert_eq!(v.score, 70, "keyword score only, no price score");
    }

    #[test]
    fn weak_match_is_below_min_score() {
        let v = router(vec![trailers()]).classify(&input(
            "Utility Trailer",
            None,
            Some(4_000.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.rejection_reason, Some(RejectionReason::BelowMinScore));
        assert_eq!(v.score, 10 + 20 + 15 + 5);
        assert_eq!(v.min_score, 70);
    }

    #[test]
    fn reject_gate_blocks_and_flag_gate_annotates() {
        let mut cat = trailers();
        cat.hard_gates = vec![HardGate {
            field: GateField::Location,
            operator: GateOperator::Contains,
            value: GateValue::Text("alaska".into()),
            action: GateAction::Reject,
        }];
        let mut i = input("Utility Trailer", Some("cargo trailer"), Some(500.0), PriceKind::CurrentBid);
        i.location = Some("Fairbanks, Alaska".into());
        let v = router(vec![cat.clone()]).classify(&i);
        assert_eq!(v.rejection_reason, Some(RejectionReason::HardGateFailed));
        assert_eq!(v.hard_gate_failures, vec!["location contains 'alaska'"]);

        cat.hard_gates[0].action = GateAction::Flag;
        let v = router(vec![cat]).classify(&i);
        assert_eq!(v.status, VerdictStatus::Candidate);
        assert_eq!(v.flags, vec!["location contains 'alaska'"]);
    }

    #[test]
    fn highest_scoring_candidate_wins() {
        let v = router(vec![generators(), trailers()]).classify(&input(
            "Cargo trailer with generator",
            Some("utility trailer"),
            Some(500.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.status, VerdictStatus::Candidate);
        assert_eq!(v.category_id.as_deref(), Some("TRAILERS"));
    }

    #[test]
    fn best_attempt_is_reported_when_nothing_qualifies() {
        let v = router(vec![generators(), trailers()]).classify(&input(
            "Toy utility trailer and toy generator",
            None,
            Some(40.0),
            PriceKind::CurrentBid,
        ));
        assert_eq!(v.status, VerdictStatus::Rejected);
        assert_eq!(v.rejection_reason, Some(RejectionReason::MatchedNegativeKeywords));
        assert!(v.category_id.is_some());
    }

    #[test]
    fn disabled_categories_are_ignored() {
        let mut cat = trailers();
        cat.enabled = false;
        let v = router(vec![cat]).classify(&input("Utility Trailer", None, Some(500.0), PriceKind::CurrentBid));
        assert_eq!(v.rejection_reason, Some(RejectionReason::NoCategoryMatch));
    }
}
