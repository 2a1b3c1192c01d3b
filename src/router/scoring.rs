use crate::config::ScoringWeights;

/// Keyword component: base plus capped positive credit minus capped negative
/// penalty, floored at zero.
pub fn keyword_score(positive: usize, negative: usize, w: &ScoringWeights) -> i64 {
    let pos = (w.positive_per_match * positive as i64).min(w.positive_cap);
    let neg = (w.negative_per_match * negative as i64).min(w.negative_cap);
    (w.base + pos - neg).max(0)
}

/// Price component. Cheaper is better; above the last tier a lot is worth
/// nothing on price alone. Verified prices earn a small bonus over unverified
/// ones in the same tier.
pub fn price_score(amount: f64, verified: bool, steal_threshold: f64, w: &ScoringWeights) -> i64 {
    let tier = if amount <= steal_threshold {
        w.steal_points
    } else {
        w.price_tiers
            .iter()
            .find(|(ceiling, _)| amount <= *ceiling)
            .map(|(_, points)| *points)
            .unwrap_or(0)
    };
    if tier > 0 && verified {
        tier + w.verified_bonus
    } else {
        tier
    }
}
