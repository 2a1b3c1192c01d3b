use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Lot
// ---------------------------------------------------------------------------

/// Canonical shape of one listing, whatever source it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedLot {
    /// Adapter key.
    pub source: String,
    /// Stable external id. Together with `source` it is globally unique.
    pub source_lot_id: String,
    pub source_url: String,
    pub title: String,
    pub description: Option<String>,
    pub auction_end_at: Option<DateTime<Utc>>,
    pub lot_status: LotStatus,
    pub location_text: Option<String>,
    pub price: Price,
    /// Primary image, best resolution available.
    pub image_url: Option<String>,
    pub photo_urls: Vec<String>,
    pub source_categories: Vec<String>,
    pub source_tags: Vec<String>,
    /// Untouched source payload, archived on first candidacy.
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LotStatus {
    Active,
    Closing,
    Closed,
    Unknown,
}

impl LotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LotStatus::Active => "active",
            LotStatus::Closing => "closing",
            LotStatus::Closed => "closed",
            LotStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub kind: PriceKind,
    /// True only for observed bids and binding prices.
    pub verified: bool,
    pub currency: String,
    /// Which raw field the amount came from.
    pub source_field: String,
}

impl Price {
    pub fn none() -> Self {
        Self {
            amount: 0.0,
            kind: PriceKind::None,
            verified: false,
            currency: "USD".to_string(),
            source_field: String::new(),
        }
    }

    pub fn is_priced(&self) -> bool {
        self.kind != PriceKind::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    None,
    Estimate,
    StartingBid,
    CurrentBid,
    WinningBid,
    BuyNow,
    Sold,
}

impl PriceKind {
    /// Kinds that may carry `verified = true`.
    pub fn is_verifiable(&self) -> bool {
        !matches!(self, PriceKind::None | PriceKind::Estimate | PriceKind::StartingBid)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceKind::None => "none",
            PriceKind::Estimate => "estimate",
            PriceKind::StartingBid => "starting_bid",
            PriceKind::CurrentBid => "current_bid",
            PriceKind::WinningBid => "winning_bid",
            PriceKind::BuyNow => "buy_now",
            PriceKind::Sold => "sold",
        }
    }
}

impl std::fmt::Display for PriceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    Candidate,
    Rejected,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Candidate => "candidate",
            VerdictStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a lot was rejected. Reporting relies on this set being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    PriceOverMax,
    NoCategoryMatch,
    MatchedNegativeKeywords,
    BelowMinScore,
    RouterNotLoaded,
    GlobalNegativeTrigger,
    HardGateFailed,
    Unpriced,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::PriceOverMax => "price_over_max",
            RejectionReason::NoCategoryMatch => "no_category_match",
            RejectionReason::MatchedNegativeKeywords => "matched_negative_keywords",
            RejectionReason::BelowMinScore => "below_min_score",
            RejectionReason::RouterNotLoaded => "router_not_loaded",
            RejectionReason::GlobalNegativeTrigger => "global_negative_trigger",
            RejectionReason::HardGateFailed => "hard_gate_failed",
            RejectionReason::Unpriced => "unpriced",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output. Recomputed on every evaluation, never the stored truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
    pub score: i64,
    pub min_score: i64,
    pub matched_positive: Vec<String>,
    pub matched_negative: Vec<String>,
    /// Descriptions of `reject` gates that fired.
    pub hard_gate_failures: Vec<String>,
    /// Descriptions of `flag` gates that fired; these never block candidacy.
    pub flags: Vec<String>,
    /// Global negative phrases that fired.
    pub global_negatives: Vec<String>,
    pub rejection_reason: Option<RejectionReason>,
}

impl Verdict {
    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            status: VerdictStatus::Rejected,
            category_id: None,
            category_name: None,
            score: 0,
            min_score: 0,
            matched_positive: Vec::new(),
            matched_negative: Vec::new(),
            hard_gate_failures: Vec::new(),
            flags: Vec::new(),
            global_negatives: Vec::new(),
            rejection_reason: Some(reason),
        }
    }

    pub fn is_candidate(&self) -> bool {
        self.status == VerdictStatus::Candidate
    }
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// One classification rule set, loaded fresh each run.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryDefinition {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    /// 0-100.
    pub min_score: i64,
    /// Candidates in this category get their raw payload archived once.
    pub requires_snapshot: bool,
    pub positive_keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub hard_gates: Vec<HardGate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HardGate {
    pub field: GateField,
    pub operator: GateOperator,
    pub value: GateValue,
    pub action: GateAction,
}

impl std::fmt::Display for HardGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.field.as_str(), self.operator.as_str(), self.value)
    }
}

/// Fields a hard gate may inspect. Anything else is a config error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateField {
    Source,
    Title,
    Description,
    Price,
    PriceKind,
    PriceVerified,
    LotStatus,
    Location,
    SourceCategories,
    SourceTags,
}

impl GateField {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "source" => GateField::Source,
            "title" => GateField::Title,
            "description" => GateField::Description,
            "price" => GateField::Price,
            "price_kind" | "priceKind" => GateField::PriceKind,
            "price_verified" | "priceVerified" => GateField::PriceVerified,
            "lot_status" | "lotStatus" => GateField::LotStatus,
            "location" | "location_text" | "locationText" => GateField::Location,
            "source_categories" | "sourceCategories" => GateField::SourceCategories,
            "source_tags" | "sourceTags" => GateField::SourceTags,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateField::Source => "source",
            GateField::Title => "title",
            GateField::Description => "description",
            GateField::Price => "price",
            GateField::PriceKind => "price_kind",
            GateField::PriceVerified => "price_verified",
            GateField::LotStatus => "lot_status",
            GateField::Location => "location",
            GateField::SourceCategories => "source_categories",
            GateField::SourceTags => "source_tags",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateOperator {
    Equals,
    In,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
}

impl GateOperator {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "equals" | "eq" => GateOperator::Equals,
            "in" => GateOperator::In,
            "gt" => GateOperator::Gt,
            "lt" => GateOperator::Lt,
            "gte" => GateOperator::Gte,
            "lte" => GateOperator::Lte,
            "contains" => GateOperator::Contains,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateOperator::Equals => "equals",
            GateOperator::In => "in",
            GateOperator::Gt => "gt",
            GateOperator::Lt => "lt",
            GateOperator::Gte => "gte",
            GateOperator::Lte => "lte",
            GateOperator::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GateValue {
    Text(String),
    Number(f64),
    Bool(bool),
    List(Vec<String>),
}

impl std::fmt::Display for GateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateValue::Text(s) => write!(f, "'{s}'"),
            GateValue::Number(n) => write!(f, "{n}"),
            GateValue::Bool(b) => write!(f, "{b}"),
            GateValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateAction {
    Reject,
    Flag,
}
