//! Field schema and provenance-tagged values.
//!
//! The schema is a closed set of field names. Declaration order of
//! [`FieldName`] is the canonical schema order: every ordered output
//! (audit reports, serialized records, trail entries) follows it.

mod record;

pub use record::{FinancialRecord, RecordShapeError};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Field Names
// ============================================================================

/// A field of the financial record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    // Balance sheet
    TotalAssets,
    CurrentAssets,
    Inventory,
    IntangibleAssets,
    CurrentLiabilities,
    LongTermDebt,
    CapitalLeaseObligations,
    TotalLiabilities,
    // Capital
    TotalEquity,
    PreferredStock,
    CommonStock,
    Surplus,
    // Income statement
    Sales,
    OperatingIncome,
    NetIncome,
    InterestCharges,
    PreferredDividends,
    #[serde(rename = "eps_3y_avg")]
    Eps3yAvg,
    // Market
    SharesOutstanding,
    CurrentMarketPrice,
}

impl FieldName {
    /// Number of fields in the schema.
    pub const COUNT: usize = 20;

    /// Every field, in schema order.
    pub const ALL: [FieldName; Self::COUNT] = [
        Self::TotalAssets,
        Self::CurrentAssets,
        Self::Inventory,
        Self::IntangibleAssets,
        Self::CurrentLiabilities,
        Self::LongTermDebt,
        Self::CapitalLeaseObligations,
        Self::TotalLiabilities,
        Self::TotalEquity,
        Self::PreferredStock,
        Self::CommonStock,
        Self::Surplus,
        Self::Sales,
        Self::OperatingIncome,
        Self::NetIncome,
        Self::InterestCharges,
        Self::PreferredDividends,
        Self::Eps3yAvg,
        Self::SharesOutstanding,
        Self::CurrentMarketPrice,
    ];

    /// Components that make up total liabilities.
    pub const LIABILITY_COMPONENTS: [FieldName; 3] = [
        Self::CurrentLiabilities,
        Self::LongTermDebt,
        Self::CapitalLeaseObligations,
    ];

    /// Position in schema order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Wire name (snake_case).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TotalAssets => "total_assets",
            Self::CurrentAssets => "current_assets",
            Self::Inventory => "inventory",
            Self::IntangibleAssets => "intangible_assets",
            Self::CurrentLiabilities => "current_liabilities",
            Self::LongTermDebt => "long_term_debt",
            Self::CapitalLeaseObligations => "capital_lease_obligations",
            Self::TotalLiabilities => "total_liabilities",
            Self::TotalEquity => "total_equity",
            Self::PreferredStock => "preferred_stock",
            Self::CommonStock => "common_stock",
            Self::Surplus => "surplus",
            Self::Sales => "sales",
            Self::OperatingIncome => "operating_income",
            Self::NetIncome => "net_income",
            Self::InterestCharges => "interest_charges",
            Self::PreferredDividends => "preferred_dividends",
            Self::Eps3yAvg => "eps_3y_avg",
            Self::SharesOutstanding => "shares_outstanding",
            Self::CurrentMarketPrice => "current_market_price",
        }
    }

    /// Parse a wire name. Case-insensitive; spaces and dashes are treated as underscores.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL.iter().copied().find(|f| f.as_str() == normalized)
    }

    /// Whether a zero or missing value is structurally implausible.
    pub fn expects_non_zero(self) -> bool {
        matches!(
            self,
            Self::TotalAssets
                | Self::CurrentAssets
                | Self::TotalLiabilities
                | Self::Sales
                | Self::SharesOutstanding
                | Self::CurrentMarketPrice
        )
    }

    /// Whether this field is an itemized part of total liabilities.
    pub fn is_liability_component(self) -> bool {
        Self::LIABILITY_COMPONENTS.contains(&self)
    }

    /// Fields stored as absolute values regardless of the sign a source reports.
    pub fn is_magnitude(self) -> bool {
        matches!(
            self,
            Self::IntangibleAssets
                | Self::LongTermDebt
                | Self::CapitalLeaseObligations
                | Self::InterestCharges
                | Self::SharesOutstanding
                | Self::CurrentMarketPrice
        )
    }

    /// Short human description, used in prompts.
    pub fn description(self) -> &'static str {
        match self {
            Self::TotalAssets => "total assets (most recent quarter)",
            Self::CurrentAssets => "total current assets",
            Self::Inventory => "inventory",
            Self::IntangibleAssets => "goodwill and other intangible assets",
            Self::CurrentLiabilities => "total current liabilities",
            Self::LongTermDebt => "long-term financial debt only (bonds, notes, bank loans; excludes leases and trade payables)",
            Self::CapitalLeaseObligations => "operating and finance lease liabilities",
            Self::TotalLiabilities => "total liabilities",
            Self::TotalEquity => "total stockholders' equity",
            Self::PreferredStock => "preferred stock",
            Self::CommonStock => "common stock",
            Self::Surplus => "retained earnings and capital surplus",
            Self::Sales => "total revenue (trailing twelve months)",
            Self::OperatingIncome => "operating income (trailing twelve months)",
            Self::NetIncome => "net income (trailing twelve months)",
            Self::InterestCharges => "interest expense, absolute value",
            Self::PreferredDividends => "preferred dividends paid",
            Self::Eps3yAvg => "average earnings per share over the last three years",
            Self::SharesOutstanding => "shares outstanding",
            Self::CurrentMarketPrice => "current share price",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Provenance
// ============================================================================

/// Category of a value's origin. Declaration order is merge priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Structured fundamentals provider
    Structured,
    /// Free-text search capability
    Search,
    /// The text-understanding extraction step
    Extraction,
    /// Carried over from an existing partial record
    Partial,
}

/// Origin of a field value, e.g. `ai-extraction` or `structured:snapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Provenance of values produced by the extractor.
    pub const EXTRACTION: &'static str = "ai-extraction";

    pub fn extraction() -> Self {
        Self(Self::EXTRACTION.to_string())
    }

    pub fn structured(provider: &str) -> Self {
        Self(format!("structured:{}", provider))
    }

    pub fn search(name: &str) -> Self {
        Self(format!("search:{}", name))
    }

    pub fn partial(origin: &str) -> Self {
        Self(format!("partial:{}", origin))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Origin category. Unknown prefixes count as partial data.
    pub fn kind(&self) -> SourceKind {
        if self.0 == Self::EXTRACTION {
            SourceKind::Extraction
        } else if self.0.starts_with("structured:") {
            SourceKind::Structured
        } else if self.0.starts_with("search:") {
            SourceKind::Search
        } else {
            SourceKind::Partial
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Field Value
// ============================================================================

/// A value with its provenance. Immutable: corrections build a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    value: Option<f64>,
    source: SourceId,
    confidence: f64,
    verified: bool,
    #[serde(default)]
    unresolved: bool,
}

impl FieldValue {
    /// An unverified value. Non-finite numbers become null; confidence is clamped to [0, 1].
    pub fn new(value: Option<f64>, source: SourceId, confidence: f64) -> Self {
        Self {
            value: value.filter(|v| v.is_finite()),
            source,
            confidence: clamp_unit(confidence),
            verified: false,
            unresolved: false,
        }
    }

    /// A value confirmed by an independent source.
    pub fn verified(value: f64, source: SourceId, confidence: f64) -> Self {
        Self {
            verified: true,
            ..Self::new(Some(value), source, confidence)
        }
    }

    /// An explicit null the pipeline could not resolve.
    pub fn unresolved(source: SourceId) -> Self {
        Self {
            value: None,
            source,
            confidence: 0.0,
            verified: false,
            unresolved: true,
        }
    }

    /// Copy of this value marked unresolved. The number, if any, is retained.
    pub fn marked_unresolved(&self) -> Self {
        Self {
            verified: false,
            unresolved: true,
            ..self.clone()
        }
    }

    /// Copy of this value with the verified flag cleared.
    pub fn unverified(&self) -> Self {
        Self {
            verified: false,
            ..self.clone()
        }
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_unresolved(&self) -> bool {
        self.unresolved
    }

    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
