//! Zero-trust audit of a candidate record.
//!
//! The auditor never trusts extracted numbers. It checks presence, the
//! accounting identities that must hold between balance-sheet lines, a few
//! debt sanity rules, and reported confidence. Output is pure and
//! deterministic: the same record always yields the same reports in schema
//! order.

use finaudit_common::{AuditConfig, AuditMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::schema::{FieldName, FieldValue, FinancialRecord};

// ============================================================================
// Reason Codes
// ============================================================================

/// Why a field was flagged. Declaration order is precedence: when a field
/// trips several checks, the report carries the first one listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MissingRequired,
    LiabilitiesBelowComponents,
    CurrentAssetsBelowInventory,
    CurrentAssetsExceedTotalAssets,
    BalanceSheetMismatch,
    InterestMissingForDebt,
    DebtExceedsHalfOfAssets,
    Unresolved,
    LowConfidence,
    FullAudit,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingRequired => "missing_required",
            Self::LiabilitiesBelowComponents => "liabilities_below_components",
            Self::CurrentAssetsBelowInventory => "current_assets_below_inventory",
            Self::CurrentAssetsExceedTotalAssets => "current_assets_exceed_total_assets",
            Self::BalanceSheetMismatch => "balance_sheet_mismatch",
            Self::InterestMissingForDebt => "interest_missing_for_debt",
            Self::DebtExceedsHalfOfAssets => "debt_exceeds_half_of_assets",
            Self::Unresolved => "unresolved",
            Self::LowConfidence => "low_confidence",
            Self::FullAudit => "full_audit",
        }
    }

    /// Whether the reason is a broken accounting identity.
    pub fn is_identity(self) -> bool {
        matches!(
            self,
            Self::LiabilitiesBelowComponents
                | Self::CurrentAssetsBelowInventory
                | Self::CurrentAssetsExceedTotalAssets
                | Self::BalanceSheetMismatch
        )
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A flagged field with the value the auditor saw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuspiciousFieldReport {
    pub field: FieldName,
    pub reason: ReasonCode,
    pub prior_value: FieldValue,
}

// ============================================================================
// Policy
// ============================================================================

/// Fields re-checked unconditionally in [`AuditMode::Full`].
pub const FULL_AUDIT_FIELDS: [FieldName; 14] = [
    FieldName::LongTermDebt,
    FieldName::NetIncome,
    FieldName::SharesOutstanding,
    FieldName::Sales,
    FieldName::OperatingIncome,
    FieldName::TotalAssets,
    FieldName::CurrentAssets,
    FieldName::TotalLiabilities,
    FieldName::Inventory,
    FieldName::IntangibleAssets,
    FieldName::CurrentMarketPrice,
    FieldName::PreferredDividends,
    FieldName::Eps3yAvg,
    FieldName::InterestCharges,
];

/// Thresholds used by the auditor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditPolicy {
    /// Confidence below this is flagged
    pub confidence_threshold: f64,
    /// Allowed balance-sheet gap, as a fraction of total assets
    pub balance_tolerance: f64,
    /// Long-term debt above this fraction of total assets is flagged
    pub debt_to_assets_limit: f64,
    pub mode: AuditMode,
}

impl Default for AuditPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            balance_tolerance: 0.01,
            debt_to_assets_limit: 0.5,
            mode: AuditMode::Standard,
        }
    }
}

impl From<&AuditConfig> for AuditPolicy {
    fn from(config: &AuditConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            balance_tolerance: config.balance_tolerance,
            debt_to_assets_limit: config.debt_to_assets_limit,
            mode: config.mode,
        }
    }
}

// ============================================================================
// Auditor
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Auditor {
    policy: AuditPolicy,
}

impl Auditor {
    pub fn new(policy: AuditPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AuditPolicy {
        &self.policy
    }

    /// Flag suspicious fields. One report per field, in schema order.
    pub fn audit(&self, record: &FinancialRecord) -> Vec<SuspiciousFieldReport> {
        let mut reasons: BTreeMap<FieldName, ReasonCode> = BTreeMap::new();
        let mut flag = |field: FieldName, reason: ReasonCode| {
            reasons
                .entry(field)
                .and_modify(|r| *r = (*r).min(reason))
                .or_insert(reason);
        };

        for (field, value) in record.iter() {
            if field.expects_non_zero() && value.value().map_or(true, |v| v == 0.0) {
                flag(field, ReasonCode::MissingRequired);
            }
        }

        for (field, reason) in identity_violations_with(record, self.policy.balance_tolerance) {
            flag(field, reason);
        }

        let debt = record.value(FieldName::LongTermDebt);
        if debt.is_some_and(|d| d > 0.0) && record.value(FieldName::InterestCharges) == Some(0.0) {
            flag(FieldName::InterestCharges, ReasonCode::InterestMissingForDebt);
        }
        if let (Some(d), Some(assets)) = (debt, record.value(FieldName::TotalAssets)) {
            if assets > 0.0 && d > self.policy.debt_to_assets_limit * assets {
                flag(FieldName::LongTermDebt, ReasonCode::DebtExceedsHalfOfAssets);
            }
        }

        for (field, value) in record.iter() {
            if value.is_unresolved() {
                flag(field, ReasonCode::Unresolved);
            } else if value.confidence() < self.policy.confidence_threshold {
                flag(field, ReasonCode::LowConfidence);
            }
        }

        if self.policy.mode == AuditMode::Full {
            for field in FULL_AUDIT_FIELDS {
                flag(field, ReasonCode::FullAudit);
            }
        }

        reasons
            .into_iter()
            .map(|(field, reason)| SuspiciousFieldReport {
                field,
                reason,
                prior_value: record.get(field).clone(),
            })
            .collect()
    }
}

// ============================================================================
// Accounting Identities
// ============================================================================

/// Broken identities with the default balance tolerance.
pub fn identity_violations(record: &FinancialRecord) -> Vec<(FieldName, ReasonCode)> {
    identity_violations_with(record, AuditPolicy::default().balance_tolerance)
}

/// Broken identities as `(field, reason)` pairs. A field may appear more than
/// once; identities whose inputs are unknown are skipped.
pub fn identity_violations_with(
    record: &FinancialRecord,
    balance_tolerance: f64,
) -> Vec<(FieldName, ReasonCode)> {
    let mut out = Vec::new();

    let total_assets = record.value(FieldName::TotalAssets);
    let current_assets = record.value(FieldName::CurrentAssets);
    let total_liabilities = record.value(FieldName::TotalLiabilities);

    if let (Some(tl), Some(sum)) = (total_liabilities, record.liability_components_sum()) {
        if tl < sum {
            out.push((FieldName::TotalLiabilities, ReasonCode::LiabilitiesBelowComponents));
        }
    }

    if let (Some(ca), Some(inv)) = (current_assets, record.value(FieldName::Inventory)) {
        if ca < inv {
            out.push((FieldName::CurrentAssets, ReasonCode::CurrentAssetsBelowInventory));
        }
    }

    if let (Some(ca), Some(ta)) = (current_assets, total_assets) {
        if ca > ta {
            out.push((FieldName::CurrentAssets, ReasonCode::CurrentAssetsExceedTotalAssets));
        }
    }

    if let (Some(ta), Some(tl), Some(eq)) = (total_assets, total_liabilities, record.equity()) {
        if (tl + eq - ta).abs() > balance_tolerance * ta.abs() {
            out.push((FieldName::TotalAssets, ReasonCode::BalanceSheetMismatch));
            out.push((FieldName::TotalLiabilities, ReasonCode::BalanceSheetMismatch));
            if !record.get(FieldName::TotalEquity).is_null() {
                out.push((FieldName::TotalEquity, ReasonCode::BalanceSheetMismatch));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SourceId;

    fn value(v: f64) -> FieldValue {
        FieldValue::new(Some(v), SourceId::extraction(), 0.9)
    }

    /// A consistent record that passes every check.
    fn healthy() -> FinancialRecord {
        let mut record = FinancialRecord::unresolved(SourceId::extraction());
        for (field, v) in [
            (FieldName::TotalAssets, 1000.0),
            (FieldName::CurrentAssets, 400.0),
            (FieldName::Inventory, 100.0),
            (FieldName::IntangibleAssets, 50.0),
            (FieldName::CurrentLiabilities, 200.0),
            (FieldName::LongTermDebt, 300.0),
            (FieldName::CapitalLeaseObligations, 20.0),
            (FieldName::TotalLiabilities, 600.0),
            (FieldName::TotalEquity, 400.0),
            (FieldName::PreferredStock, 0.0),
            (FieldName::CommonStock, 100.0),
            (FieldName::Surplus, 300.0),
            (FieldName::Sales, 2000.0),
            (FieldName::OperatingIncome, 250.0),
            (FieldName::NetIncome, 150.0),
            (FieldName::InterestCharges, 15.0),
            (FieldName::PreferredDividends, 0.0),
            (FieldName::Eps3yAvg, 1.5),
            (FieldName::SharesOutstanding, 100.0),
            (FieldName::CurrentMarketPrice, 30.0),
        ] {
            record = record.with(field, value(v));
        }
        record
    }

    fn reasons(reports: &[SuspiciousFieldReport]) -> Vec<(FieldName, ReasonCode)> {
        reports.iter().map(|r| (r.field, r.reason)).collect()
    }

    #[test]
    fn test_healthy_record_is_clean() {
        assert!(Auditor::default().audit(&healthy()).is_empty());
    }

    #[test]
    fn test_missing_and_zero_required() {
        let record = healthy()
            .with(FieldName::Sales, value(0.0))
            .with(FieldName::SharesOutstanding, FieldValue::new(None, SourceId::extraction(), 0.9));
        let reports = Auditor::default().audit(&record);
        assert_eq!(
            reasons(&reports),
            vec![
                (FieldName::Sales, ReasonCode::MissingRequired),
                (FieldName::SharesOutstanding, ReasonCode::MissingRequired),
            ]
        );
    }

    #[test]
    fn test_current_assets_below_inventory() {
        let record = healthy().with(FieldName::CurrentAssets, value(50.0));
        let reports = Auditor::default().audit(&record);
        assert_eq!(
            reasons(&reports),
            vec![(FieldName::CurrentAssets, ReasonCode::CurrentAssetsBelowInventory)]
        );
        assert_eq!(reports[0].prior_value.value(), Some(50.0));
    }

    #[test]
    fn test_current_assets_exceed_total() {
        let record = healthy().with(FieldName::CurrentAssets, value(1200.0));
        let reports = Auditor::default().audit(&record);
        assert_eq!(
            reasons(&reports),
            vec![(FieldName::CurrentAssets, ReasonCode::CurrentAssetsExceedTotalAssets)]
        );
    }

    #[test]
    fn test_liabilities_below_components_wins_over_mismatch() {
        // 500 < 200 + 300 + 20 and 500 + 400 != 1000
        let record = healthy().with(FieldName::TotalLiabilities, value(500.0));
        let reports = Auditor::default().audit(&record);
        assert_eq!(
            reasons(&reports),
            vec![
                (FieldName::TotalAssets, ReasonCode::BalanceSheetMismatch),
                (FieldName::TotalLiabilities, ReasonCode::LiabilitiesBelowComponents),
                (FieldName::TotalEquity, ReasonCode::BalanceSheetMismatch),
            ]
        );
    }

    #[test]
    fn test_balance_within_tolerance() {
        // gap of 9 on 1000 assets is under 1%
        let record = healthy().with(FieldName::TotalEquity, value(409.0));
        assert!(Auditor::default().audit(&record).is_empty());

        let record = healthy().with(FieldName::TotalEquity, value(420.0));
        assert_eq!(Auditor::default().audit(&record).len(), 3);
    }

    #[test]
    fn test_balance_uses_capital_lines_without_total_equity() {
        let record = healthy()
            .with(FieldName::TotalEquity, FieldValue::new(None, SourceId::extraction(), 0.9))
            .with(FieldName::Surplus, value(100.0));
        let reports = Auditor::default().audit(&record);
        assert_eq!(
            reasons(&reports),
            vec![
                (FieldName::TotalAssets, ReasonCode::BalanceSheetMismatch),
                (FieldName::TotalLiabilities, ReasonCode::BalanceSheetMismatch),
            ]
        );
    }

    #[test]
    fn test_debt_rules() {
        let record = healthy().with(FieldName::InterestCharges, value(0.0));
        assert_eq!(
            reasons(&Auditor::default().audit(&record)),
            vec![(FieldName::InterestCharges, ReasonCode::InterestMissingForDebt)]
        );

        let record = healthy()
            .with(FieldName::LongTermDebt, value(600.0))
            .with(FieldName::TotalLiabilities, value(820.0))
            .with(FieldName::TotalEquity, value(180.0))
            .with(FieldName::Surplus, value(80.0));
        assert_eq!(
            reasons(&Auditor::default().audit(&record)),
            vec![(FieldName::LongTermDebt, ReasonCode::DebtExceedsHalfOfAssets)]
        );
    }

    #[test]
    fn test_unresolved_and_low_confidence() {
        let record = healthy()
            .with(FieldName::Eps3yAvg, FieldValue::unresolved(SourceId::extraction()))
            .with(
                FieldName::NetIncome,
                FieldValue::new(Some(150.0), SourceId::extraction(), 0.3),
            );
        assert_eq!(
            reasons(&Auditor::default().audit(&record)),
            vec![
                (FieldName::NetIncome, ReasonCode::LowConfidence),
                (FieldName::Eps3yAvg, ReasonCode::Unresolved),
            ]
        );
    }

    #[test]
    fn test_missing_required_beats_unresolved() {
        let record = healthy().with(FieldName::Sales, FieldValue::unresolved(SourceId::extraction()));
        let reports = Auditor::default().audit(&record);
        assert_eq!(reasons(&reports), vec![(FieldName::Sales, ReasonCode::MissingRequired)]);
    }

    #[test]
    fn test_full_mode_flags_core_fields() {
        let auditor = Auditor::new(AuditPolicy {
            mode: AuditMode::Full,
            ..AuditPolicy::default()
        });
        let reports = auditor.audit(&healthy());
        assert_eq!(reports.len(), FULL_AUDIT_FIELDS.len());
        assert!(reports.iter().all(|r| r.reason == ReasonCode::FullAudit));
        let fields: Vec<FieldName> = reports.iter().map(|r| r.field).collect();
        let mut sorted = fields.clone();
        sorted.sort();
        assert_eq!(fields, sorted);
    }

    #[test]
    fn test_identity_violations_exposed() {
        let record = healthy().with(FieldName::CurrentAssets, value(50.0));
        assert_eq!(
            identity_violations(&record),
            vec![(FieldName::CurrentAssets, ReasonCode::CurrentAssetsBelowInventory)]
        );
        assert!(identity_violations(&healthy()).is_empty());
    }

    #[test]
    fn test_policy_from_config() {
        let config = AuditConfig {
            mode: AuditMode::Full,
            confidence_threshold: 0.8,
            ..AuditConfig::default()
        };
        let policy = AuditPolicy::from(&config);
        assert_eq!(policy.mode, AuditMode::Full);
        assert_eq!(policy.confidence_threshold, 0.8);
        assert_eq!(policy.debt_to_assets_limit, 0.5);
    }

    #[test]
    fn test_reason_precedence_and_identity() {
        assert!(ReasonCode::MissingRequired < ReasonCode::LiabilitiesBelowComponents);
        assert!(ReasonCode::BalanceSheetMismatch < ReasonCode::LowConfidence);
        assert!(ReasonCode::CurrentAssetsBelowInventory.is_identity());
        assert!(!ReasonCode::LowConfidence.is_identity());
        assert_eq!(ReasonCode::FullAudit.to_string(), "full_audit");
    }
}
