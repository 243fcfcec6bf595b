//! Conflict resolution between prior values and correction candidates.
//!
//! Only fields the auditor flagged are ever touched. For each of them:
//!
//! - no candidate: the prior value is kept, unverified
//! - one candidate: it replaces the prior when its agreement score reaches
//!   `min_agreement`, otherwise the prior is kept as still suspicious
//! - several candidates: structured sources beat search, then the value
//!   closest to the prior wins
//!
//! Accounting identities are checked again afterwards. A flagged field that
//! still breaks one keeps its number but is marked unresolved.

pub mod trail;

pub use trail::{AuditEntry, AuditTrail, EntryBuilder, Stage, TrailReason};

use finaudit_common::Config;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::auditor::{identity_violations_with, ReasonCode, SuspiciousFieldReport};
use crate::crosscheck::{CorrectionCandidate, QueryStatus, SourceOutcome};
use crate::schema::{FieldName, FieldValue, FinancialRecord};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergePolicy {
    /// Minimum agreement for a lone candidate to replace the prior
    pub min_agreement: f64,
    /// Balance-sheet tolerance used when re-checking identities
    pub balance_tolerance: f64,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            min_agreement: 0.5,
            balance_tolerance: 0.01,
        }
    }
}

impl From<&Config> for MergePolicy {
    fn from(config: &Config) -> Self {
        Self {
            min_agreement: config.merge.min_agreement,
            balance_tolerance: config.audit.balance_tolerance,
        }
    }
}

/// Deterministic ranking of candidates for one field; the least element wins.
fn rank(prior: Option<f64>, a: &CorrectionCandidate, b: &CorrectionCandidate) -> Ordering {
    let prior = prior.filter(|p| p.is_finite());
    a.source
        .kind()
        .cmp(&b.source.kind())
        .then_with(|| match prior {
            Some(p) => (a.proposed_value - p)
                .abs()
                .total_cmp(&(b.proposed_value - p).abs()),
            None => Ordering::Equal,
        })
        .then_with(|| a.priority.cmp(&b.priority))
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.proposed_value.total_cmp(&b.proposed_value))
}

/// Winning candidate among several for the same field.
pub fn select_winner<'a>(
    prior: Option<f64>,
    candidates: &[&'a CorrectionCandidate],
) -> Option<&'a CorrectionCandidate> {
    candidates
        .iter()
        .copied()
        .min_by(|a, b| rank(prior, a, b))
}

#[derive(Debug, Clone, Default)]
pub struct Merger {
    policy: MergePolicy,
}

impl Merger {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// Log failed or discarded source queries.
    pub fn record_outcomes(&self, outcomes: &[SourceOutcome], trail: &mut AuditTrail) {
        for outcome in outcomes {
            let (reason, detail) = match &outcome.status {
                QueryStatus::Unavailable(e) => (TrailReason::SourceUnavailable, e.to_string()),
                QueryStatus::Discarded(raw) => (
                    TrailReason::DiscardedAnswer,
                    format!("discarded non-numeric answer {}", raw),
                ),
                QueryStatus::Answered | QueryStatus::NoData => continue,
            };
            trail.record(
                EntryBuilder::new(Stage::CrossCheck, reason)
                    .field(outcome.field)
                    .source(outcome.source.clone())
                    .detail(detail),
            );
        }
    }

    /// Apply candidates to the flagged fields of `record`.
    pub fn merge(
        &self,
        mut record: FinancialRecord,
        reports: &[SuspiciousFieldReport],
        candidates: &[CorrectionCandidate],
        trail: &mut AuditTrail,
    ) -> FinancialRecord {
        let flagged: BTreeMap<FieldName, ReasonCode> = reports.iter().fold(BTreeMap::new(), |mut acc, r| {
            acc.entry(r.field)
                .and_modify(|reason: &mut ReasonCode| *reason = (*reason).min(r.reason))
                .or_insert(r.reason);
            acc
        });

        let mut by_field: BTreeMap<FieldName, Vec<&CorrectionCandidate>> = BTreeMap::new();
        for candidate in candidates {
            by_field.entry(candidate.field).or_default().push(candidate);
        }

        let mut corrected = 0usize;
        for (&field, &reason) in &flagged {
            let prior = record.get(field).clone();
            let field_candidates = by_field.get(&field).map(Vec::as_slice).unwrap_or_default();

            match field_candidates {
                [] => {
                    record.replace(field, prior.unverified());
                    debug!(field = %field, reason = %reason, "No correction candidate");
                    trail.record(
                        EntryBuilder::new(Stage::Merge, TrailReason::NoCorrection)
                            .field(field)
                            .values(prior.value(), prior.value())
                            .detail(format!("{}; no independent source returned a value", reason)),
                    );
                }
                [only] if only.agreement_score < self.policy.min_agreement => {
                    record.replace(field, prior.unverified());
                    debug!(
                        field = %field,
                        proposed = only.proposed_value,
                        score = only.agreement_score,
                        "Lone candidate below agreement threshold"
                    );
                    trail.record(
                        EntryBuilder::new(Stage::Merge, TrailReason::StillSuspicious)
                            .field(field)
                            .values(prior.value(), prior.value())
                            .source(only.source.clone())
                            .detail(format!(
                                "{}; {} proposed {} with agreement {:.2} below {:.2}",
                                reason,
                                only.source,
                                only.proposed_value,
                                only.agreement_score,
                                self.policy.min_agreement
                            )),
                    );
                }
                _ => {
                    let Some(winner) = select_winner(prior.value(), field_candidates) else {
                        continue;
                    };
                    let value = FieldValue::verified(
                        winner.proposed_value,
                        winner.source.clone(),
                        winner.agreement_score,
                    );
                    record.replace(field, value);
                    corrected += 1;

                    let mut detail = format!(
                        "{}; {} of {} candidate(s), agreement {:.2}",
                        reason,
                        winner.source,
                        field_candidates.len(),
                        winner.agreement_score
                    );
                    if let Some(ref justification) = winner.justification {
                        detail.push_str("; ");
                        detail.push_str(justification);
                    }
                    info!(
                        field = %field,
                        old = ?prior.value(),
                        new = winner.proposed_value,
                        source = %winner.source,
                        "Field corrected"
                    );
                    trail.record(
                        EntryBuilder::new(Stage::Merge, TrailReason::Corrected)
                            .field(field)
                            .values(prior.value(), Some(winner.proposed_value))
                            .source(winner.source.clone())
                            .detail(detail),
                    );
                }
            }
        }

        // Re-check identities on the merged record
        let mut violated: BTreeMap<FieldName, ReasonCode> = BTreeMap::new();
        for (field, reason) in identity_violations_with(&record, self.policy.balance_tolerance) {
            if flagged.contains_key(&field) {
                violated
                    .entry(field)
                    .and_modify(|r| *r = (*r).min(reason))
                    .or_insert(reason);
            }
        }

        for (field, reason) in violated {
            let current = record.get(field).clone();
            warn!(field = %field, reason = %reason, value = ?current.value(), "Identity still violated after merge");
            record.replace(field, current.marked_unresolved());
            trail.record(
                EntryBuilder::new(Stage::Merge, TrailReason::ReconciliationViolation)
                    .field(field)
                    .values(current.value(), current.value())
                    .source(current.source().clone())
                    .detail(format!("{} still violated after merge; value retained as unresolved", reason)),
            );
        }

        info!(flagged = flagged.len(), corrected, "Merge complete");
        record
    }
}
