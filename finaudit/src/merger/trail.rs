//! Tamper-evident audit trail of a pipeline run.
//!
//! Each entry carries the SHA-256 of its own content plus the hash of the
//! entry before it, so editing or dropping any entry after the fact breaks
//! [`AuditTrail::verify_chain`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::schema::{FieldName, SourceId};

/// Pipeline stage that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    CrossCheck,
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extraction => write!(f, "extraction"),
            Self::CrossCheck => write!(f, "cross_check"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// What an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailReason {
    SchemaViolation,
    DebtLineFallback,
    SignNormalised,
    ReconciliationViolation,
    Corrected,
    StillSuspicious,
    NoCorrection,
    SourceUnavailable,
    /// The source answered, but not with a usable number
    DiscardedAnswer,
}

impl fmt::Display for TrailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SchemaViolation => write!(f, "schema_violation"),
            Self::DebtLineFallback => write!(f, "debt_line_fallback"),
            Self::SignNormalised => write!(f, "sign_normalised"),
            Self::ReconciliationViolation => write!(f, "reconciliation_violation"),
            Self::Corrected => write!(f, "corrected"),
            Self::StillSuspicious => write!(f, "still_suspicious"),
            Self::NoCorrection => write!(f, "no_correction"),
            Self::SourceUnavailable => write!(f, "source_unavailable"),
            Self::DiscardedAnswer => write!(f, "discarded_answer"),
        }
    }
}

/// A single trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail, from 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub field: Option<FieldName>,
    pub old_value: Option<f64>,
    pub new_value: Option<f64>,
    pub reason: TrailReason,
    pub source: Option<SourceId>,
    /// Human-readable justification
    pub detail: String,
    /// Hash of previous entry (for chain integrity)
    pub prev_hash: Option<String>,
    /// Hash of this entry
    pub entry_hash: String,
}

/// Builder for an entry; the trail fills in sequence, time and hashes.
#[derive(Debug, Clone)]
pub struct EntryBuilder {
    stage: Stage,
    reason: TrailReason,
    field: Option<FieldName>,
    old_value: Option<f64>,
    new_value: Option<f64>,
    source: Option<SourceId>,
    detail: String,
}

impl EntryBuilder {
    pub fn new(stage: Stage, reason: TrailReason) -> Self {
        Self {
            stage,
            reason,
            field: None,
            old_value: None,
            new_value: None,
            source: None,
            detail: String::new(),
        }
    }

    pub fn field(mut self, field: FieldName) -> Self {
        self.field = Some(field);
        self
    }

    pub fn values(mut self, old: Option<f64>, new: Option<f64>) -> Self {
        self.old_value = old;
        self.new_value = new;
        self
    }

    pub fn source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Ordered, hash-chained record of every decision taken in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTrail {
    pub run_id: Uuid,
    pub subject_id: String,
    pub started_at: DateTime<Utc>,
    pub entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new(run_id: Uuid, subject_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            subject_id: subject_id.into(),
            started_at,
            entries: Vec::new(),
        }
    }

    /// Append an entry, returning its hash.
    pub fn record(&mut self, builder: EntryBuilder) -> String {
        let mut entry = AuditEntry {
            seq: self.entries.len() as u64,
            timestamp: Utc::now(),
            stage: builder.stage,
            field: builder.field,
            old_value: builder.old_value,
            new_value: builder.new_value,
            reason: builder.reason,
            source: builder.source,
            detail: builder.detail,
            prev_hash: self.entries.last().map(|e| e.entry_hash.clone()),
            entry_hash: String::new(),
        };
        entry.entry_hash = self.calculate_entry_hash(&entry);
        let hash = entry.entry_hash.clone();
        self.entries.push(entry);
        hash
    }

    fn calculate_entry_hash(&self, entry: &AuditEntry) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.run_id.as_bytes());
        hasher.update(entry.seq.to_be_bytes());
        hasher.update(entry.timestamp.to_rfc3339().as_bytes());
        hasher.update(entry.stage.to_string().as_bytes());
        if let Some(field) = entry.field {
            hasher.update(field.as_str().as_bytes());
        }
        hasher.update(format!("{:?}|{:?}", entry.old_value, entry.new_value).as_bytes());
        hasher.update(entry.reason.to_string().as_bytes());
        if let Some(ref source) = entry.source {
            hasher.update(source.as_str().as_bytes());
        }
        hasher.update(entry.detail.as_bytes());
        if let Some(ref prev) = entry.prev_hash {
            hasher.update(prev.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Whether every entry's hash and back-link are intact.
    pub fn verify_chain(&self) -> bool {
        let mut prev_hash: Option<&String> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.seq != i as u64
                || entry.prev_hash.as_ref() != prev_hash
                || entry.entry_hash != self.calculate_entry_hash(entry)
            {
                return false;
            }
            prev_hash = Some(&entry.entry_hash);
        }
        true
    }

    /// Entries about one field, in order.
    pub fn entries_for(&self, field: FieldName) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(move |e| e.field == Some(field))
    }

    /// Most recent entry about a field.
    pub fn last_for(&self, field: FieldName) -> Option<&AuditEntry> {
        self.entries_for(field).last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trail() -> AuditTrail {
        let mut trail = AuditTrail::new(Uuid::new_v4(), "ACME", Utc::now());
        trail.record(
            EntryBuilder::new(Stage::Extraction, TrailReason::SignNormalised)
                .field(FieldName::InterestCharges)
                .values(Some(-5.0), Some(5.0))
                .source(SourceId::extraction()),
        );
        trail.record(
            EntryBuilder::new(Stage::Merge, TrailReason::Corrected)
                .field(FieldName::Sales)
                .values(Some(90.0), Some(100.0))
                .source(SourceId::structured("snapshot"))
                .detail("low_confidence; 1 candidate"),
        );
        trail
    }

    #[test]
    fn test_chain_links() {
        let trail = trail();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail.entries[0].prev_hash, None);
        assert_eq!(
            trail.entries[1].prev_hash.as_deref(),
            Some(trail.entries[0].entry_hash.as_str())
        );
        assert_eq!(trail.entries[0].entry_hash.len(), 64);
        assert!(trail.verify_chain());
    }

    #[test]
    fn test_tampered_detail_detected() {
        let mut trail = trail();
        trail.entries[1].detail = "no candidates".into();
        assert!(!trail.verify_chain());
    }

    #[test]
    fn test_dropped_entry_detected() {
        let mut trail = trail();
        trail.entries.remove(0);
        assert!(!trail.verify_chain());
    }

    #[test]
    fn test_entries_for_field() {
        let trail = trail();
        assert_eq!(trail.entries_for(FieldName::Sales).count(), 1);
        assert_eq!(
            trail.last_for(FieldName::Sales).map(|e| e.reason),
            Some(TrailReason::Corrected)
        );
        assert!(trail.last_for(FieldName::Inventory).is_none());
    }

    #[test]
    fn test_serializes_with_snake_case_reasons() {
        let json = serde_json::to_value(trail()).unwrap();
        assert_eq!(json["entries"][1]["reason"], "corrected");
        assert_eq!(json["entries"][0]["stage"], "extraction");
        assert_eq!(json["subject_id"], "ACME");
    }
}
