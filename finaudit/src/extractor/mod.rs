//! Extraction of a candidate record from a raw dossier.
//!
//! The external text-understanding capability is invoked once per dossier.
//! Its answer is parsed against the closed field schema and then passed
//! through the reconciliation rules:
//!
//! - magnitude fields (debt, interest, price, ...) are stored as absolute values
//! - a missing `long_term_debt` is taken from a "debt" line item in the dossier
//! - a `total_liabilities` smaller than its itemized components is unresolved

mod dossier;

pub use dossier::{find_debt_line, line_items, LineItem};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::amount::parse_amount;
use crate::error::{ExtractionError, SourceError};
use crate::schema::{FieldName, FieldValue, FinancialRecord, SourceId};

/// Confidence assigned when the capability does not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Key of the overall certainty in an extraction response.
const OVERALL_CONFIDENCE_KEY: &str = "confidence";

// ============================================================================
// Capability Contract
// ============================================================================

/// Request sent to the text-understanding capability.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionRequest {
    /// Raw dossier text
    pub text: String,
    /// Target schema, in schema order
    pub fields: Vec<FieldName>,
}

impl ExtractionRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fields: FieldName::ALL.to_vec(),
        }
    }
}

/// Raw answer of the capability.
///
/// `payload` is expected to be a JSON object keyed by field name. Each value
/// is a number, `null`, a numeric string, or `{ "value": ..., "confidence": ... }`.
/// An optional top-level `confidence` is the capability's overall certainty.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionResponse {
    pub payload: Value,
}

/// A capability that turns text into a partial record.
#[async_trait]
pub trait TextUnderstanding: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Extract schema fields from the request text.
    async fn extract_fields(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, SourceError>;
}

// ============================================================================
// Extraction Report
// ============================================================================

/// A decision the extractor took on top of the raw capability answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionIssue {
    /// A key outside the schema was dropped
    SchemaViolation { key: String },
    /// A negative value on a magnitude field was flipped
    SignNormalised { field: FieldName, original: f64 },
    /// `long_term_debt` was taken from a dossier line item
    DebtLineFallback { label: String, value: f64 },
    /// `total_liabilities` fell short of its components and was unresolved
    ReconciliationViolation {
        field: FieldName,
        dropped: f64,
        components_sum: f64,
    },
}

/// Candidate record plus the decisions that shaped it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: FinancialRecord,
    pub issues: Vec<ExtractionIssue>,
}

// ============================================================================
// Extractor
// ============================================================================

/// Builds candidate records through an injected capability handle.
pub struct Extractor {
    capability: Arc<dyn TextUnderstanding>,
    timeout: Duration,
}

impl Extractor {
    /// Create an extractor with a bounded capability call.
    pub fn new(capability: Arc<dyn TextUnderstanding>, timeout: Duration) -> Self {
        Self { capability, timeout }
    }

    /// Extract a record from `raw_text`.
    ///
    /// Fields the capability leaves out keep the value of `existing_partial`
    /// when it has one; otherwise they are explicit unresolved nulls.
    pub async fn extract(
        &self,
        raw_text: &str,
        existing_partial: Option<&FinancialRecord>,
    ) -> Result<FinancialRecord, ExtractionError> {
        self.extract_with_report(raw_text, existing_partial)
            .await
            .map(|e| e.record)
    }

    /// Like [`Extractor::extract`], also returning the reconciliation decisions.
    pub async fn extract_with_report(
        &self,
        raw_text: &str,
        existing_partial: Option<&FinancialRecord>,
    ) -> Result<Extraction, ExtractionError> {
        let request = ExtractionRequest::new(raw_text);

        debug!(
            capability = self.capability.name(),
            text_len = raw_text.len(),
            "Requesting structured extraction"
        );

        let response = match tokio::time::timeout(
            self.timeout,
            self.capability.extract_fields(&request),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(capability = self.capability.name(), error = %e, "Extraction capability failed");
                return Err(ExtractionError::Unavailable(e));
            }
            Err(_) => {
                warn!(capability = self.capability.name(), timeout = ?self.timeout, "Extraction capability timed out");
                return Err(ExtractionError::Unavailable(SourceError::Timeout(self.timeout)));
            }
        };

        let mut issues = Vec::new();
        let parsed = parse_payload(&response.payload, &mut issues)?;
        let mut record = assemble(parsed, existing_partial);

        normalise_signs(&mut record, &mut issues);
        apply_debt_line_fallback(&mut record, raw_text, &mut issues);
        reconcile_total_liabilities(&mut record, &mut issues);

        info!(
            capability = self.capability.name(),
            resolved = FieldName::COUNT - record.unresolved_fields().len(),
            issues = issues.len(),
            "Extraction complete"
        );

        Ok(Extraction { record, issues })
    }
}

// ============================================================================
// Payload Parsing
// ============================================================================

/// A schema field as reported by the capability.
#[derive(Debug, Clone, Copy)]
struct ParsedField {
    field: FieldName,
    value: Option<f64>,
    confidence: f64,
}

fn parse_payload(
    payload: &Value,
    issues: &mut Vec<ExtractionIssue>,
) -> Result<Vec<ParsedField>, ExtractionError> {
    let obj = payload.as_object().ok_or(ExtractionError::Malformed)?;

    let overall = obj.get(OVERALL_CONFIDENCE_KEY).and_then(Value::as_f64);
    let mut parsed = Vec::new();

    for (key, raw) in obj {
        if key == OVERALL_CONFIDENCE_KEY {
            continue;
        }
        let Some(field) = FieldName::parse(key) else {
            warn!(key = %key, "Dropping field outside the schema");
            issues.push(ExtractionIssue::SchemaViolation { key: key.clone() });
            continue;
        };

        let (value, reported) = parse_entry(field, raw)?;
        parsed.push(ParsedField {
            field,
            value,
            confidence: reported.or(overall).unwrap_or(DEFAULT_CONFIDENCE),
        });
    }

    if parsed.is_empty() {
        return Err(ExtractionError::Empty);
    }
    Ok(parsed)
}

/// Parse one field entry into (value, reported confidence).
fn parse_entry(field: FieldName, raw: &Value) -> Result<(Option<f64>, Option<f64>), ExtractionError> {
    match raw {
        Value::Object(map) => {
            let value = match map.get("value") {
                Some(inner) => parse_scalar(field, inner)?,
                None => None,
            };
            let confidence = map.get("confidence").and_then(Value::as_f64);
            Ok((value, confidence))
        }
        other => Ok((parse_scalar(field, other)?, None)),
    }
}

fn parse_scalar(field: FieldName, raw: &Value) -> Result<Option<f64>, ExtractionError> {
    let invalid = || ExtractionError::InvalidField {
        field,
        raw: raw.to_string(),
    };

    match raw {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()).map(Some).ok_or_else(invalid),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("n/a") {
                Ok(None)
            } else {
                parse_amount(trimmed).map(Some).ok_or_else(invalid)
            }
        }
        _ => Err(invalid()),
    }
}

/// Build a full record: capability values first, then the partial, then unresolved.
fn assemble(parsed: Vec<ParsedField>, partial: Option<&FinancialRecord>) -> FinancialRecord {
    let mut record = match partial {
        Some(p) => p.clone(),
        None => FinancialRecord::unresolved(SourceId::extraction()),
    };

    for p in parsed {
        let value = match p.value {
            Some(v) => FieldValue::new(Some(v), SourceId::extraction(), p.confidence),
            None if partial.is_some_and(|r| !r.get(p.field).is_null()) => continue,
            None => FieldValue::unresolved(SourceId::extraction()),
        };
        record.replace(p.field, value);
    }

    // A partial may itself carry plain nulls; make them explicit.
    for field in FieldName::ALL {
        if record.get(field).is_null() && !record.get(field).is_unresolved() {
            let source = record.get(field).source().clone();
            record.replace(field, FieldValue::unresolved(source));
        }
    }

    record
}

// ============================================================================
// Reconciliation Rules
// ============================================================================

fn normalise_signs(record: &mut FinancialRecord, issues: &mut Vec<ExtractionIssue>) {
    for field in FieldName::ALL.into_iter().filter(|f| f.is_magnitude()) {
        let current = record.get(field);
        if let Some(v) = current.value().filter(|v| *v < 0.0) {
            let fixed = FieldValue::new(Some(v.abs()), current.source().clone(), current.confidence());
            record.replace(field, fixed);
            debug!(field = %field, original = v, "Normalised sign");
            issues.push(ExtractionIssue::SignNormalised { field, original: v });
        }
    }
}

fn apply_debt_line_fallback(
    record: &mut FinancialRecord,
    raw_text: &str,
    issues: &mut Vec<ExtractionIssue>,
) {
    if !record.get(FieldName::LongTermDebt).is_null() {
        return;
    }
    let Some(line) = find_debt_line(raw_text) else {
        return;
    };

    let value = line.value.abs();
    info!(label = %line.label, value, "Filling long_term_debt from dossier debt line");
    record.replace(
        FieldName::LongTermDebt,
        FieldValue::new(Some(value), SourceId::extraction(), DEFAULT_CONFIDENCE),
    );
    issues.push(ExtractionIssue::DebtLineFallback {
        label: line.label,
        value,
    });
}

fn reconcile_total_liabilities(record: &mut FinancialRecord, issues: &mut Vec<ExtractionIssue>) {
    let Some(total) = record.value(FieldName::TotalLiabilities) else {
        return;
    };
    let Some(components_sum) = record.liability_components_sum() else {
        return;
    };

    if total < components_sum {
        warn!(
            total_liabilities = total,
            components_sum,
            "Total liabilities below itemized components, marking unresolved"
        );
        record.replace(
            FieldName::TotalLiabilities,
            FieldValue::unresolved(SourceId::extraction()),
        );
        issues.push(ExtractionIssue::ReconciliationViolation {
            field: FieldName::TotalLiabilities,
            dropped: total,
            components_sum,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
