//! The financial record: one provenance-tagged value per schema field.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use super::{FieldName, FieldValue, SourceId};

/// Raised when a serialized record does not have exactly the schema's keys.
#[derive(Debug, Error)]
#[error("record is missing schema fields: {missing:?}")]
pub struct RecordShapeError {
    pub missing: Vec<FieldName>,
}

/// A complete financial record.
///
/// Storage is indexed by [`FieldName::index`], so every schema key is
/// present for the lifetime of the record. Serializes as a flat object whose
/// keys are exactly the schema names, in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<FieldName, FieldValue>",
    into = "BTreeMap<FieldName, FieldValue>"
)]
pub struct FinancialRecord {
    values: [FieldValue; FieldName::COUNT],
}

impl FinancialRecord {
    /// A record where every field is an explicit unresolved null.
    pub fn unresolved(source: SourceId) -> Self {
        Self {
            values: std::array::from_fn(|_| FieldValue::unresolved(source.clone())),
        }
    }

    /// Builder-style setter used when assembling a record.
    pub fn with(mut self, field: FieldName, value: FieldValue) -> Self {
        self.values[field.index()] = value;
        self
    }

    /// Swap in a new value, returning the superseded one.
    pub(crate) fn replace(&mut self, field: FieldName, value: FieldValue) -> FieldValue {
        std::mem::replace(&mut self.values[field.index()], value)
    }

    pub fn get(&self, field: FieldName) -> &FieldValue {
        &self.values[field.index()]
    }

    /// Numeric value of a field, if present.
    pub fn value(&self, field: FieldName) -> Option<f64> {
        self.get(field).value()
    }

    /// Fields and values in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldName, &FieldValue)> {
        FieldName::ALL.iter().copied().zip(self.values.iter())
    }

    /// Every field is non-null or explicitly marked unresolved.
    pub fn is_extraction_complete(&self) -> bool {
        self.values.iter().all(|v| !v.is_null() || v.is_unresolved())
    }

    /// Fields currently marked unresolved.
    pub fn unresolved_fields(&self) -> Vec<FieldName> {
        self.iter()
            .filter(|(_, v)| v.is_unresolved())
            .map(|(f, _)| f)
            .collect()
    }

    /// Flat `name → number|null` document.
    pub fn to_flat_values(&self) -> BTreeMap<FieldName, Option<f64>> {
        self.iter().map(|(f, v)| (f, v.value())).collect()
    }

    /// Sum of the non-null liability components, or `None` if none is reported.
    pub fn liability_components_sum(&self) -> Option<f64> {
        let present: Vec<f64> = FieldName::LIABILITY_COMPONENTS
            .iter()
            .filter_map(|f| self.value(*f))
            .collect();
        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum())
        }
    }

    /// Shareholders' equity: the reported total, else the sum of the capital
    /// lines when any of them is reported.
    pub fn equity(&self) -> Option<f64> {
        if let Some(total) = self.value(FieldName::TotalEquity) {
            return Some(total);
        }
        let parts: Vec<f64> = [
            FieldName::PreferredStock,
            FieldName::CommonStock,
            FieldName::Surplus,
        ]
        .iter()
        .filter_map(|f| self.value(*f))
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.iter().sum())
        }
    }
}

impl From<FinancialRecord> for BTreeMap<FieldName, FieldValue> {
    fn from(record: FinancialRecord) -> Self {
        FieldName::ALL.into_iter().zip(record.values).collect()
    }
}

impl TryFrom<BTreeMap<FieldName, FieldValue>> for FinancialRecord {
    type Error = RecordShapeError;

    fn try_from(mut map: BTreeMap<FieldName, FieldValue>) -> Result<Self, Self::Error> {
        let missing: Vec<FieldName> = FieldName::ALL
            .iter()
            .copied()
            .filter(|f| !map.contains_key(f))
            .collect();
        if !missing.is_empty() {
            return Err(RecordShapeError { missing });
        }

        let mut record = Self::unresolved(SourceId::extraction());
        for field in FieldName::ALL {
            if let Some(value) = map.remove(&field) {
                record.values[field.index()] = value;
            }
        }
        Ok(record)
    }
}
