//! Configuration validation.
//!
//! Checks that thresholds are in range and that source definitions are
//! usable before any pipeline is built from them.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::{AuditConfig, Config, CrossCheckConfig, LlmConfig, MergeConfig, ObservabilityConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn unit_interval(field: &str, value: f64) -> ValidationResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::InvalidValue {
            field: field.into(),
            reason: format!("{} is outside [0, 1]", value),
        })
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("unknown level '{}'", self.log_level),
            });
        }
        if self.log_format != "json" && self.log_format != "pretty" {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected 'json' or 'pretty', got '{}'", self.log_format),
            });
        }
        Ok(())
    }
}

impl Validate for LlmConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "llm.endpoint".into(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "llm.model".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "llm.timeout_secs".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

impl Validate for AuditConfig {
    fn validate(&self) -> ValidationResult<()> {
        unit_interval("audit.confidence_threshold", self.confidence_threshold)?;
        unit_interval("audit.balance_tolerance", self.balance_tolerance)?;
        if self.debt_to_assets_limit <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "audit.debt_to_assets_limit".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

impl Validate for CrossCheckConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.source_timeout_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "crosscheck.source_timeout_ms".into(),
                reason: "every source call needs a bound".into(),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ValidationError::InvalidValue {
                field: "crosscheck.max_concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }

        let mut seen = HashSet::new();
        for source in &self.fundamentals {
            if source.name.trim().is_empty() || source.endpoint.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: "crosscheck.fundamentals[].name/endpoint".into(),
                });
            }
            if !seen.insert(source.name.as_str()) {
                return Err(ValidationError::Conflict {
                    reason: format!("fundamentals source '{}' is defined twice", source.name),
                });
            }
        }
        Ok(())
    }
}

impl Validate for MergeConfig {
    fn validate(&self) -> ValidationResult<()> {
        unit_interval("merge.min_agreement", self.min_agreement)
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let results = [
            self.observability.validate(),
            self.llm.validate(),
            self.audit.validate(),
            self.crosscheck.validate(),
            self.merge.validate(),
        ];

        let mut errors: Vec<ValidationError> = results.into_iter().filter_map(Result::err).collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}
