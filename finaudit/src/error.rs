//! Error taxonomy for the pipeline.
//!
//! Only [`ExtractionError`] is fatal to a run. [`SourceError`] is absorbed
//! per source call; reconciliation and schema violations are not errors at
//! all but unresolved fields and audit trail entries.

use std::time::Duration;
use thiserror::Error;

use crate::schema::FieldName;

/// Failure of a single external source call.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The call did not complete within its bound
    #[error("Source timed out after {0:?}")]
    Timeout(Duration),

    /// Connection failed
    #[error("Network error: {0}")]
    Network(String),

    /// Authentication rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The source answered but is not serving
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something we cannot interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SourceError {
    /// Worth retrying against the same source.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Network(_) | Self::Unavailable(_)
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(Duration::ZERO)
        } else if e.is_decode() {
            Self::InvalidResponse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// No usable candidate record could be produced.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Text-understanding capability unavailable: {0}")]
    Unavailable(#[source] SourceError),

    #[error("Extraction response is not a JSON object")]
    Malformed,

    #[error("Field '{field}' has an unparseable value: {raw}")]
    InvalidField { field: FieldName, raw: String },

    #[error("Extraction response contained no schema fields")]
    Empty,
}

/// Errors surfaced by [`crate::Pipeline::run`].
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
