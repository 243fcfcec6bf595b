//! finaudit Library
//!
//! Zero-trust extraction of company financials: a raw dossier becomes a
//! strictly-typed, provenance-tagged record whose every suspicious field has
//! been cross-checked against independent sources.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────┐   ┌──────────────┐   ┌────────┐
//! │ dossier  │──▶│ Extractor  │──▶│ Auditor  │──▶│ CrossChecker │──▶│ Merger │──▶ record
//! └──────────┘   │ (LLM call) │   │ (pure)   │   │ (JoinSet)    │   │        │    + trail
//!                └────────────┘   └──────────┘   └──────┬───────┘   └────────┘
//!                                                       │
//!                                   ┌───────────────────┴──────────────┐
//!                                   │ structured providers → search    │
//!                                   └──────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Provenance
//! - Every field carries its source, a confidence and a `verified` flag
//! - Fields the pipeline cannot settle are explicitly `unresolved`
//!
//! ## Audit trail
//! - Every extraction fix, correction and failed source call is logged
//! - Entries are SHA-256 hash-chained, see [`AuditTrail::verify_chain`]

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod amount;
pub mod auditor;
pub mod bridge;
pub mod crosscheck;
pub mod error;
pub mod extractor;
pub mod merger;
pub mod pipeline;
pub mod schema;

pub use auditor::{AuditPolicy, Auditor, ReasonCode, SuspiciousFieldReport};
pub use bridge::{ChatBridgeConfig, ChatCompletionBridge};
pub use crosscheck::{
    agreement_score, CorrectionCandidate, CrossChecker, FreeTextSearch, FundamentalsProvider,
    SearchAnswer, SearchQuery,
};
pub use error::{ExtractionError, PipelineError, SourceError};
pub use extractor::{ExtractionRequest, ExtractionResponse, Extractor, TextUnderstanding};
pub use merger::{AuditEntry, AuditTrail, MergePolicy, Merger, TrailReason};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineRun};
pub use schema::{FieldName, FieldValue, FinancialRecord, SourceId, SourceKind};
