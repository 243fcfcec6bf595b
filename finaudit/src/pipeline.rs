//! The extraction → audit → cross-check → merge pipeline.
//!
//! A [`Pipeline`] holds only immutable handles and policies, so it can be
//! shared across concurrent runs. Each call to [`Pipeline::run`] owns a
//! fresh [`PipelineRun`] that is consumed when the run returns.

use chrono::{DateTime, Utc};
use finaudit_common::Config;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::auditor::{AuditPolicy, Auditor};
use crate::crosscheck::snapshot::HttpSnapshotProvider;
use crate::crosscheck::{
    CrossChecker, FreeTextSearch, FundamentalsProvider, DEFAULT_MAX_CONCURRENCY,
    DEFAULT_SOURCE_TIMEOUT,
};
use crate::error::{PipelineError, SourceError};
use crate::extractor::{ExtractionIssue, Extractor, TextUnderstanding};
use crate::merger::{AuditTrail, EntryBuilder, MergePolicy, Merger, Stage, TrailReason};
use crate::schema::{FieldName, FinancialRecord, SourceId};

/// Default bound on the extraction call.
pub const DEFAULT_EXTRACTION_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Run Context
// ============================================================================

/// State owned by a single pipeline invocation.
#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub subject_id: String,
    pub dossier: String,
    pub started_at: DateTime<Utc>,
    pub candidate: Option<FinancialRecord>,
    pub trail: AuditTrail,
}

impl PipelineRun {
    pub fn new(subject_id: &str, dossier: &str) -> Self {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        Self {
            run_id,
            subject_id: subject_id.to_string(),
            dossier: dossier.to_string(),
            started_at,
            candidate: None,
            trail: AuditTrail::new(run_id, subject_id, started_at),
        }
    }

    fn record_extraction_issue(&mut self, issue: &ExtractionIssue) {
        let builder = match issue {
            ExtractionIssue::SchemaViolation { key } => {
                EntryBuilder::new(Stage::Extraction, TrailReason::SchemaViolation)
                    .detail(format!("dropped key '{}' outside the schema", key))
            }
            ExtractionIssue::SignNormalised { field, original } => {
                EntryBuilder::new(Stage::Extraction, TrailReason::SignNormalised)
                    .field(*field)
                    .values(Some(*original), Some(original.abs()))
                    .source(SourceId::extraction())
                    .detail("magnitude stored as absolute value")
            }
            ExtractionIssue::DebtLineFallback { label, value } => {
                EntryBuilder::new(Stage::Extraction, TrailReason::DebtLineFallback)
                    .field(FieldName::LongTermDebt)
                    .values(None, Some(*value))
                    .source(SourceId::extraction())
                    .detail(format!("taken from dossier line '{}'", label))
            }
            ExtractionIssue::ReconciliationViolation {
                field,
                dropped,
                components_sum,
            } => EntryBuilder::new(Stage::Extraction, TrailReason::ReconciliationViolation)
                .field(*field)
                .values(Some(*dropped), None)
                .source(SourceId::extraction())
                .detail(format!(
                    "{} below itemized components summing to {}",
                    dropped, components_sum
                )),
        };
        self.trail.record(builder);
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    extractor: Extractor,
    auditor: Auditor,
    cross_checker: CrossChecker,
    merger: Merger,
}

impl Pipeline {
    pub fn builder(capability: Arc<dyn TextUnderstanding>) -> PipelineBuilder {
        PipelineBuilder::new(capability)
    }

    /// Build from configuration: policies, timeouts and the HTTP snapshot
    /// providers listed under `crosscheck.fundamentals`.
    pub fn from_config(
        config: &Config,
        capability: Arc<dyn TextUnderstanding>,
        search: Option<Arc<dyn FreeTextSearch>>,
    ) -> Result<Self, SourceError> {
        let mut builder = Self::builder(capability).configure(config)?;
        if let Some(search) = search.filter(|_| config.crosscheck.search_enabled) {
            builder = builder.search(search);
        }
        Ok(builder.build())
    }

    /// Run the pipeline on a dossier.
    pub async fn run(
        &self,
        subject_id: &str,
        raw_text: &str,
    ) -> Result<(FinancialRecord, AuditTrail), PipelineError> {
        self.run_with_partial(subject_id, raw_text, None).await
    }

    /// Run the pipeline, filling extraction gaps from an existing partial record.
    pub async fn run_with_partial(
        &self,
        subject_id: &str,
        raw_text: &str,
        partial: Option<&FinancialRecord>,
    ) -> Result<(FinancialRecord, AuditTrail), PipelineError> {
        let run = PipelineRun::new(subject_id, raw_text);
        let span = info_span!("pipeline_run", run_id = %run.run_id, subject = %subject_id);
        self.execute(run, partial).instrument(span).await
    }

    async fn execute(
        &self,
        mut run: PipelineRun,
        partial: Option<&FinancialRecord>,
    ) -> Result<(FinancialRecord, AuditTrail), PipelineError> {
        info!(dossier_len = run.dossier.len(), "Pipeline run started");

        let extraction = self
            .extractor
            .extract_with_report(&run.dossier, partial)
            .await?;
        for issue in &extraction.issues {
            run.record_extraction_issue(issue);
        }
        let candidate = run.candidate.insert(extraction.record);

        let reports = self.auditor.audit(candidate);
        info!(suspicious = reports.len(), "Audit complete");

        let checked = self
            .cross_checker
            .cross_check_with_outcomes(&run.subject_id, &reports)
            .await;

        self.merger.record_outcomes(&checked.outcomes, &mut run.trail);
        let record = self.merger.merge(
            candidate.clone(),
            &reports,
            &checked.candidates,
            &mut run.trail,
        );

        info!(
            unresolved = record.unresolved_fields().len(),
            trail_entries = run.trail.len(),
            "Pipeline run complete"
        );
        Ok((record, run.trail))
    }
}

// ============================================================================
// Builder
// ============================================================================

pub struct PipelineBuilder {
    capability: Arc<dyn TextUnderstanding>,
    providers: Vec<Arc<dyn FundamentalsProvider>>,
    search: Vec<Arc<dyn FreeTextSearch>>,
    extraction_timeout: Duration,
    source_timeout: Duration,
    search_timeout: Option<Duration>,
    max_concurrency: usize,
    audit_policy: AuditPolicy,
    merge_policy: MergePolicy,
}

impl PipelineBuilder {
    fn new(capability: Arc<dyn TextUnderstanding>) -> Self {
        Self {
            capability,
            providers: Vec::new(),
            search: Vec::new(),
            extraction_timeout: DEFAULT_EXTRACTION_TIMEOUT,
            source_timeout: DEFAULT_SOURCE_TIMEOUT,
            search_timeout: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            audit_policy: AuditPolicy::default(),
            merge_policy: MergePolicy::default(),
        }
    }

    /// Apply policies and timeouts from config and register its HTTP providers.
    pub fn configure(mut self, config: &Config) -> Result<Self, SourceError> {
        self.audit_policy = AuditPolicy::from(&config.audit);
        self.merge_policy = MergePolicy::from(config);
        // The chat bridge retries inside one call, so its bound covers every attempt
        let llm_budget = config.llm.call_budget();
        self.extraction_timeout = llm_budget;
        self.source_timeout = Duration::from_millis(config.crosscheck.source_timeout_ms);
        self.search_timeout = Some(self.source_timeout.max(llm_budget));
        self.max_concurrency = config.crosscheck.max_concurrency;

        for source in &config.crosscheck.fundamentals {
            let provider = HttpSnapshotProvider::new(
                source.name.clone(),
                source.endpoint.clone(),
                source.priority,
                self.source_timeout,
            )?;
            self.providers.push(Arc::new(provider));
        }
        Ok(self)
    }

    pub fn provider(mut self, provider: Arc<dyn FundamentalsProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn search(mut self, search: Arc<dyn FreeTextSearch>) -> Self {
        self.search.push(search);
        self
    }

    pub fn extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout = timeout;
        self
    }

    pub fn source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    pub fn search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = Some(timeout);
        self
    }

    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn audit_policy(mut self, policy: AuditPolicy) -> Self {
        self.audit_policy = policy;
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn build(self) -> Pipeline {
        let mut cross_checker = CrossChecker::new(self.source_timeout)
            .with_search_timeout(self.search_timeout.unwrap_or(self.source_timeout))
            .with_max_concurrency(self.max_concurrency);
        for provider in self.providers {
            cross_checker = cross_checker.with_provider(provider);
        }
        for search in self.search {
            cross_checker = cross_checker.with_search(search);
        }

        Pipeline {
            extractor: Extractor::new(self.capability, self.extraction_timeout),
            auditor: Auditor::new(self.audit_policy),
            cross_checker,
            merger: Merger::new(self.merge_policy),
        }
    }
}
