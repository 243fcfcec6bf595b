//! Cross-validation of suspicious fields against independent sources.
//!
//! Every suspicious field is queried concurrently against each registered
//! structured fundamentals provider. Fields that no provider could answer
//! fall back to the free-text search sources. Each call runs in its own
//! task under a per-call timeout; a failing or slow source simply
//! contributes nothing.
//!
//! Results are collected into a map keyed by (field, source kind, priority,
//! source name), so the output never depends on task completion order.

pub mod snapshot;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::amount::parse_amount;
use crate::auditor::SuspiciousFieldReport;
use crate::error::SourceError;
use crate::schema::{FieldName, SourceId, SourceKind};

/// Score given to a candidate when there is no prior value to compare with.
pub const LONE_SOURCE_SCORE: f64 = 0.7;

/// Relative divergence at or below which agreement is full.
const FULL_AGREEMENT_DIVERGENCE: f64 = 0.02;

/// Relative divergence at or above which agreement is zero.
const NO_AGREEMENT_DIVERGENCE: f64 = 0.25;

pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

// ============================================================================
// Source Contracts
// ============================================================================

/// A structured fundamentals source.
#[async_trait]
pub trait FundamentalsProvider: Send + Sync {
    /// Provider name (used in provenance)
    fn name(&self) -> &str;

    /// Lower value = preferred
    fn priority(&self) -> u8 {
        0
    }

    /// Value of `field` for `subject`, or `None` when the provider has no data.
    async fn fetch(&self, subject: &str, field: FieldName) -> Result<Option<f64>, SourceError>;
}

/// Question put to a free-text search source.
#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub subject: String,
    pub field: FieldName,
    /// What the pipeline currently believes, for disambiguation
    pub context: Option<String>,
}

/// Raw value returned by a search source: a number or text to be parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    /// Finite numeric reading of the value, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.is_finite().then_some(*n),
            Self::Text(s) => parse_amount(s),
        }
    }
}

/// Answer of a search source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAnswer {
    #[serde(alias = "value")]
    pub raw_value: RawValue,
    #[serde(default)]
    pub justification: Option<String>,
}

/// A free-text search source that answers with a single value.
#[async_trait]
pub trait FreeTextSearch: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &SearchQuery) -> Result<Option<SearchAnswer>, SourceError>;
}

// ============================================================================
// Candidates
// ============================================================================

/// A proposed replacement value for a suspicious field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionCandidate {
    pub field: FieldName,
    pub proposed_value: f64,
    pub source: SourceId,
    /// Registered priority of the source (lower = preferred)
    pub priority: u8,
    pub agreement_score: f64,
    pub justification: Option<String>,
}

/// How one (field, source) query ended.
#[derive(Debug, Clone)]
pub enum QueryStatus {
    /// A usable value was returned
    Answered,
    /// The source has no value for the field
    NoData,
    /// The source answered with something that is not a finite number
    Discarded(String),
    /// Timeout or error
    Unavailable(SourceError),
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub field: FieldName,
    pub source: SourceId,
    pub status: QueryStatus,
}

/// Everything a cross-check produced, in deterministic order.
#[derive(Debug, Clone, Default)]
pub struct CrossCheckReport {
    pub candidates: Vec<CorrectionCandidate>,
    pub outcomes: Vec<SourceOutcome>,
}

/// Agreement between a prior value and a proposed one, in [0, 1].
///
/// Full agreement within 2% relative divergence, none at 25% or more, linear
/// in between. A missing, zero or non-finite prior gives [`LONE_SOURCE_SCORE`].
pub fn agreement_score(prior: Option<f64>, proposed: f64) -> f64 {
    let Some(prior) = prior.filter(|p| p.is_finite() && *p != 0.0) else {
        return LONE_SOURCE_SCORE;
    };
    if !proposed.is_finite() {
        return 0.0;
    }

    let divergence = (proposed - prior).abs() / proposed.abs().max(prior.abs());
    if divergence <= FULL_AGREEMENT_DIVERGENCE {
        1.0
    } else if divergence >= NO_AGREEMENT_DIVERGENCE {
        0.0
    } else {
        1.0 - (divergence - FULL_AGREEMENT_DIVERGENCE)
            / (NO_AGREEMENT_DIVERGENCE - FULL_AGREEMENT_DIVERGENCE)
    }
}

// ============================================================================
// Query Plumbing
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueryKey {
    field: FieldName,
    kind: SourceKind,
    priority: u8,
    name: String,
    /// Registration index, keeps same-named sources apart
    slot: usize,
}

impl QueryKey {
    fn source_id(&self) -> SourceId {
        match self.kind {
            SourceKind::Structured => SourceId::structured(&self.name),
            _ => SourceId::search(&self.name),
        }
    }
}

#[derive(Debug)]
enum QueryResult {
    Value {
        value: f64,
        justification: Option<String>,
    },
    NoData,
    Discarded(String),
    Failed(SourceError),
}

type QueryResults = BTreeMap<QueryKey, QueryResult>;

/// Run `call` under a concurrency permit and a timeout.
async fn bounded<F>(semaphore: Arc<Semaphore>, timeout: Duration, call: F) -> QueryResult
where
    F: std::future::Future<Output = QueryResult>,
{
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return QueryResult::Failed(SourceError::Unavailable("cross-check closed".into())),
    };
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => QueryResult::Failed(SourceError::Timeout(timeout)),
    }
}

async fn collect(mut set: JoinSet<(QueryKey, QueryResult)>, into: &mut QueryResults) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((key, result)) => {
                into.insert(key, result);
            }
            Err(e) => warn!(error = %e, "Cross-check task aborted"),
        }
    }
}

fn normalise(field: FieldName, value: f64) -> f64 {
    if field.is_magnitude() {
        value.abs()
    } else {
        value
    }
}

// ============================================================================
// Cross Checker
// ============================================================================

/// Queries independent sources for suspicious fields.
pub struct CrossChecker {
    providers: Vec<Arc<dyn FundamentalsProvider>>,
    search: Vec<Arc<dyn FreeTextSearch>>,
    timeout: Duration,
    search_timeout: Duration,
    max_concurrency: usize,
}

impl Default for CrossChecker {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_TIMEOUT)
    }
}

impl CrossChecker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            search: Vec::new(),
            timeout,
            search_timeout: timeout,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    /// Bound for search calls, which may retry internally. Defaults to the
    /// structured-source timeout.
    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    /// Register a structured provider. Providers are kept ordered by priority.
    pub fn with_provider(mut self, provider: Arc<dyn FundamentalsProvider>) -> Self {
        self.providers.push(provider);
        self.providers.sort_by_key(|p| p.priority());
        self
    }

    /// Register a search fallback.
    pub fn with_search(mut self, search: Arc<dyn FreeTextSearch>) -> Self {
        self.search.push(search);
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn has_sources(&self) -> bool {
        !self.providers.is_empty() || !self.search.is_empty()
    }

    /// Correction candidates for the reported fields.
    pub async fn cross_check(
        &self,
        subject_id: &str,
        reports: &[SuspiciousFieldReport],
    ) -> Vec<CorrectionCandidate> {
        self.cross_check_with_outcomes(subject_id, reports)
            .await
            .candidates
    }

    /// Like [`CrossChecker::cross_check`], also reporting every query outcome.
    pub async fn cross_check_with_outcomes(
        &self,
        subject_id: &str,
        reports: &[SuspiciousFieldReport],
    ) -> CrossCheckReport {
        let priors: BTreeMap<FieldName, Option<f64>> = reports
            .iter()
            .map(|r| (r.field, r.prior_value.value()))
            .collect();
        if priors.is_empty() || !self.has_sources() {
            return CrossCheckReport::default();
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut results = QueryResults::new();

        // Phase 1: structured providers
        let mut set = JoinSet::new();
        for &field in priors.keys() {
            for (slot, provider) in self.providers.iter().enumerate() {
                let provider = Arc::clone(provider);
                let subject = subject_id.to_string();
                let semaphore = Arc::clone(&semaphore);
                let timeout = self.timeout;
                let key = QueryKey {
                    field,
                    kind: SourceKind::Structured,
                    priority: provider.priority(),
                    name: provider.name().to_string(),
                    slot,
                };
                set.spawn(async move {
                    let result = bounded(semaphore, timeout, async {
                        match provider.fetch(&subject, field).await {
                            Ok(Some(v)) if v.is_finite() => QueryResult::Value {
                                value: normalise(field, v),
                                justification: None,
                            },
                            Ok(Some(v)) => QueryResult::Discarded(v.to_string()),
                            Ok(None) => QueryResult::NoData,
                            Err(e) => QueryResult::Failed(e),
                        }
                    })
                    .await;
                    (key, result)
                });
            }
        }
        collect(set, &mut results).await;

        // Phase 2: search fallback for fields no provider answered
        let unanswered: Vec<FieldName> = priors
            .keys()
            .copied()
            .filter(|field| {
                !results
                    .iter()
                    .any(|(k, r)| k.field == *field && matches!(r, QueryResult::Value { .. }))
            })
            .collect();

        if !unanswered.is_empty() && !self.search.is_empty() {
            let mut set = JoinSet::new();
            for &field in &unanswered {
                let context = Some(match priors.get(&field).copied().flatten() {
                    Some(v) => format!("{}; extracted value {} is suspicious", field.description(), v),
                    None => format!("{}; no value could be extracted", field.description()),
                });
                for (idx, search) in self.search.iter().enumerate() {
                    let search = Arc::clone(search);
                    let semaphore = Arc::clone(&semaphore);
                    let timeout = self.search_timeout;
                    let query = SearchQuery {
                        subject: subject_id.to_string(),
                        field,
                        context: context.clone(),
                    };
                    let key = QueryKey {
                        field,
                        kind: SourceKind::Search,
                        priority: u8::try_from(idx).unwrap_or(u8::MAX),
                        name: search.name().to_string(),
                        slot: idx,
                    };
                    set.spawn(async move {
                        let result = bounded(semaphore, timeout, async {
                            match search.search(&query).await {
                                Ok(Some(answer)) => match answer.raw_value.as_number() {
                                    Some(v) => QueryResult::Value {
                                        value: normalise(field, v),
                                        justification: answer.justification,
                                    },
                                    None => QueryResult::Discarded(format!("{:?}", answer.raw_value)),
                                },
                                Ok(None) => QueryResult::NoData,
                                Err(e) => QueryResult::Failed(e),
                            }
                        })
                        .await;
                        (key, result)
                    });
                }
            }
            collect(set, &mut results).await;
        }

        let report = assemble(&priors, results);
        info!(
            subject = subject_id,
            fields = priors.len(),
            candidates = report.candidates.len(),
            "Cross-check complete"
        );
        report
    }
}

fn assemble(priors: &BTreeMap<FieldName, Option<f64>>, results: QueryResults) -> CrossCheckReport {
    let mut report = CrossCheckReport::default();

    for (key, result) in results {
        let source = key.source_id();
        let status = match result {
            QueryResult::Value {
                value,
                justification,
            } => {
                let prior = priors.get(&key.field).copied().flatten();
                let score = agreement_score(prior, value);
                debug!(field = %key.field, source = %source, value, score, "Candidate");
                report.candidates.push(CorrectionCandidate {
                    field: key.field,
                    proposed_value: value,
                    source: source.clone(),
                    priority: key.priority,
                    agreement_score: score,
                    justification,
                });
                QueryStatus::Answered
            }
            QueryResult::NoData => QueryStatus::NoData,
            QueryResult::Discarded(raw) => {
                warn!(field = %key.field, source = %source, raw = %raw, "Discarding non-numeric answer");
                QueryStatus::Discarded(raw)
            }
            QueryResult::Failed(e) => {
                warn!(field = %key.field, source = %source, error = %e, "Source unavailable");
                QueryStatus::Unavailable(e)
            }
        };
        report.outcomes.push(SourceOutcome {
            field: key.field,
            source,
            status,
        });
    }

    report
}
