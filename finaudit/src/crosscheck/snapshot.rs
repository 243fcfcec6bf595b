//! Structured fundamentals from a quote-page style snapshot.
//!
//! A snapshot is a flat table of `label → display string` such as
//! `"Sales" → "1.5B"` or `"LT Debt/Eq" → "0.45"`. Values are parsed once,
//! a few balance-sheet lines are derived from per-share ratios, and the
//! result is exposed as a [`FundamentalsProvider`].

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::debug;

use super::FundamentalsProvider;
use crate::amount::parse_amount;
use crate::error::SourceError;
use crate::schema::FieldName;

const LABEL_BOOK_PER_SHARE: &str = "Book/sh";
const LABEL_SHARES: &str = "Shs Outstand";
const LABEL_LT_DEBT_TO_EQUITY: &str = "LT Debt/Eq";
const LABEL_TOTAL_EQUITY: &str = "Total Equity";
const LABEL_LONG_TERM_DEBT: &str = "Long Term Debt";

/// Snapshot labels that map onto schema fields.
const FIELD_LABELS: [(&str, FieldName); 12] = [
    ("Sales", FieldName::Sales),
    ("Income", FieldName::NetIncome),
    (LABEL_SHARES, FieldName::SharesOutstanding),
    ("Price", FieldName::CurrentMarketPrice),
    (LABEL_LONG_TERM_DEBT, FieldName::LongTermDebt),
    (LABEL_TOTAL_EQUITY, FieldName::TotalEquity),
    ("Total Assets", FieldName::TotalAssets),
    ("Total Liabilities", FieldName::TotalLiabilities),
    ("Current Assets", FieldName::CurrentAssets),
    ("Current Liabilities", FieldName::CurrentLiabilities),
    ("Inventory", FieldName::Inventory),
    ("Operating Income", FieldName::OperatingIncome),
];

/// Parsed snapshot table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    values: BTreeMap<String, f64>,
}

impl Snapshot {
    /// Parse raw `label → text` pairs. Placeholders and non-numeric text are dropped.
    pub fn from_raw<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let values = entries
            .into_iter()
            .filter_map(|(k, v)| parse_amount(v.as_ref()).map(|n| (k.into(), n)))
            .collect();
        let mut snapshot = Self { values };
        snapshot.derive();
        snapshot
    }

    /// Parse a JSON object whose values are display strings or numbers.
    pub fn from_json(json: &Value) -> Result<Self, SourceError> {
        let obj = json
            .as_object()
            .ok_or_else(|| SourceError::InvalidResponse("snapshot is not a JSON object".into()))?;

        let entries = obj.iter().filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            Value::Number(n) => Some((k.clone(), n.to_string())),
            _ => None,
        });
        Ok(Self::from_raw(entries))
    }

    /// Equity from book value per share, then long-term debt from its ratio to equity.
    fn derive(&mut self) {
        let (Some(book), Some(shares)) = (
            self.get(LABEL_BOOK_PER_SHARE),
            self.get(LABEL_SHARES),
        ) else {
            return;
        };

        let equity = book * shares;
        self.values.insert(LABEL_TOTAL_EQUITY.to_string(), equity);

        if let Some(ratio) = self.get(LABEL_LT_DEBT_TO_EQUITY) {
            let debt = ratio * equity;
            debug!(ratio, equity, debt, "Derived long-term debt from snapshot ratio");
            self.values.insert(LABEL_LONG_TERM_DEBT.to_string(), debt);
        }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.values.get(label).copied()
    }

    /// Value for a schema field, if the snapshot carries it.
    pub fn field(&self, field: FieldName) -> Option<f64> {
        FIELD_LABELS
            .iter()
            .find(|(_, f)| *f == field)
            .and_then(|(label, _)| self.get(label))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ============================================================================
// Providers
// ============================================================================

/// In-memory snapshots keyed by subject.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshotProvider {
    name: String,
    priority: u8,
    snapshots: BTreeMap<String, Snapshot>,
}

impl StaticSnapshotProvider {
    pub fn new(name: impl Into<String>, priority: u8) -> Self {
        Self {
            name: name.into(),
            priority,
            snapshots: BTreeMap::new(),
        }
    }

    pub fn with_snapshot(mut self, subject: impl Into<String>, snapshot: Snapshot) -> Self {
        self.snapshots.insert(subject.into(), snapshot);
        self
    }
}

#[async_trait]
impl FundamentalsProvider for StaticSnapshotProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch(&self, subject: &str, field: FieldName) -> Result<Option<f64>, SourceError> {
        Ok(self.snapshots.get(subject).and_then(|s| s.field(field)))
    }
}

/// How long a downloaded snapshot is reused for the same subject.
pub const DEFAULT_SNAPSHOT_TTL: Duration = Duration::from_secs(300);

/// Cached snapshot; the cell is shared so concurrent lookups wait on one download.
struct CacheEntry {
    snapshot: Arc<OnceCell<Snapshot>>,
    expires_at: Instant,
}

/// Snapshots served over HTTP as `GET {endpoint}/{subject}`.
///
/// One snapshot carries every field, so it is downloaded once per subject
/// and reused until the TTL runs out. Failed downloads are not cached.
pub struct HttpSnapshotProvider {
    name: String,
    priority: u8,
    endpoint: Url,
    client: Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl HttpSnapshotProvider {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl AsRef<str>,
        priority: u8,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let name = name.into();
        let endpoint = Url::parse(endpoint.as_ref()).map_err(|e| {
            SourceError::Unavailable(format!("{}: invalid endpoint {}: {}", name, endpoint.as_ref(), e))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(SourceError::Unavailable(format!(
                "{}: endpoint {} cannot take a path",
                name, endpoint
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name,
            priority,
            endpoint,
            client,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: DEFAULT_SNAPSHOT_TTL,
        })
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// `{endpoint}/{subject}` with the subject percent-encoded as one segment.
    fn snapshot_url(&self, subject: &str) -> Result<Url, SourceError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::Unavailable(format!("{}: endpoint cannot take a path", self.name)))?
            .pop_if_empty()
            .push(subject);
        Ok(url)
    }

    fn cached_cell(&self, subject: &str) -> Arc<OnceCell<Snapshot>> {
        let now = Instant::now();
        let Ok(mut cache) = self.cache.lock() else {
            return Arc::new(OnceCell::new());
        };
        cache.retain(|_, entry| entry.expires_at > now);
        let entry = cache.entry(subject.to_string()).or_insert_with(|| CacheEntry {
            snapshot: Arc::new(OnceCell::new()),
            expires_at: now + self.cache_ttl,
        });
        Arc::clone(&entry.snapshot)
    }

    async fn download(&self, subject: &str) -> Result<Snapshot, SourceError> {
        let url = self.snapshot_url(subject)?;
        debug!(provider = %self.name, url = %url, "Downloading snapshot");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Snapshot::default());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(format!("{} returned {}", self.name, status)));
        }
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("{} returned {}", self.name, status)));
        }

        let json: Value = response.json().await?;
        Snapshot::from_json(&json)
    }
}

#[async_trait]
impl FundamentalsProvider for HttpSnapshotProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    async fn fetch(&self, subject: &str, field: FieldName) -> Result<Option<f64>, SourceError> {
        let cell = self.cached_cell(subject);
        let snapshot = cell.get_or_try_init(|| self.download(subject)).await?;
        Ok(snapshot.field(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_display_values() {
        let snapshot = Snapshot::from_raw([
            ("Sales", "1.5B"),
            ("Income", "-"),
            ("ROE", "12.5%"),
            ("Price", "187.20"),
            ("Index", "S&P 500"),
        ]);
        assert_eq!(snapshot.field(FieldName::Sales), Some(1.5e9));
        assert_eq!(snapshot.field(FieldName::NetIncome), None);
        assert_eq!(snapshot.get("ROE"), Some(12.5));
        assert_eq!(snapshot.field(FieldName::CurrentMarketPrice), Some(187.2));
        assert_eq!(snapshot.get("Index"), None);
    }

    #[test]
    fn test_derived_equity_and_debt() {
        let snapshot = Snapshot::from_raw([
            ("Book/sh", "4.00"),
            ("Shs Outstand", "100M"),
            ("LT Debt/Eq", "0.5"),
        ]);
        assert_eq!(snapshot.field(FieldName::TotalEquity), Some(4e8));
        assert_eq!(snapshot.field(FieldName::LongTermDebt), Some(2e8));
    }

    #[test]
    fn test_no_derivation_without_shares() {
        let snapshot = Snapshot::from_raw([("Book/sh", "4.00"), ("LT Debt/Eq", "0.5")]);
        assert_eq!(snapshot.field(FieldName::LongTermDebt), None);
        assert_eq!(snapshot.field(FieldName::TotalEquity), None);
    }

    #[test]
    fn test_from_json() {
        let snapshot = Snapshot::from_json(&json!({"Sales": "2B", "Price": 10.5, "Optionable": true})).unwrap();
        assert_eq!(snapshot.field(FieldName::Sales), Some(2e9));
        assert_eq!(snapshot.field(FieldName::CurrentMarketPrice), Some(10.5));
        assert!(Snapshot::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_eps_is_not_mapped() {
        let snapshot = Snapshot::from_raw([("EPS (ttm)", "6.1")]);
        assert_eq!(snapshot.field(FieldName::Eps3yAvg), None);
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticSnapshotProvider::new("snapshot", 1)
            .with_snapshot("ACME", Snapshot::from_raw([("Sales", "300M")]));
        assert_eq!(provider.fetch("ACME", FieldName::Sales).await.unwrap(), Some(3e8));
        assert_eq!(provider.fetch("ACME", FieldName::Inventory).await.unwrap(), None);
        assert_eq!(provider.fetch("OTHER", FieldName::Sales).await.unwrap(), None);
    }
}
