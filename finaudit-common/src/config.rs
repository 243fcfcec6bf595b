//! Configuration for the finaudit pipeline.
//!
//! Configuration lives at `~/.finaudit/config.json`. Every section is
//! optional and falls back to defaults.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (FINAUDIT_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `FINAUDIT_LOG_LEVEL` → observability.log_level
//! - `FINAUDIT_LOG_FORMAT` → observability.log_format
//! - `FINAUDIT_LLM_ENDPOINT` → llm.endpoint
//! - `FINAUDIT_LLM_MODEL` → llm.model
//! - `FINAUDIT_AUDIT_MODE` → audit.mode
//! - `FINAUDIT_SOURCE_TIMEOUT_MS` → crosscheck.source_timeout_ms
//!
//! The LLM API key is never stored in the file; it is read from the
//! environment variable named by `llm.api_key_env`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result, ResultExt};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".finaudit"),
        |dirs| dirs.home_dir().join(".finaudit"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// LLM (text-understanding and free-text search capability)
// ============================================================================

/// Connection settings for the OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL, without the `/v1/chat/completions` suffix
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model name sent with every request
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "default_llm_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl LlmConfig {
    /// Wall-clock bound for one logical call: every attempt at the full
    /// request timeout plus the pauses between them.
    pub fn call_budget(&self) -> Duration {
        let attempts = self.max_retries.saturating_add(1);
        Duration::from_secs(self.timeout_secs).saturating_mul(attempts)
            + Duration::from_millis(self.retry_backoff_ms).saturating_mul(self.max_retries)
    }
}

fn default_llm_endpoint() -> String {
    "https://api.openai.com".into()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_llm_retries() -> u32 {
    2
}

fn default_llm_backoff_ms() -> u64 {
    1000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
            retry_backoff_ms: default_llm_backoff_ms(),
        }
    }
}

// ============================================================================
// Audit
// ============================================================================

/// How aggressively the auditor flags fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditMode {
    /// Flag only fields that fail a heuristic
    #[default]
    #[serde(alias = "quick")]
    Standard,
    /// Additionally flag every core field for cross-checking
    Full,
}

impl AuditMode {
    /// Parse from string ("standard", "quick", "full")
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "quick" => Some(Self::Standard),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

/// Auditor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub mode: AuditMode,

    /// Fields below this confidence are flagged
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Allowed relative gap in `liabilities + equity = assets`
    #[serde(default = "default_balance_tolerance")]
    pub balance_tolerance: f64,

    /// Long-term debt above this share of total assets is flagged
    #[serde(default = "default_debt_to_assets_limit")]
    pub debt_to_assets_limit: f64,
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_balance_tolerance() -> f64 {
    0.01
}

fn default_debt_to_assets_limit() -> f64 {
    0.5
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            mode: AuditMode::default(),
            confidence_threshold: default_confidence_threshold(),
            balance_tolerance: default_balance_tolerance(),
            debt_to_assets_limit: default_debt_to_assets_limit(),
        }
    }
}

// ============================================================================
// Cross-check
// ============================================================================

/// A structured fundamentals endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundamentalsSourceConfig {
    /// Provider name, used in provenance (`structured:<name>`)
    pub name: String,
    /// Base URL; the subject id is appended as a path segment
    pub endpoint: String,
    /// Lower = preferred
    #[serde(default)]
    pub priority: u8,
}

/// Cross-check fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossCheckConfig {
    /// Per source call timeout
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Upper bound on in-flight source queries per run
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Fall back to free-text search when no structured provider answers
    #[serde(default = "default_true")]
    pub search_enabled: bool,

    #[serde(default)]
    pub fundamentals: Vec<FundamentalsSourceConfig>,
}

fn default_source_timeout_ms() -> u64 {
    10_000
}

fn default_max_concurrency() -> usize {
    16
}

fn default_true() -> bool {
    true
}

impl Default for CrossCheckConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: default_source_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            search_enabled: true,
            fundamentals: Vec::new(),
        }
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Merge policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// A lone candidate replaces the prior value only at or above this score
    #[serde(default = "default_min_agreement")]
    pub min_agreement: f64,
}

fn default_min_agreement() -> f64 {
    0.5
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            min_agreement: default_min_agreement(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub crosscheck: CrossCheckConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl Config {
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("FINAUDIT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("FINAUDIT_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(endpoint) = lookup("FINAUDIT_LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = lookup("FINAUDIT_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(mode) = lookup("FINAUDIT_AUDIT_MODE") {
            match AuditMode::parse(&mode) {
                Some(m) => self.audit.mode = m,
                None => tracing::warn!(value = %mode, "Ignoring unknown FINAUDIT_AUDIT_MODE"),
            }
        }
        if let Some(timeout) = lookup("FINAUDIT_SOURCE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.crosscheck.source_timeout_ms = ms;
            }
        }
    }

    /// Read the LLM API key from the configured environment variable.
    pub fn llm_api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    /// Persist configuration to a path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .map_err(Error::from)
            .context(format!("Failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.audit.mode, AuditMode::Standard);
        assert!((config.audit.confidence_threshold - 0.6).abs() < f64::EPSILON);
        assert!((config.audit.balance_tolerance - 0.01).abs() < f64::EPSILON);
        assert_eq!(config.crosscheck.source_timeout_ms, 10_000);
        assert!((config.merge.min_agreement - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_file_uses_section_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"audit": {"mode": "full"}, "crosscheck": {"fundamentals": [{"name": "snap", "endpoint": "http://localhost:9000"}]}}"#,
        )
        .unwrap();
        assert_eq!(config.audit.mode, AuditMode::Full);
        assert!((config.audit.confidence_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.crosscheck.fundamentals.len(), 1);
        assert_eq!(config.crosscheck.fundamentals[0].priority, 0);
        assert!(config.crosscheck.search_enabled);
    }

    #[test]
    fn test_quick_mode_accepted_in_file() {
        let config: Config = serde_json::from_str(r#"{"audit": {"mode": "quick"}}"#).unwrap();
        assert_eq!(config.audit.mode, AuditMode::Standard);
        // written back under the canonical name
        let saved = serde_json::to_value(&config.audit).unwrap();
        assert_eq!(saved["mode"], "standard");
    }

    #[test]
    fn test_llm_call_budget_covers_retries() {
        let llm = LlmConfig::default();
        // 3 attempts at 60 s plus 2 pauses of 1 s
        assert_eq!(llm.call_budget(), Duration::from_secs(182));

        let single = LlmConfig {
            max_retries: 0,
            timeout_secs: 5,
            ..LlmConfig::default()
        };
        assert_eq!(single.call_budget(), Duration::from_secs(5));
    }

    #[test]
    fn test_observability_aliases() {
        let config: Config =
            serde_json::from_str(r#"{"observability": {"level": "debug", "format": "json"}}"#)
                .unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("FINAUDIT_LOG_LEVEL", "trace"),
            ("FINAUDIT_AUDIT_MODE", "FULL"),
            ("FINAUDIT_SOURCE_TIMEOUT_MS", "250"),
            ("FINAUDIT_LLM_MODEL", "local-model"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.observability.log_level, "trace");
        assert_eq!(config.audit.mode, AuditMode::Full);
        assert_eq!(config.crosscheck.source_timeout_ms, 250);
        assert_eq!(config.llm.model, "local-model");
    }

    #[test]
    fn test_bad_mode_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides_from(|k| (k == "FINAUDIT_AUDIT_MODE").then(|| "paranoid".to_string()));
        assert_eq!(config.audit.mode, AuditMode::Standard);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.merge.min_agreement = 0.4;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert!((loaded.merge.min_agreement - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_not_found());
    }
}
