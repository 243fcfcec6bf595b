//! HTTP bridge to an OpenAI-compatible chat-completions endpoint.
//!
//! The same bridge serves as the extraction capability and as a free-text
//! search fallback. Both ask the model for a single JSON object and pull it
//! out of the reply, fenced or not.

use async_trait::async_trait;
use finaudit_common::Config;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::crosscheck::{FreeTextSearch, RawValue, SearchAnswer, SearchQuery};
use crate::error::SourceError;
use crate::extractor::{ExtractionRequest, ExtractionResponse, TextUnderstanding};

/// Longest dossier excerpt sent in one prompt.
const MAX_DOSSIER_CHARS: usize = 60_000;

/// Configuration for the chat bridge.
#[derive(Debug, Clone)]
pub struct ChatBridgeConfig {
    /// Base URL, without the `/v1/chat/completions` path
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Maximum retries for failed requests
    pub max_retries: u32,
    /// Backoff duration between retries
    pub retry_backoff: Duration,
}

impl Default for ChatBridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&Config> for ChatBridgeConfig {
    fn from(config: &Config) -> Self {
        Self {
            endpoint: config.llm.endpoint.clone(),
            model: config.llm.model.clone(),
            api_key: config.llm_api_key(),
            timeout: Duration::from_secs(config.llm.timeout_secs),
            max_retries: config.llm.max_retries,
            retry_backoff: Duration::from_millis(config.llm.retry_backoff_ms),
        }
    }
}

impl ChatBridgeConfig {
    /// Longest a single `extract_fields` or `search` call can take, retries included.
    pub fn call_budget(&self) -> Duration {
        self.timeout.saturating_mul(self.max_retries.saturating_add(1))
            + self.retry_backoff.saturating_mul(self.max_retries)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client implementing the pipeline's text capabilities.
pub struct ChatCompletionBridge {
    config: ChatBridgeConfig,
    client: reqwest::Client,
}

impl ChatCompletionBridge {
    pub fn new(config: ChatBridgeConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Send a prompt with retry logic and return the JSON object in the reply.
    async fn complete_json(&self, system: &str, user: &str) -> Result<Value, SourceError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );

        let mut last_error = None;
        for attempt in 1..=self.config.max_retries + 1 {
            match self.try_complete(&url, system, user).await {
                Ok(content) => {
                    debug!(attempt, "Chat completion successful");
                    let json = extract_json(&content).ok_or_else(|| {
                        SourceError::InvalidResponse("no JSON object in completion".into())
                    })?;
                    return serde_json::from_str(json)
                        .map_err(|e| SourceError::InvalidResponse(e.to_string()));
                }
                Err(e) if e.is_recoverable() => {
                    warn!(
                        attempt,
                        max_attempts = self.config.max_retries + 1,
                        error = %e,
                        "Chat completion failed, retrying..."
                    );
                    last_error = Some(e);
                    if attempt <= self.config.max_retries {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| SourceError::Unavailable("no attempt made".into())))
    }

    async fn try_complete(&self, url: &str, system: &str, user: &str) -> Result<String, SourceError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: serde_json::json!({ "type": "json_object" }),
        };

        let mut builder = self.client.post(url).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| match SourceError::from(e) {
            SourceError::Timeout(_) => SourceError::Timeout(self.config.timeout),
            other => other,
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(format!("HTTP {}", status)));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!("HTTP {} - {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::InvalidResponse(format!("HTTP {} - {}", status, body)));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SourceError::InvalidResponse("completion has no content".into()))
    }
}

/// Extract a JSON object from completion content: a ```json fence first,
/// then the first balanced `{...}`.
pub fn extract_json(content: &str) -> Option<&str> {
    if let Some(start) = content.find("```json") {
        let start = start + 7;
        if let Some(end) = content[start..].find("```") {
            return Some(content[start..start + end].trim());
        }
    }

    let start = content.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in content[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn extraction_prompt(request: &ExtractionRequest) -> String {
    let mut prompt = String::from(
        "Extract the following fields from the financial dossier below. \
         Reply with one JSON object keyed by field name. Each value is a number in \
         absolute units (no K/M/B suffixes) or null when the dossier does not state it; \
         never guess. Add a top-level \"confidence\" between 0 and 1.\n\nFields:\n",
    );
    for field in &request.fields {
        prompt.push_str(&format!("- {}: {}\n", field, field.description()));
    }
    prompt.push_str("\nDossier:\n");
    prompt.push_str(truncate(&request.text, MAX_DOSSIER_CHARS));
    prompt
}

fn search_prompt(query: &SearchQuery) -> String {
    let mut prompt = format!(
        "What is the {} of {}? Report it for the most recent fiscal period in absolute units.",
        query.field.description(),
        query.subject
    );
    if let Some(ref context) = query.context {
        prompt.push_str("\nContext: ");
        prompt.push_str(context);
    }
    prompt.push_str(
        "\nReply with one JSON object {\"value\": number or null, \"justification\": \"short source note\"}.",
    );
    prompt
}

const EXTRACTION_SYSTEM: &str =
    "You are a meticulous financial data extractor. You only report figures present in the text.";

const SEARCH_SYSTEM: &str =
    "You are a financial research assistant. You answer with a single figure and cite where it comes from.";

#[async_trait]
impl TextUnderstanding for ChatCompletionBridge {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn extract_fields(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionResponse, SourceError> {
        let payload = self
            .complete_json(EXTRACTION_SYSTEM, &extraction_prompt(request))
            .await?;
        info!(model = %self.config.model, "Received extraction response");
        Ok(ExtractionResponse { payload })
    }
}

#[async_trait]
impl FreeTextSearch for ChatCompletionBridge {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn search(&self, query: &SearchQuery) -> Result<Option<SearchAnswer>, SourceError> {
        let json = self.complete_json(SEARCH_SYSTEM, &search_prompt(query)).await?;

        let raw_value = match json.get("value") {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) => RawValue::Number(v),
                None => RawValue::Text(n.to_string()),
            },
            Some(Value::String(s)) => RawValue::Text(s.clone()),
            Some(other) => RawValue::Text(other.to_string()),
        };
        let justification = json
            .get("justification")
            .and_then(Value::as_str)
            .map(str::to_string);

        debug!(field = %query.field, subject = %query.subject, "Search answered");
        Ok(Some(SearchAnswer {
            raw_value,
            justification,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldName;

    #[test]
    fn test_extract_json_fenced() {
        let content = "Here you go:\n```json\n{\"sales\": 10}\n```\nDone";
        assert_eq!(extract_json(content), Some("{\"sales\": 10}"));
    }

    #[test]
    fn test_extract_json_raw() {
        let content = "Result: {\"a\": {\"b\": 1}, \"note\": \"uses } inside\"} trailing";
        assert_eq!(
            extract_json(content),
            Some("{\"a\": {\"b\": 1}, \"note\": \"uses } inside\"}")
        );
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{\"open\": 1"), None);
    }

    #[test]
    fn test_prompt_lists_schema() {
        let prompt = extraction_prompt(&ExtractionRequest::new("Total assets: 5"));
        for field in FieldName::ALL {
            assert!(prompt.contains(field.as_str()));
        }
        assert!(prompt.ends_with("Total assets: 5"));
    }

    #[test]
    fn test_search_prompt_includes_context() {
        let prompt = search_prompt(&SearchQuery {
            subject: "ACME".into(),
            field: FieldName::Inventory,
            context: Some("extracted value 5 is suspicious".into()),
        });
        assert!(prompt.contains("ACME"));
        assert!(prompt.contains("extracted value 5"));
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate("ééé", 2), "éé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
