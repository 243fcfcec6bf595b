//! HTTP adapter tests against a mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use finaudit::crosscheck::snapshot::HttpSnapshotProvider;
use finaudit::crosscheck::RawValue;
use finaudit::{
    ChatBridgeConfig, ChatCompletionBridge, Extractor, FieldName, FreeTextSearch,
    FundamentalsProvider, Pipeline, SearchQuery, SourceError, TextUnderstanding, TrailReason,
};
use finaudit_common::{Config, FundamentalsSourceConfig};

fn completion(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [
            {"index": 0, "message": {"role": "assistant", "content": content}, "finish_reason": "stop"}
        ]
    })
}

fn bridge(server: &MockServer, max_retries: u32) -> ChatCompletionBridge {
    ChatCompletionBridge::new(ChatBridgeConfig {
        endpoint: server.uri(),
        model: "test-model".into(),
        api_key: Some("sk-test".into()),
        timeout: Duration::from_secs(5),
        max_retries,
        retry_backoff: Duration::from_millis(10),
    })
    .unwrap()
}

fn query(field: FieldName) -> SearchQuery {
    SearchQuery {
        subject: "ACME".into(),
        field,
        context: None,
    }
}

// ============================================================================
// Chat bridge
// ============================================================================

#[tokio::test]
async fn test_extraction_through_bridge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            "Sure.\n```json\n{\"total_assets\": 100, \"inventory\": null, \"confidence\": 0.8}\n```",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let capability: Arc<dyn TextUnderstanding> = Arc::new(bridge(&server, 0));
    let record = Extractor::new(capability, Duration::from_secs(5))
        .extract("Total assets: 100", None)
        .await
        .unwrap();

    let assets = record.get(FieldName::TotalAssets);
    assert_eq!(assets.value(), Some(100.0));
    assert_eq!(assets.confidence(), 0.8);
    assert!(record.get(FieldName::Inventory).is_unresolved());
}

#[tokio::test]
async fn test_search_through_bridge() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"value": "1.2B", "justification": "FY2024 10-K"}"#,
        )))
        .mount(&server)
        .await;

    let answer = bridge(&server, 0)
        .search(&query(FieldName::Sales))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer.raw_value, RawValue::Text("1.2B".into()));
    assert_eq!(answer.raw_value.as_number(), Some(1.2e9));
    assert_eq!(answer.justification.as_deref(), Some("FY2024 10-K"));
}

#[tokio::test]
async fn test_search_null_value_is_no_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"value": null, "justification": "not disclosed"}"#,
        )))
        .mount(&server)
        .await;

    let answer = bridge(&server, 0).search(&query(FieldName::Inventory)).await.unwrap();
    assert!(answer.is_none());
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(r#"{"value": 7}"#)))
        .expect(1)
        .mount(&server)
        .await;

    let answer = bridge(&server, 2)
        .search(&query(FieldName::Sales))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(answer.raw_value.as_number(), Some(7.0));
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = bridge(&server, 3)
        .search(&query(FieldName::Sales))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::Auth(_)));
}

#[tokio::test]
async fn test_reply_without_json_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("I cannot help with that.")))
        .mount(&server)
        .await;

    let err = bridge(&server, 0)
        .search(&query(FieldName::Sales))
        .await
        .unwrap_err();
    assert!(matches!(err, SourceError::InvalidResponse(_)));
}

// ============================================================================
// Snapshot provider
// ============================================================================

#[tokio::test]
async fn test_http_snapshot_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ACME"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Sales": "1.5B",
            "Book/sh": "4.00",
            "Shs Outstand": "100M",
            "LT Debt/Eq": "0.50",
            "Income": "-"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/NOPE"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let provider =
        HttpSnapshotProvider::new("snapshot", server.uri(), 0, Duration::from_secs(5)).unwrap();

    assert_eq!(provider.fetch("ACME", FieldName::Sales).await.unwrap(), Some(1.5e9));
    assert_eq!(provider.fetch("ACME", FieldName::LongTermDebt).await.unwrap(), Some(2e8));
    assert_eq!(provider.fetch("ACME", FieldName::NetIncome).await.unwrap(), None);
    assert_eq!(provider.fetch("NOPE", FieldName::Sales).await.unwrap(), None);
}

#[tokio::test]
async fn test_snapshot_server_error_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider =
        HttpSnapshotProvider::new("snapshot", server.uri(), 0, Duration::from_secs(5)).unwrap();
    let err = provider.fetch("ACME", FieldName::Sales).await.unwrap_err();
    assert!(matches!(err, SourceError::Unavailable(_)));
}

#[tokio::test]
async fn test_snapshot_downloaded_once_per_subject() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ACME"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Sales": "1.5B",
            "Income": "200M",
            "Shs Outstand": "100M"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(
        HttpSnapshotProvider::new("snapshot", server.uri(), 0, Duration::from_secs(5)).unwrap(),
    );
    let fields = [FieldName::Sales, FieldName::NetIncome, FieldName::SharesOutstanding];
    let lookups = fields.map(|field| {
        let provider = Arc::clone(&provider);
        tokio::spawn(async move { provider.fetch("ACME", field).await })
    });
    let mut values = Vec::new();
    for lookup in lookups {
        values.push(lookup.await.unwrap().unwrap());
    }
    assert_eq!(values, vec![Some(1.5e9), Some(2e8), Some(1e8)]);
    assert_eq!(provider.fetch("ACME", FieldName::Sales).await.unwrap(), Some(1.5e9));
}

#[tokio::test]
async fn test_snapshot_failure_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ACME"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ACME"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Sales": "10M"})))
        .mount(&server)
        .await;

    let provider =
        HttpSnapshotProvider::new("snapshot", server.uri(), 0, Duration::from_secs(5)).unwrap();
    assert!(provider.fetch("ACME", FieldName::Sales).await.is_err());
    assert_eq!(provider.fetch("ACME", FieldName::Sales).await.unwrap(), Some(1e7));
}

#[tokio::test]
async fn test_snapshot_subject_is_percent_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/quote/BRK%2FB"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Sales": "364B"})))
        .expect(1)
        .mount(&server)
        .await;

    let provider = HttpSnapshotProvider::new(
        "snapshot",
        format!("{}/quote/", server.uri()),
        0,
        Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(provider.fetch("BRK/B", FieldName::Sales).await.unwrap(), Some(3.64e11));
}

#[test]
fn test_snapshot_rejects_bad_endpoint() {
    let err = HttpSnapshotProvider::new("snapshot", "not a url", 0, Duration::from_secs(1))
        .err()
        .unwrap();
    assert!(matches!(err, SourceError::Unavailable(_)));
}

// ============================================================================
// Pipeline from config
// ============================================================================

#[tokio::test]
async fn test_pipeline_from_config_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(
            r#"{"confidence": 0.9, "total_assets": 100, "total_liabilities": 60, "inventory": 10, "current_assets": 5}"#,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/snapshot/ACME"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Sales": "300M"})))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.llm.endpoint = server.uri();
    config.llm.max_retries = 0;
    config.crosscheck.search_enabled = false;
    config.crosscheck.fundamentals.push(FundamentalsSourceConfig {
        name: "snapshot".into(),
        endpoint: format!("{}/snapshot", server.uri()),
        priority: 0,
    });

    let bridge = Arc::new(ChatCompletionBridge::new(ChatBridgeConfig::from(&config)).unwrap());
    let capability: Arc<dyn TextUnderstanding> = bridge.clone();
    let search: Arc<dyn FreeTextSearch> = bridge;
    let pipeline = Pipeline::from_config(&config, capability, Some(search)).unwrap();

    let (record, trail) = pipeline
        .run("ACME", "Total assets: 100, Total liabilities: 60, inventory: 10, current assets: 5")
        .await
        .unwrap();

    // sales was missing; the snapshot is the lone source
    let sales = record.get(FieldName::Sales);
    assert_eq!(sales.value(), Some(3e8));
    assert!(sales.is_verified());
    assert_eq!(sales.source().as_str(), "structured:snapshot");

    let ca = record.get(FieldName::CurrentAssets);
    assert_eq!(ca.value(), Some(5.0));
    assert!(ca.is_unresolved());
    assert_eq!(
        trail.last_for(FieldName::CurrentAssets).map(|e| e.reason),
        Some(TrailReason::ReconciliationViolation)
    );
    assert!(trail.verify_chain());
}

#[tokio::test]
async fn test_slow_first_attempt_retried_within_extraction_bound() {
    let server = MockServer::start().await;
    let payload = completion(
        r#"{"confidence": 0.9, "total_assets": 100, "total_liabilities": 60, "inventory": 10, "current_assets": 50}"#,
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(payload.clone())
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.llm.endpoint = server.uri();
    config.llm.timeout_secs = 1;
    config.llm.max_retries = 1;
    config.llm.retry_backoff_ms = 10;
    config.crosscheck.search_enabled = false;

    let bridge: Arc<dyn TextUnderstanding> =
        Arc::new(ChatCompletionBridge::new(ChatBridgeConfig::from(&config)).unwrap());
    let pipeline = Pipeline::from_config(&config, bridge, None).unwrap();

    let (record, _trail) = pipeline
        .run("ACME", "Total assets: 100")
        .await
        .unwrap();
    assert_eq!(record.value(FieldName::TotalAssets), Some(100.0));
}

#[test]
fn test_bridge_call_budget() {
    let config = ChatBridgeConfig {
        timeout: Duration::from_secs(10),
        max_retries: 2,
        retry_backoff: Duration::from_millis(500),
        ..ChatBridgeConfig::default()
    };
    assert_eq!(config.call_budget(), Duration::from_secs(31));
}
