//! Tests for the HTTP client module

use super::*;
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::types::BackoffType;
use reqwest::Method;
use std::time::Duration;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpClient {
    let config = HttpClientConfig::builder()
        .base_url(server.uri())
        .retry(RetryPolicy::default().with_backoff(
            BackoffType::Constant,
            Duration::from_millis(1),
            Duration::from_millis(1),
        ))
        .no_rate_limit()
        .build();
    HttpClient::with_config(config).unwrap()
}

#[test]
fn test_http_client_config_default() {
    let config = HttpClientConfig::default();
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.retry.max_retries, 3);
    assert!(config.base_url.is_none());
    assert!(config.rate_limit.is_some());
    assert!(config.user_agent.starts_with("docshift/"));
}

#[test]
fn test_http_client_config_builder() {
    let config = HttpClientConfig::builder()
        .base_url("http://localhost:9200")
        .timeout(Duration::from_secs(60))
        .retry(RetryPolicy::default().with_max_retries(5))
        .header("Authorization", "ApiKey abc")
        .build();

    assert_eq!(config.base_url.as_deref(), Some("http://localhost:9200"));
    assert_eq!(config.timeout, Duration::from_secs(60));
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(
        config.default_headers.get("Authorization"),
        Some(&"ApiKey abc".to_string())
    );
}

#[tokio::test]
async fn test_request_json_with_default_headers_and_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/products/_count"))
        .and(header("Authorization", "ApiKey abc"))
        .and(query_param("ignore_unavailable", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": 12})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .header("Authorization", "ApiKey abc")
        .no_rate_limit()
        .build();
    let client = HttpClient::with_config(config).unwrap();

    let body: serde_json::Value = client
        .request_json(
            Method::POST,
            "/products/_count",
            RequestConfig::new()
                .query("ignore_unavailable", "true")
                .json(serde_json::json!({"query": {"match_all": {}}})),
        )
        .await
        .unwrap();

    assert_eq!(body["count"], 12);
}

#[tokio::test]
async fn test_ndjson_body_sets_content_type() {
    let mock_server = MockServer::start().await;
    let payload = "{\"create\":{\"_id\":\"1\"}}\n{\"a\":1}\n".to_string();

    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .and(body_string(payload.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"errors": false})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let response = client
        .request(Method::POST, "/_bulk", RequestConfig::new().ndjson(payload))
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn test_retries_server_errors_then_gives_up() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let result = client
        .request(Method::GET, "/_cluster/health", RequestConfig::new())
        .await;

    match result {
        Err(Error::HttpStatus { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected 503, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/products/_search"))
        .respond_with(ResponseTemplate::new(400).set_body_string("parsing_exception"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client
        .request(Method::POST, "/products/_search", RequestConfig::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::HttpStatus { status: 400, ref body } if body == "parsing_exception"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_absolute_url_bypasses_base() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/_search/scroll"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url("http://unused.invalid")
        .no_rate_limit()
        .build();
    let client = HttpClient::with_config(config).unwrap();
    client
        .request(
            Method::DELETE,
            &format!("{}/_search/scroll", mock_server.uri()),
            RequestConfig::new(),
        )
        .await
        .unwrap();
}
