//! HTTP-level tests for the SerpAPI client against a local mock server.

use serde_json::json;
use serp_client::{SerpClient, SerpError};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> SerpClient {
    SerpClient::new("test-key".to_string()).with_base_url(server.uri())
}

#[tokio::test]
async fn search_sends_google_params_and_parses_organic_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("engine", "google"))
        .and(query_param("gl", "us"))
        .and(query_param("q", "Acme Inc company overview"))
        .and(query_param("api_key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "organic_results": [
                {"position": 1, "title": "Acme Inc", "link": "https://acme.example", "snippet": "Acme builds rockets"},
                {"position": 2, "title": "Acme on Crunchbase", "link": "https://crunchbase.com/acme", "snippet": "Seed round", "date": "Mar 1, 2024"}
            ]
        })))
        .mount(&server)
        .await;

    let results = client_for(&server)
        .await
        .search("Acme Inc company overview", 5)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].link, "https://acme.example");
    assert_eq!(results[1].date.as_deref(), Some("Mar 1, 2024"));
}

#[tokio::test]
async fn search_truncates_to_requested_count() {
    let server = MockServer::start().await;
    let many: Vec<_> = (0..8)
        .map(|i| json!({"title": format!("r{i}"), "link": format!("https://r{i}.example")}))
        .collect();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "organic_results": many })))
        .mount(&server)
        .await;

    let results = client_for(&server).await.search("anything", 3).await.unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn no_results_message_maps_to_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "Google hasn't returned any results for this query."
        })))
        .mount(&server)
        .await;

    let results = client_for(&server).await.search("zzqx", 5).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn status_429_is_quota_exceeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.search("Acme", 5).await.unwrap_err();
    assert!(matches!(err, SerpError::QuotaExceeded(_)));
}

#[tokio::test]
async fn out_of_searches_body_is_quota_exceeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "Your account has run out of searches."
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.search("Acme", 5).await.unwrap_err();
    assert!(matches!(err, SerpError::QuotaExceeded(_)));
}

#[tokio::test]
async fn server_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;

    match client_for(&server).await.search("Acme", 5).await {
        Err(SerpError::Api { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "upstream down");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.search("Acme", 5).await.unwrap_err();
    assert!(matches!(err, SerpError::Parse(_)));
}
