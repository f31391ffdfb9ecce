//! Instance rotation against local mock Nitter servers.

use nitter_client::{NitterClient, NitterError};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<div class="timeline-item"><div class="tweet-body">
<span class="tweet-date"><a href="/acmeinc/status/7#m" title="Jan 2, 2025 · 10:00 AM UTC">Jan 2</a></span>
<div class="tweet-content">Launching today</div></div></div>"#;

async fn failing_instance(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn falls_through_to_the_next_instance() {
    let broken = failing_instance(502).await;
    let healthy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/acmeinc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(1)
        .mount(&healthy)
        .await;

    let client = NitterClient::new(vec![broken.uri(), healthy.uri()], Duration::from_secs(5));
    let tweets = client.timeline("@acmeinc", 20).await.unwrap();

    assert_eq!(tweets.len(), 1);
    assert_eq!(tweets[0].text, "Launching today");
}

#[tokio::test]
async fn all_instances_failing_is_reported() {
    let a = failing_instance(500).await;
    let b = failing_instance(503).await;

    let client = NitterClient::new(vec![a.uri(), b.uri()], Duration::from_secs(5));
    match client.timeline("acmeinc", 20).await {
        Err(NitterError::AllInstancesFailed { tried, last_error }) => {
            assert_eq!(tried, 2);
            assert!(last_error.contains("503"));
        }
        other => panic!("expected AllInstancesFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_user_is_an_empty_timeline() {
    let a = failing_instance(404).await;
    let b = failing_instance(500).await;

    let client = NitterClient::new(vec![a.uri(), b.uri()], Duration::from_secs(5));
    let tweets = client.timeline("nobody", 20).await.unwrap();
    assert!(tweets.is_empty());
}

#[tokio::test]
async fn no_instances_is_an_error() {
    let client = NitterClient::new(vec![], Duration::from_secs(5));
    assert!(matches!(
        client.timeline("acmeinc", 20).await,
        Err(NitterError::NoInstances)
    ));
}
