//! HTTP clients against local mock servers.

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use project_harvest::config::{ExtractionConfig, ForumConfig};
use project_harvest::error::{ExtractionError, FetchError, Transient};
use project_harvest::extract::{ChatCompletionClient, CompletionClient, ExtractionEngine};
use project_harvest::fetcher::{HttpItemFetcher, ItemSource};
use project_harvest::harvest::Harvester;
use project_harvest::models::Partition;
use project_harvest::pipeline::{PartitionState, Pipeline, PipelineSettings};
use project_harvest::retry::{CircuitBreaker, RetryPolicy};
use project_harvest::store::PartitionStore;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

// ============ Item API ============

async fn item(Path(file): Path<String>) -> (StatusCode, String) {
    let id = file.trim_end_matches(".json");
    match id {
        "100" => (
            StatusCode::OK,
            json!({"id": 100, "type": "story", "kids": [1, 2, 3]}).to_string(),
        ),
        "1" => (
            StatusCode::OK,
            json!({"id": 1, "by": "alice", "text": "I built Foo, $500/mo", "type": "comment"})
                .to_string(),
        ),
        "2" => (
            StatusCode::OK,
            json!({"id": 2, "deleted": true, "type": "comment"}).to_string(),
        ),
        "3" => (
            StatusCode::OK,
            json!({"id": 3, "by": "bob", "text": "hello", "type": "comment"}).to_string(),
        ),
        "500" => (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string()),
        _ => (StatusCode::OK, "null".to_string()),
    }
}

async fn forum() -> ForumConfig {
    let base = serve(Router::new().route("/v0/item/{file}", get(item))).await;
    ForumConfig {
        api_url: format!("{}/v0", base),
        web_url: base,
        ..Default::default()
    }
}

#[tokio::test]
async fn fetches_and_decodes_item() {
    let fetcher = HttpItemFetcher::new(&forum().await).unwrap();

    let root = fetcher.fetch_item(100).await.unwrap();
    assert_eq!(root.kids, vec![1, 2, 3]);

    let comment = fetcher.fetch_item(1).await.unwrap();
    assert_eq!(comment.by.as_deref(), Some("alice"));
    assert_eq!(comment.body(), Some("I built Foo, $500/mo"));
}

#[tokio::test]
async fn null_body_is_not_found() {
    let fetcher = HttpItemFetcher::new(&forum().await).unwrap();
    let err = fetcher.fetch_item(77).await.unwrap_err();
    assert!(matches!(err, FetchError::NotFound(77)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn server_error_is_transient() {
    let fetcher = HttpItemFetcher::new(&forum().await).unwrap();
    let err = fetcher.fetch_item(500).await.unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }));
    assert!(err.is_transient());
}

// ============ Chat completions ============

const FOO_REPLY: &str = r#"{"name":"Foo","url":"https://foo.io","description":"A tool.","revenue":"$500/mo","stack":["Rust"]}"#;

async fn completions(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-key");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    if body["response_format"]["type"] != "json_object" {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "format"})));
    }

    let user = body["messages"][1]["content"].as_str().unwrap_or_default();
    let content = if user.contains("Foo") {
        FOO_REPLY
    } else {
        r#"{"name": null}"#
    };
    (
        StatusCode::OK,
        Json(json!({"choices": [{"message": {"role": "assistant", "content": content}}]})),
    )
}

async fn rate_limited() -> (StatusCode, &'static str) {
    (StatusCode::TOO_MANY_REQUESTS, "slow down")
}

async fn no_choices() -> Json<Value> {
    Json(json!({"choices": []}))
}

async fn model_api() -> String {
    serve(
        Router::new()
            .route("/ok/chat/completions", post(completions))
            .route("/limited/chat/completions", post(rate_limited))
            .route("/empty/chat/completions", post(no_choices)),
    )
    .await
}

fn extraction(base: String) -> ExtractionConfig {
    ExtractionConfig {
        base_url: Some(base),
        ..Default::default()
    }
}

#[tokio::test]
async fn completion_returns_message_content() {
    let base = model_api().await;
    let client =
        ChatCompletionClient::with_api_key(&extraction(format!("{}/ok", base)), "test-key").unwrap();

    assert_eq!(client.model_name(), "deepseek-chat");
    let content = client.complete("system", "I built Foo").await.unwrap();
    assert_eq!(content, FOO_REPLY);
}

#[tokio::test]
async fn wrong_key_is_permanent_status() {
    let base = model_api().await;
    let client =
        ChatCompletionClient::with_api_key(&extraction(format!("{}/ok", base)), "other").unwrap();

    let err = client.complete("system", "hi").await.unwrap_err();
    assert!(matches!(err, ExtractionError::Status { status: 401, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn rate_limit_is_transient() {
    let base = model_api().await;
    let client =
        ChatCompletionClient::with_api_key(&extraction(format!("{}/limited", base)), "test-key")
            .unwrap();

    let err = client.complete("system", "hi").await.unwrap_err();
    assert!(matches!(err, ExtractionError::Status { status: 429, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn missing_choice_is_empty_reply() {
    let base = model_api().await;
    let client =
        ChatCompletionClient::with_api_key(&extraction(format!("{}/empty", base)), "test-key")
            .unwrap();

    let err = client.complete("system", "hi").await.unwrap_err();
    assert!(matches!(err, ExtractionError::EmptyReply));
}

// ============ Full run over HTTP ============

#[tokio::test]
async fn crawls_partition_over_http() {
    let tmp = TempDir::new().unwrap();
    let forum = forum().await;
    let model_base = model_api().await;

    let breaker = || Arc::new(CircuitBreaker::new("http", 5, Duration::from_secs(30)));
    let harvester = Harvester::new(
        Arc::new(HttpItemFetcher::new(&forum).unwrap()),
        RetryPolicy::none(),
        breaker(),
    );
    let client =
        ChatCompletionClient::with_api_key(&extraction(format!("{}/ok", model_base)), "test-key")
            .unwrap();
    let engine = ExtractionEngine::new(
        Arc::new(client),
        RetryPolicy::none(),
        breaker(),
        "English",
        forum.web_url.clone(),
    );
    let settings = PipelineSettings {
        concurrency: 2,
        pacing: Duration::from_millis(5),
        max_comments: None,
    };
    let pipeline = Pipeline::new(harvester, engine, PartitionStore::new(tmp.path()), settings);

    let summary = pipeline
        .run(&[Partition {
            year: 2024,
            root_id: 100,
        }])
        .await;

    let report = &summary.partitions[0];
    assert_eq!(report.state, PartitionState::Done);
    assert_eq!(report.attempted, 2);
    assert_eq!(report.extracted, 1);

    let store = PartitionStore::new(tmp.path());
    let records = store.load_partition(2024).unwrap().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Foo");
    assert_eq!(records[0].author.as_deref(), Some("alice"));
    assert_eq!(
        records[0].source_discussion_url,
        Some(format!("{}/item?id=1", forum.web_url))
    );
}
