//! End-to-end tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port inside the test runtime, then
//! drives the client over real HTTP through `ReqwestTransport`. Validates
//! that envelope unwrapping, status mapping, de-duplication and retry work
//! with an actual network stack underneath.

use std::sync::Arc;
use std::time::Duration;

use envelope_core::{
    messages, Client, ClientConfig, MemorySession, Payload, RecordingNotifier, RequestDescriptor,
    RequestError, RequestOptions, TransportErrorKind,
};
use envelope_core::http::HttpMethod;
use mock_server::{Task, DOWNLOAD_BYTES};
use serde_json::json;

async fn start_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(mock_server::run(listener));
    format!("http://{addr}")
}

fn fast_retry() -> ClientConfig {
    ClientConfig {
        retry_delay: Duration::from_millis(10),
        ..ClientConfig::default()
    }
}

fn client(base_url: &str) -> (Client, Arc<RecordingNotifier>, Arc<MemorySession>) {
    let notices = Arc::new(RecordingNotifier::new());
    let session = Arc::new(MemorySession::new());
    let client = Client::builder(ClientConfig {
        base_url: base_url.to_string(),
        ..fast_retry()
    })
    .notifier(notices.clone())
    .session(session.clone())
    .build()
    .unwrap();
    (client, notices, session)
}

#[tokio::test(flavor = "multi_thread")]
async fn task_lifecycle() {
    let base = start_server().await;
    let (client, notices, _) = client(&base);
    let options = RequestOptions::default;

    // Step 1: list, empty.
    let tasks: Vec<Task> = client.get("/tasks", None, options()).await.unwrap();
    assert!(tasks.is_empty());

    // Step 2: create.
    let created: Task = client
        .post("/tasks", Some(json!({"title": "Integration test"})), options())
        .await
        .unwrap();
    assert_eq!(created.title, "Integration test");
    assert!(!created.done);
    let id = created.id;

    // Step 3: get.
    let fetched: Task = client.get(&format!("/tasks/{id}"), None, options()).await.unwrap();
    assert_eq!(fetched, created);

    // Step 4: update.
    let updated: Task = client
        .put(&format!("/tasks/{id}"), Some(json!({"done": true})), options())
        .await
        .unwrap();
    assert_eq!(updated.title, "Integration test");
    assert!(updated.done);

    // Step 5: delete; the envelope carries null data.
    client
        .delete::<()>(&format!("/tasks/{id}"), None, options())
        .await
        .unwrap();

    // Step 6: get after delete is an HTTP 404 with the mapped notice.
    let err = client
        .get::<Task>(&format!("/tasks/{id}"), None, options())
        .await
        .unwrap_err();
    match err {
        RequestError::HttpStatus { status, message, response } => {
            assert_eq!(status, 404);
            assert_eq!(message, "请求的资源不存在");
            assert_eq!(response.status, 404);
        }
        other => panic!("expected HTTP 404, got {other:?}"),
    }
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(notices.messages(), vec!["请求的资源不存在".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn business_failure_from_server() {
    let base = start_server().await;
    let (client, _, _) = client(&base);

    let err = client
        .post::<Task>("/tasks", Some(json!({"title": " "})), RequestOptions::default())
        .await
        .unwrap_err();

    match err {
        RequestError::Business { code, message, .. } => {
            assert_eq!(code, 10001);
            assert_eq!(message, "title must not be empty");
        }
        other => panic!("expected business failure, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn session_token_round_trips_and_expiry_reloads() {
    let base = start_server().await;
    let (client, _, session) = client(&base);

    session.set_token(Some("abc".to_string()));
    let me: serde_json::Value = client.get("/me", None, RequestOptions::default()).await.unwrap();
    assert_eq!(me["token"], "abc");

    session.set_token(None);
    let err = client
        .get::<serde_json::Value>("/me", None, RequestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Business { code: 401, .. }));
    assert_eq!(session.logouts(), 1);
    assert_eq!(session.reloads(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn query_params_reach_the_server() {
    let base = start_server().await;
    let (client, _, _) = client(&base);

    let echoed: serde_json::Value = client
        .get("/echo", Some(json!({"page": 2, "q": "rust lang"})), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(echoed, json!({"page": "2", "q": "rust lang"}));
}

#[tokio::test(flavor = "multi_thread")]
async fn download_returns_bytes_unchanged() {
    let base = start_server().await;
    let (client, _, _) = client(&base);

    let bytes = client
        .download("/download", None, RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(&bytes[..], DOWNLOAD_BYTES);
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_body_is_rejected() {
    let base = start_server().await;
    let (client, _, _) = client(&base);

    let err = client
        .request(RequestDescriptor::new(HttpMethod::Get, "/empty"))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::EmptyResponse { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_slow_request_is_superseded() {
    let base = start_server().await;
    let (client, _, _) = client(&base);
    let descriptor = RequestDescriptor::new(HttpMethod::Get, "/slow/300")
        .options(RequestOptions::default().prevent_repeat());

    let first = tokio::spawn({
        let client = client.clone();
        let descriptor = descriptor.clone();
        async move { client.request(descriptor).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = client.request(descriptor).await.unwrap();

    assert!(first.await.unwrap().unwrap_err().is_cancelled());
    assert_eq!(second, Payload::Data(json!({"slept_ms": 300})));
    assert!(client.pending().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_is_retried_then_reported() {
    let base = start_server().await;
    let (client, _, _) = client(&base);
    let options = RequestOptions::default()
        .with_timeout(Duration::from_millis(100))
        .with_retry(1);

    let err = client
        .request(RequestDescriptor::new(HttpMethod::Get, "/slow/2000").options(options))
        .await
        .unwrap_err();

    match err {
        RequestError::Transport { attempts, source } => {
            assert_eq!(attempts, 2);
            assert_eq!(source.kind, TransportErrorKind::Timeout);
        }
        other => panic!("expected transport timeout, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_connection_exhausts_default_budget() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let (client, notices, _) = client(&format!("http://{addr}"));

    let err = client
        .request(RequestDescriptor::new(HttpMethod::Get, "/tasks"))
        .await
        .unwrap_err();

    assert!(matches!(err, RequestError::Transport { attempts: 3, .. }));
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(notices.messages(), vec![messages::NETWORK_ERROR.to_string()]);
}
