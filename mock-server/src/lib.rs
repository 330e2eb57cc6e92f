//! Test server speaking the `{code, message, data}` envelope protocol.
//!
//! Every JSON route answers HTTP 200 with an envelope and signals failures
//! through the business code, except the routes that exist to produce
//! transport-level outcomes (`/status/{code}`, `/empty`, `/slow/{ms}`,
//! `/download`) and unknown task ids, which answer a bare 404.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const DOWNLOAD_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n-envelope-mock-";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub done: bool,
}

#[derive(Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub done: Option<bool>,
}

pub type Tasks = Arc<RwLock<HashMap<Uuid, Task>>>;

/// Wrap `data` in a successful envelope.
pub fn envelope<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "code": 200, "message": "ok", "data": data }))
}

/// A failing envelope with the given business code.
pub fn business_failure(code: i64, message: &str) -> Json<Value> {
    Json(json!({ "code": code, "message": message, "data": null }))
}

pub fn app() -> Router {
    let tasks: Tasks = Arc::new(RwLock::new(HashMap::new()));
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", get(get_task).put(update_task).delete(delete_task))
        .route("/me", get(whoami))
        .route("/echo", get(echo_query).post(echo_body))
        .route("/business/{code}", get(business))
        .route("/status/{code}", get(status))
        .route("/slow/{ms}", get(slow))
        .route("/empty", get(empty))
        .route("/download", get(download))
        .with_state(tasks)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

async fn list_tasks(State(tasks): State<Tasks>) -> Json<Value> {
    let tasks = tasks.read().await;
    let mut all: Vec<Task> = tasks.values().cloned().collect();
    all.sort_by(|a, b| a.title.cmp(&b.title));
    envelope(all)
}

async fn create_task(State(tasks): State<Tasks>, Json(input): Json<NewTask>) -> Json<Value> {
    if input.title.trim().is_empty() {
        return business_failure(10001, "title must not be empty");
    }
    let task = Task {
        id: Uuid::new_v4(),
        title: input.title,
        done: input.done,
    };
    tasks.write().await.insert(task.id, task.clone());
    envelope(task)
}

async fn get_task(
    State(tasks): State<Tasks>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let tasks = tasks.read().await;
    tasks.get(&id).cloned().map(envelope).ok_or(StatusCode::NOT_FOUND)
}

async fn update_task(
    State(tasks): State<Tasks>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Value>, StatusCode> {
    let mut tasks = tasks.write().await;
    let task = tasks.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(title) = patch.title {
        task.title = title;
    }
    if let Some(done) = patch.done {
        task.done = done;
    }
    Ok(envelope(task.clone()))
}

async fn delete_task(
    State(tasks): State<Tasks>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let mut tasks = tasks.write().await;
    tasks
        .remove(&id)
        .map(|_| envelope(Value::Null))
        .ok_or(StatusCode::NOT_FOUND)
}

/// Echo the bearer token, or fail with business code 401 without one.
async fn whoami(headers: HeaderMap) -> Json<Value> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match token {
        Some(token) => envelope(json!({ "token": token })),
        None => business_failure(401, "token expired"),
    }
}

async fn echo_query(Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    envelope(query)
}

async fn echo_body(Json(body): Json<Value>) -> Json<Value> {
    envelope(body)
}

async fn business(Path(code): Path<i64>) -> Json<Value> {
    business_failure(code, "server says no")
}

async fn status(Path(code): Path<u16>) -> Response {
    StatusCode::from_u16(code)
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        .into_response()
}

async fn slow(Path(ms): Path<u64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    envelope(json!({ "slept_ms": ms }))
}

async fn empty() -> StatusCode {
    StatusCode::OK
}

async fn download() -> Response {
    ([(header::CONTENT_TYPE, "application/octet-stream")], DOWNLOAD_BYTES).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wraps_data() {
        let Json(body) = envelope(json!([1, 2]));
        assert_eq!(body["code"], 200);
        assert_eq!(body["data"], json!([1, 2]));
    }

    #[test]
    fn business_failure_has_null_data() {
        let Json(body) = business_failure(403, "forbidden");
        assert_eq!(body["code"], 403);
        assert_eq!(body["message"], "forbidden");
        assert!(body["data"].is_null());
    }

    #[test]
    fn new_task_defaults_done_to_false() {
        let input: NewTask = serde_json::from_str(r#"{"title":"No done field"}"#).unwrap();
        assert!(!input.done);
    }

    #[test]
    fn task_patch_fields_are_optional() {
        let patch: TaskPatch = serde_json::from_str(r#"{"done":true}"#).unwrap();
        assert!(patch.title.is_none());
        assert_eq!(patch.done, Some(true));
    }
}
