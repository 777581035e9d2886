#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde_json::{Value, json};

use tokosync_engine::{
    ApiClient, ConnectivityFlag, DataStore, LocalStore, SyncQueue,
};

/// A request as the fake backend saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub auth: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    records: BTreeMap<(String, String), Value>,
    log: Vec<Recorded>,
    fail_with: Option<StatusCode>,
    next_id: u64,
}

/// In-memory REST backend: `/health` plus `/api/:entity[/:id]` CRUD.
#[derive(Debug, Clone, Default)]
pub struct Backend(Arc<Mutex<Inner>>);

impl Backend {
    /// Make every `/api` request fail with `status` and `{"error": ...}`.
    pub fn fail_with(&self, status: Option<StatusCode>) {
        self.0.lock().unwrap().fail_with = status;
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.0.lock().unwrap().log.clone()
    }

    /// Mutating requests only, as `"POST /api/customers"`.
    pub fn mutations(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != Method::GET)
            .map(|r| format!("{} {}", r.method, r.path))
            .collect()
    }

    pub fn record(&self, entity: &str, id: &str) -> Option<Value> {
        self.0
            .lock()
            .unwrap()
            .records
            .get(&(entity.to_string(), id.to_string()))
            .cloned()
    }

    pub fn seed(&self, entity: &str, value: Value) {
        let id = value["id"].as_str().unwrap().to_string();
        self.0
            .lock()
            .unwrap()
            .records
            .insert((entity.to_string(), id), value);
    }

    fn log(&self, method: Method, path: String, body: Option<Value>, headers: &HeaderMap) -> Option<Response> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut inner = self.0.lock().unwrap();
        inner.log.push(Recorded {
            method,
            path,
            body,
            auth,
        });
        inner.fail_with.map(|status| {
            (status, Json(json!({ "error": "backend unavailable" }))).into_response()
        })
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list(
    State(backend): State<Backend>,
    Path(entity): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = backend.log(Method::GET, format!("/api/{entity}"), None, &headers) {
        return resp;
    }
    let inner = backend.0.lock().unwrap();
    let items: Vec<Value> = inner
        .records
        .iter()
        .filter(|((e, _), _)| *e == entity)
        .map(|(_, v)| v.clone())
        .collect();
    Json(items).into_response()
}

async fn create(
    State(backend): State<Backend>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    if let Some(resp) = backend.log(Method::POST, format!("/api/{entity}"), Some(body.clone()), &headers) {
        return resp;
    }

    let mut inner = backend.0.lock().unwrap();
    let id = match body.get("id").and_then(Value::as_str) {
        Some(id) if !id.starts_with("temp-") => id.to_string(),
        _ => {
            inner.next_id += 1;
            format!("srv-{}", inner.next_id)
        }
    };
    body["id"] = json!(id);
    inner.records.insert((entity, id), body.clone());
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn read(
    State(backend): State<Backend>,
    Path((entity, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = backend.log(Method::GET, format!("/api/{entity}/{id}"), None, &headers) {
        return resp;
    }
    match backend.0.lock().unwrap().records.get(&(entity, id)) {
        Some(v) => Json(v.clone()).into_response(),
        None => not_found(),
    }
}

async fn update(
    State(backend): State<Backend>,
    Path((entity, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Response {
    if let Some(resp) = backend.log(Method::PUT, format!("/api/{entity}/{id}"), Some(body.clone()), &headers) {
        return resp;
    }
    body["id"] = json!(id);
    body["updatedBy"] = json!("server");
    backend
        .0
        .lock()
        .unwrap()
        .records
        .insert((entity, id), body.clone());
    Json(body).into_response()
}

async fn remove(
    State(backend): State<Backend>,
    Path((entity, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = backend.log(Method::DELETE, format!("/api/{entity}/{id}"), None, &headers) {
        return resp;
    }
    backend.0.lock().unwrap().records.remove(&(entity, id));
    StatusCode::NO_CONTENT.into_response()
}

pub struct TestServer {
    pub base_url: String,
    pub backend: Backend,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let backend = Backend::default();
        let app = Router::new()
            .route("/health", get(health))
            .route("/api/:entity", get(list).post(create))
            .route("/api/:entity/:id", get(read).put(update).delete(remove))
            .with_state(backend.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            backend,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Base URL of a port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind ephemeral port");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub fn api_client(base_url: &str, flag: &ConnectivityFlag) -> ApiClient {
    let queue = SyncQueue::new(LocalStore::in_memory());
    ApiClient::new(base_url, Arc::new(flag.clone()), queue)
}

pub fn data_store(base_url: &str, flag: &ConnectivityFlag) -> DataStore {
    DataStore::new(api_client(base_url, flag))
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
