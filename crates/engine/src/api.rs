//! HTTP transport to the backend.
//!
//! Short-circuits while the connectivity oracle reports offline, turns HTTP
//! outcomes into typed results and queues mutating calls that could not reach
//! the server.

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde_json::{Value, json};

use tokosync_core::{Entity, QueueItemId, RecordId};

use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::queue::{Operation, QueueError, SyncQueue};
use crate::replay::{self, SyncReport};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("client is offline")]
    Offline,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// Method and body of a [`ApiClient::fetch`] call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
        }
    }

    pub fn with_body(method: Method, body: Value) -> Self {
        Self {
            method,
            body: Some(body),
        }
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

/// Outcome of a [`ApiClient::fetch`] call.
///
/// Never an `Err`: transport problems are reported in `error`, and an
/// `offline: true` response is not a failure for the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Queue item created for a mutation that could not be delivered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<QueueItemId>,
}

impl ApiResponse {
    fn ok(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn offline() -> Self {
        Self {
            error: Some("Offline".to_string()),
            offline: true,
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Client for the backend REST API.
///
/// Cheap to clone; clones share the HTTP connection pool and the sync queue.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
    connectivity: Arc<dyn Connectivity>,
    queue: SyncQueue,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        connectivity: Arc<dyn Connectivity>,
        queue: SyncQueue,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            http: reqwest::Client::new(),
            connectivity,
            queue,
        }
    }

    pub fn from_config(
        config: &SyncConfig,
        connectivity: Arc<dyn Connectivity>,
        queue: SyncQueue,
    ) -> Self {
        let client = Self::new(config.api_url.clone(), connectivity, queue);
        match &config.auth_token {
            Some(token) => client.with_token(token.clone()),
            None => client,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn connectivity(&self) -> &Arc<dyn Connectivity> {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Check connectivity by hitting the health endpoint.
    ///
    /// Bypasses the offline short-circuit; this is how the flag gets updated.
    pub async fn check_connectivity(&self) -> bool {
        let url = self.url("/health");
        let mut req = self.http.get(&url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                tracing::debug!(error = %err, "health probe failed");
                false
            }
        }
    }

    /// Perform one request and decode the JSON body.
    ///
    /// Never touches the queue. An empty 2xx body decodes as `null`.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        if !self.is_online() {
            return Err(ApiError::Offline);
        }

        let url = self.url(endpoint);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            tracing::debug!(%method, endpoint, status = status.as_u16(), %message, "request rejected");
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Perform a request and describe the outcome as an [`ApiResponse`].
    ///
    /// A mutating call that fails at the network level is queued for replay.
    pub async fn fetch(&self, endpoint: &str, options: RequestOptions) -> ApiResponse {
        let method = options.method;
        let body = options.body;

        match self.request(method.clone(), endpoint, body.as_ref()).await {
            Ok(data) => ApiResponse::ok(data),
            Err(ApiError::Offline) => ApiResponse::offline(),
            Err(ApiError::Http { status, message }) => ApiResponse {
                error: Some(message),
                status: Some(status),
                ..ApiResponse::default()
            },
            Err(err @ ApiError::Network(_)) => {
                let mut resp = ApiResponse::error(err.to_string());
                resp.offline = !self.is_online();
                if let Some(operation) = operation_for(&method) {
                    resp.queued = self.enqueue_for(operation, endpoint, body.as_ref()).await;
                }
                resp
            }
            Err(err) => ApiResponse::error(err.to_string()),
        }
    }

    pub async fn get(&self, endpoint: &str) -> ApiResponse {
        self.fetch(endpoint, RequestOptions::get()).await
    }

    pub async fn post(&self, endpoint: &str, body: &Value) -> ApiResponse {
        self.mutate(Method::POST, endpoint, Some(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: &Value) -> ApiResponse {
        self.mutate(Method::PUT, endpoint, Some(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> ApiResponse {
        self.mutate(Method::DELETE, endpoint, None).await
    }

    /// Replay every pending queue item against the backend.
    pub async fn sync_queue(&self) -> Result<SyncReport, QueueError> {
        replay::drain(self, &self.queue, None).await
    }

    async fn mutate(&self, method: Method, endpoint: &str, body: Option<&Value>) -> ApiResponse {
        if self.is_online() {
            let options = RequestOptions {
                method,
                body: body.cloned(),
            };
            return self.fetch(endpoint, options).await;
        }

        let queued = match operation_for(&method) {
            Some(operation) => self.enqueue_for(operation, endpoint, body).await,
            None => None,
        };
        ApiResponse {
            data: body.cloned(),
            offline: true,
            queued,
            ..ApiResponse::default()
        }
    }

    /// Queue an undelivered mutation. Failures are logged, not returned.
    async fn enqueue_for(
        &self,
        operation: Operation,
        endpoint: &str,
        body: Option<&Value>,
    ) -> Option<QueueItemId> {
        let (entity, path_id) = match Entity::from_endpoint(endpoint) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(endpoint, error = %err, "cannot queue request for a non-entity endpoint");
                return None;
            }
        };

        let body = body.cloned().unwrap_or(Value::Null);
        let entity_id = path_id
            .or_else(|| RecordId::of_record(&body).ok())
            .unwrap_or_else(RecordId::temporary);
        let data = match operation {
            Operation::Delete => json!({ "id": entity_id }),
            Operation::Create | Operation::Update => body,
        };

        match self.queue.enqueue(operation, entity, &entity_id, &data).await {
            Ok(id) => {
                tracing::warn!(%id, %entity, %entity_id, operation = operation.as_str(), "request not delivered; queued for replay");
                Some(id)
            }
            Err(err) => {
                tracing::error!(%entity, %entity_id, error = %err, "failed to queue undelivered request");
                None
            }
        }
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

fn operation_for(method: &Method) -> Option<Operation> {
    match *method {
        Method::POST => Some(Operation::Create),
        Method::PUT | Method::PATCH => Some(Operation::Update),
        Method::DELETE => Some(Operation::Delete),
        _ => None,
    }
}
