mod common;

use reqwest::Method;
use serde_json::json;

use common::{TestServer, api_client, closed_port_url};
use tokosync_engine::{ConnectivityFlag, Entity, Operation, QueueStatus, RequestOptions};

#[tokio::test]
async fn fetch_returns_json_body_when_online() {
    let srv = TestServer::spawn().await;
    srv.backend.seed("customers", json!({"id": "c1", "name": "Budi"}));
    let api = api_client(&srv.base_url, &ConnectivityFlag::online());

    let resp = api.get("/api/customers/c1").await;
    assert!(resp.is_ok());
    assert!(!resp.offline);
    assert_eq!(resp.data.unwrap()["name"], "Budi");
}

#[tokio::test]
async fn offline_fetch_never_reaches_the_network() {
    let srv = TestServer::spawn().await;
    let api = api_client(&srv.base_url, &ConnectivityFlag::offline());

    let resp = api.fetch("/api/customers", RequestOptions::get()).await;
    assert_eq!(resp.error.as_deref(), Some("Offline"));
    assert!(resp.offline);
    assert!(srv.backend.requests().is_empty());
}

#[tokio::test]
async fn offline_mutations_are_queued_with_original_payload() {
    let srv = TestServer::spawn().await;
    let api = api_client(&srv.base_url, &ConnectivityFlag::offline());

    let body = json!({"id": "c1", "name": "Budi"});
    let resp = api.post("/api/customers", &body).await;
    assert!(resp.offline);
    assert_eq!(resp.data, Some(body.clone()));

    let resp = api.put("/api/customers/c1", &json!({"id": "c1", "name": "Budi S"})).await;
    assert!(resp.offline);

    let pending = api.queue().list_pending().await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].operation, Operation::Create);
    assert_eq!(pending[0].entity, Entity::Customers);
    assert_eq!(pending[0].entity_id.as_str(), "c1");
    assert_eq!(pending[0].data, body);
    assert_eq!(pending[1].operation, Operation::Update);
    assert!(srv.backend.requests().is_empty());
}

#[tokio::test]
async fn http_errors_carry_the_body_message_or_status() {
    let srv = TestServer::spawn().await;
    let api = api_client(&srv.base_url, &ConnectivityFlag::online());

    let resp = api.get("/api/customers/missing").await;
    assert_eq!(resp.error.as_deref(), Some("not found"));
    assert_eq!(resp.status, Some(404));

    let resp = api.get("/no-such-route").await;
    assert_eq!(resp.error.as_deref(), Some("HTTP 404"));

    // A rejected mutation is an answer from the server, not a delivery failure.
    srv.backend.fail_with(Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
    let resp = api.post("/api/customers", &json!({"id": "c1"})).await;
    assert_eq!(resp.error.as_deref(), Some("backend unavailable"));
    assert_eq!(resp.status, Some(500));
    assert!(resp.queued.is_none());
    assert!(api.queue().list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn network_failure_on_mutation_is_queued() {
    let url = closed_port_url().await;
    let flag = ConnectivityFlag::online();
    let api = api_client(&url, &flag);

    let resp = api.post("/api/products", &json!({"id": "p1", "sku": "KOPI-1"})).await;
    assert!(resp.error.is_some());
    assert!(!resp.offline, "flag still reports online");
    let item = api.queue().get(resp.queued.unwrap()).await.unwrap().unwrap();
    assert_eq!(item.operation, Operation::Create);
    assert_eq!(item.entity, Entity::Products);
    assert_eq!(item.status, QueueStatus::Pending);

    // Reads are never queued.
    let resp = api.get("/api/products/p1").await;
    assert!(resp.error.is_some());
    assert!(resp.queued.is_none());
    assert_eq!(api.queue().stats().await.unwrap().total, 1);
}

#[tokio::test]
async fn health_probe_reports_reachability() {
    let srv = TestServer::spawn().await;
    let flag = ConnectivityFlag::offline();
    assert!(api_client(&srv.base_url, &flag).check_connectivity().await);

    let url = closed_port_url().await;
    assert!(!api_client(&url, &flag).check_connectivity().await);
}

#[tokio::test]
async fn bearer_token_is_attached() {
    let srv = TestServer::spawn().await;
    let api = api_client(&srv.base_url, &ConnectivityFlag::online()).with_token("secret");

    let resp = api
        .fetch(
            "/api/customers",
            RequestOptions::with_body(Method::POST, json!({"id": "c1", "name": "Budi"})),
        )
        .await;
    assert!(resp.is_ok());

    let seen = srv.backend.requests();
    assert_eq!(seen[0].auth.as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn delete_with_empty_response_body_succeeds() {
    let srv = TestServer::spawn().await;
    srv.backend.seed("customers", json!({"id": "c1", "name": "Budi"}));
    let api = api_client(&srv.base_url, &ConnectivityFlag::online());

    let resp = api.delete("/api/customers/c1").await;
    assert!(resp.is_ok());
    assert_eq!(resp.data, Some(serde_json::Value::Null));
    assert!(srv.backend.record("customers", "c1").is_none());
}

#[tokio::test]
async fn sync_queue_replays_in_insertion_order() {
    let srv = TestServer::spawn().await;
    let flag = ConnectivityFlag::offline();
    let api = api_client(&srv.base_url, &flag);

    api.post("/api/customers", &json!({"id": "c1", "name": "Budi"})).await;
    api.put("/api/customers/c1", &json!({"id": "c1", "name": "Budi S"})).await;
    api.delete("/api/customers/c1").await;

    flag.set_online();
    let report = api.sync_queue().await.unwrap();
    assert_eq!(report.completed, 3);
    assert!(report.is_clean());
    assert_eq!(
        srv.backend.mutations(),
        [
            "POST /api/customers",
            "PUT /api/customers/c1",
            "DELETE /api/customers/c1"
        ]
    );
    assert!(api.queue().list_all().await.unwrap().is_empty());
}
