use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use wikiforge_api::app::{SweepSettings, build_app, services};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with_stale_after(Duration::from_secs(300)).await
    }

    /// Same router as prod (in-memory store), bound to an ephemeral port.
    async fn spawn_with_stale_after(stale_after: Duration) -> Self {
        let app = build_app(services::build_in_memory_store(), SweepSettings { stale_after });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_job(
    client: &reqwest::Client,
    base_url: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    let res = client
        .post(format!("{}/jobs", base_url))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    res.json().await.unwrap()
}

#[tokio::test]
async fn health_endpoint() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_claim_start_complete_lifecycle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created = create_job(&client, &srv.base_url, json!({"type": "ping", "priority": 5})).await;
    assert_eq!(created["id"], 1);
    assert_eq!(created["status"], "pending");
    assert_eq!(created["priority"], 5);
    assert_eq!(created["retries"], 0);
    assert_eq!(created["max_retries"], 3);
    assert!(created["created_at"].is_string());

    let res = client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["job"]["status"], "claimed");
    assert_eq!(body["job"]["worker_id"], "w1");
    assert!(body["job"]["claimed_at"].is_string());

    let res = client
        .post(format!("{}/jobs/1/start", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let started: serde_json::Value = res.json().await.unwrap();
    assert_eq!(started["status"], "running");
    assert!(started["started_at"].is_string());

    let res = client
        .post(format!("{}/jobs/1/complete", srv.base_url))
        .json(&json!({"result": {"ok": true}}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let done: serde_json::Value = res.json().await.unwrap();
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result"]["ok"], true);
    assert!(done["completed_at"].is_string());
}

#[tokio::test]
async fn fail_is_terminal_when_retries_exhausted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created =
        create_job(&client, &srv.base_url, json!({"type": "ping", "maxRetries": 1})).await;
    let id = created["id"].as_i64().unwrap();

    client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/jobs/{}/start", srv.base_url, id))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/jobs/{}/fail", srv.base_url, id))
        .json(&json!({"error": "boom"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["retried"], false);
    assert_eq!(body["job"]["status"], "failed");
    assert_eq!(body["job"]["error"], "boom");
    assert_eq!(body["job"]["retries"], 1);
    assert!(body["job"]["completed_at"].is_string());
}

#[tokio::test]
async fn fail_requeues_while_retries_remain() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created = create_job(&client, &srv.base_url, json!({"type": "ping"})).await;
    let id = created["id"].as_i64().unwrap();

    client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/jobs/{}/start", srv.base_url, id))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/jobs/{}/fail", srv.base_url, id))
        .json(&json!({"error": "transient"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["retried"], true);
    assert_eq!(body["job"]["status"], "pending");
    assert_eq!(body["job"]["retries"], 1);
    assert_eq!(body["job"]["error"], "transient");
    assert!(body["job"]["worker_id"].is_null());
    assert!(body["job"]["claimed_at"].is_null());
    assert!(body["job"]["started_at"].is_null());
}

#[tokio::test]
async fn fail_requires_an_error_message() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create_job(&client, &srv.base_url, json!({"type": "ping"})).await;
    client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/jobs/1/fail", srv.base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn claim_prefers_higher_priority() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create_job(&client, &srv.base_url, json!({"type": "ping", "priority": 1})).await;
    create_job(&client, &srv.base_url, json!({"type": "ping", "priority": 10})).await;

    let res = client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["job"]["priority"], 10);
}

#[tokio::test]
async fn claim_respects_type_filter() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create_job(&client, &srv.base_url, json!({"type": "a", "priority": 10})).await;
    create_job(&client, &srv.base_url, json!({"type": "b", "priority": 1})).await;

    let res = client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1", "type": "b"}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["job"]["type"], "b");

    // The type-a job was untouched.
    let res = client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1", "type": "b"}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["job"].is_null());
}

#[tokio::test]
async fn claim_requires_worker_id() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "  "}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn claim_on_empty_queue_returns_null() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["job"].is_null());
}

#[tokio::test]
async fn cancel_pending_but_not_running() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create_job(&client, &srv.base_url, json!({"type": "ping"})).await;
    let res = client
        .post(format!("{}/jobs/1/cancel", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");

    create_job(&client, &srv.base_url, json!({"type": "ping"})).await;
    client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{}/jobs/2/start", srv.base_url))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/jobs/2/cancel", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_state_transitions_read_as_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create_job(&client, &srv.base_url, json!({"type": "ping"})).await;

    // Completing a job that isn't running is indistinguishable from an
    // unknown id.
    let res = client
        .post(format!("{}/jobs/1/complete", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(format!("{}/jobs/999/complete", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_job_validation_and_lookup() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/jobs/not-a-number", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .get(format!("{}/jobs/42", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let created = create_job(
        &client,
        &srv.base_url,
        json!({"type": "ping", "params": {"page_id": 3}}),
    )
    .await;
    let res = client
        .get(format!("{}/jobs/{}", srv.base_url, created["id"]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: serde_json::Value = res.json().await.unwrap();
    assert_eq!(job["type"], "ping");
    assert_eq!(job["params"]["page_id"], 3);
}

#[tokio::test]
async fn create_rejects_invalid_payloads() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({"type": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({"type": "ping", "priority": 9999}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!({"priority": 1}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Empty batch.
    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_create_returns_all_jobs() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/jobs", srv.base_url))
        .json(&json!([
            {"type": "verify_citation", "params": {"citation_id": 1}},
            {"type": "regrade_page", "priority": 3},
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["id"], 1);
    assert_eq!(entries[1]["id"], 2);
    assert_eq!(entries[1]["priority"], 3);
}

#[tokio::test]
async fn list_filters_by_status_with_total() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        create_job(&client, &srv.base_url, json!({"type": "ping"})).await;
    }
    client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1"}))
        .send()
        .await
        .unwrap();

    let res = client
        .get(format!("{}/jobs?status=pending&limit=1", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["total"], 2);
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);

    let res = client
        .get(format!("{}/jobs?status=haunted", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_aggregates_by_status_and_type() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    create_job(&client, &srv.base_url, json!({"type": "verify_citation"})).await;
    create_job(&client, &srv.base_url, json!({"type": "verify_citation"})).await;
    create_job(&client, &srv.base_url, json!({"type": "regrade_page"})).await;
    client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "w1", "type": "regrade_page"}))
        .send()
        .await
        .unwrap();

    let res = client
        .get(format!("{}/jobs/stats", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["pending"], 2);
    assert_eq!(stats["claimed"], 1);
    assert!(stats["by_type"].as_array().unwrap().iter().any(|c| {
        c["type"] == "verify_citation" && c["status"] == "pending" && c["count"] == 2
    }));
}

#[tokio::test]
async fn sweep_reclaims_once() {
    // Zero threshold: every claim is immediately considered abandoned.
    let srv = TestServer::spawn_with_stale_after(Duration::ZERO).await;
    let client = reqwest::Client::new();

    create_job(&client, &srv.base_url, json!({"type": "ping"})).await;
    client
        .post(format!("{}/jobs/claim", srv.base_url))
        .json(&json!({"workerId": "doomed"}))
        .send()
        .await
        .unwrap();

    let res = client
        .post(format!("{}/jobs/sweep", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["swept"], 1);
    assert_eq!(body["entries"][0]["type"], "ping");

    let job: serde_json::Value = client
        .get(format!("{}/jobs/1", srv.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["status"], "pending");
    assert!(job["worker_id"].is_null());
    assert_eq!(job["retries"], 0);

    // Nothing left to reclaim.
    let res = client
        .post(format!("{}/jobs/sweep", srv.base_url))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["swept"], 0);
}
