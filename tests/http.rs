//! HTTP surface tests.
//!
//! Starts the real router on a free local port and drives it with reqwest.

use mongodb::bson::doc;
use nl2mongo::generator::{StaticGenerator, TextGenerator};
use nl2mongo::server;
use nl2mongo::store::memory::MemoryStore;
use nl2mongo::translate::Translator;
use serde_json::{json, Value};
use std::sync::Arc;

// ─── Helpers ────────────────────────────────────────────────────────

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Spawn a server backed by `generator` and a small users collection.
async fn start_server(generator: Arc<dyn TextGenerator>) -> String {
    let store = Arc::new(MemoryStore::new("app"));
    store
        .seed(
            "users",
            vec![
                doc! { "name": "John", "age": 40 },
                doc! { "name": "Mary", "age": 31 },
            ],
        )
        .unwrap();
    let translator = Arc::new(Translator::new(generator, store));

    let port = find_free_port();
    let bind = format!("127.0.0.1:{}", port);
    tokio::spawn(async move {
        server::run_server(&bind, translator).await.unwrap();
    });
    wait_for_server(port).await;
    format!("http://127.0.0.1:{}", port)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let base = start_server(Arc::new(StaticGenerator::new("db.users.find({})"))).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_query_returns_envelope() {
    let base = start_server(Arc::new(StaticGenerator::new(
        r#"db.users.find({"age": {"$gt": 35}})"#,
    )))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({ "query": "users older than 35" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user_query"], "users older than 35");
    assert_eq!(body["generated_command"], r#"db.users.find({"age": {"$gt": 35}})"#);
    let docs = body["db_result"].as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["name"], "John");
    assert!(docs[0]["_id"]["$oid"].is_string());
}

#[tokio::test]
async fn test_unsupported_operation_is_still_200() {
    let base = start_server(Arc::new(StaticGenerator::new("db.users.unknownOp({})"))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({ "query": "do something odd" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(
        body["db_result"],
        json!({ "error": "Unsupported MongoDB collection operation: unknownOp" })
    );
}

#[tokio::test]
async fn test_missing_query_is_400() {
    let base = start_server(Arc::new(StaticGenerator::new("db.users.find({})"))).await;
    let client = reqwest::Client::new();

    for body in [json!({}), json!({ "query": "" }), json!({ "query": "   " })] {
        let resp = client
            .post(format!("{}/query", base))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "body {}", body);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"]["code"], "missing_query");
    }

    // Not JSON at all
    let resp = client
        .post(format!("{}/query", base))
        .body("show all users")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_generator_failure_is_502() {
    let base = start_server(Arc::new(StaticGenerator::failing("upstream timed out"))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/query", base))
        .json(&json!({ "query": "show all users" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);

    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "translation_failed");
    assert!(err["error"]["message"]
        .as_str()
        .unwrap()
        .contains("upstream timed out"));
}
