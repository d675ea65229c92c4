//! HTTP API Integration Tests
//!
//! Each test serves the router on an ephemeral port over a fresh store and
//! talks to it with reqwest.

use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use webofdata::{
    http::{create_server_with_page_size, DEFAULT_PAGE_SIZE},
    Store, StoreConfig,
};

async fn spawn_server(dir: &TempDir) -> String {
    spawn_server_with_page_size(dir, DEFAULT_PAGE_SIZE).await
}

async fn spawn_server_with_page_size(dir: &TempDir, page_size: usize) -> String {
    let store = Arc::new(Store::open(StoreConfig::with_path(dir.path())).unwrap());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, create_server_with_page_size(store, page_size)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health_and_info() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir).await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let info: Value = client.get(format!("{}/info", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(info["datasets"], json!(0));
    assert_eq!(info["shard_count"], json!(4));
}

#[tokio::test]
async fn test_dataset_lifecycle() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir).await;
    let client = reqwest::Client::new();

    let created = client
        .post(format!("{}/datasets", base))
        .json(&json!({"name": "people", "entity": {"title": "People"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    assert_eq!(created.headers()["location"], "/datasets/people");

    let duplicate = client
        .post(format!("{}/datasets", base))
        .json(&json!({"name": "people"}))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 400);

    let described: Value =
        client.get(format!("{}/datasets/people", base)).send().await.unwrap().json().await.unwrap();
    assert_eq!(described["entity"]["title"], json!("People"));
    assert_eq!(described["last_sequence"], json!(0));

    let deleted = client.delete(format!("{}/datasets/people", base)).send().await.unwrap();
    assert_eq!(deleted.status(), 200);

    let missing = client.get(format!("{}/datasets/people", base)).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("people"));
}

#[tokio::test]
async fn test_ingest_list_and_follow_changes() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir).await;
    let client = reqwest::Client::new();

    let ingested: Value = client
        .post(format!("{}/datasets/people/entities", base))
        .body(r#"[{"@id":"a","knows":"<b>"},{"@id":"b"},{"@id":"c"}]"#)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ingested["count"], json!(3));

    let listing: Value = client
        .get(format!("{}/datasets/people/entities?take=2", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = listing.as_array().unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[0]["@id"], json!("@context"));
    assert_eq!(items[1]["@id"], json!("ns1:a"));
    assert_eq!(items[3]["@id"], json!("@continuation"));

    let token = items[3]["wod:next-data"].as_str().unwrap().to_string();
    let rest: Value = client
        .get(format!("{}/datasets/people/changes", base))
        .query(&[("token", "-1_2_1")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rest = rest.as_array().unwrap();
    assert_eq!(rest[1]["@id"], json!("ns1:c"));
    assert_eq!(rest.last().unwrap()["wod:next-data"], json!("-1_3_1"));

    let next_page: Value = client
        .get(format!("{}/datasets/people/entities", base))
        .query(&[("token", token.as_str()), ("take", "2")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(next_page.as_array().unwrap().len(), 2);

    let one: Value = client
        .get(format!("{}/datasets/people/entities", base))
        .query(&[("id", "ns1:a")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(one["ns1:knows"], json!("<ns1:b>"));

    let related: Value = client
        .get(format!("{}/related", base))
        .query(&[("id", "ns1:b"), ("inverse", "true")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(related[1]["@id"], json!("ns1:a"));

    let partitions: Vec<String> = client
        .get(format!("{}/datasets/people/changes/partitions", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(partitions, vec!["0_0_1", "1_0_1", "2_0_1", "3_0_1"]);
}

#[tokio::test]
async fn test_listings_without_take_are_paged() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server_with_page_size(&dir, 2).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/datasets/people/entities", base))
        .body(r#"[{"@id":"a"},{"@id":"b"},{"@id":"c"}]"#)
        .send()
        .await
        .unwrap();

    let first: Value = client
        .get(format!("{}/datasets/people/entities", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let first = first.as_array().unwrap();
    assert_eq!(first.len(), 4);
    assert_eq!(first[3]["@id"], json!("@continuation"));

    let token = first[3]["wod:next-data"].as_str().unwrap();
    let second: Value = client
        .get(format!("{}/datasets/people/entities", base))
        .query(&[("token", token)])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let second = second.as_array().unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second[1]["@id"], json!("ns1:c"));

    let changes: Value = client
        .get(format!("{}/datasets/people/changes", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let changes = changes.as_array().unwrap();
    assert_eq!(changes.len(), 4);
    assert_eq!(changes[3]["wod:next-data"], json!("-1_2_1"));
}

#[tokio::test]
async fn test_bad_input_maps_to_client_errors() {
    let dir = TempDir::new().unwrap();
    let base = spawn_server(&dir).await;
    let client = reqwest::Client::new();

    let malformed = client
        .post(format!("{}/datasets/people/entities", base))
        .body(r#"[{"@id":"a"},{"name":"no id"}]"#)
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);

    let unknown = client.get(format!("{}/datasets/nobody/changes", base)).send().await.unwrap();
    assert_eq!(unknown.status(), 404);

    let bad_token = client
        .get(format!("{}/datasets/people/changes?token=nope", base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_token.status(), 400);
}
