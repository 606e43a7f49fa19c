//! End-to-end coverage of the dataset endpoints: catalog lifecycle, ingest
//! with change replay, fullsync leases and pagination.

mod common;

use http::{
    Method,
    StatusCode,
};
use serde_json::Value as JsonValue;

use crate::common::{
    bananas_from_to,
    test_hub,
    token_of,
    TestHub,
    TEST_LEASE_TIMEOUT,
};

const DS: &str = "/datasets/bananas";

fn rows(page: &JsonValue) -> &Vec<JsonValue> {
    page.as_array().expect("page is a JSON array")
}

async fn post_sync(
    hub: &TestHub,
    body: String,
    start: bool,
    id: &str,
    end: bool,
) -> StatusCode {
    let mut headers = vec![("universal-data-api-full-sync-id", id)];
    if start {
        headers.push(("universal-data-api-full-sync-start", "true"));
    }
    if end {
        headers.push(("universal-data-api-full-sync-end", "true"));
    }
    let (status, _) = hub
        .request(Method::POST, "/datasets/bananas/entities", &headers, body)
        .await;
    status
}

#[tokio::test]
async fn create_retrieve_list_and_delete_datasets() {
    let hub = test_hub().await;

    let (status, _) = hub.post(DS, "").await;
    assert_eq!(status, StatusCode::OK);

    let (status, entity) = hub.get(DS).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entity["id"], "ns0:bananas");
    assert_eq!(entity["refs"]["ns2:type"], "ns1:dataset");

    // A proxy dataset with an empty remoteUrl is rejected with the literal
    // error body.
    let (status, body) = hub
        .post(
            "/datasets/cucumbers2?proxy=true",
            r#"{"proxyDatasetConfig": {"remoteUrl": ""}}"#,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid proxy configuration provided");

    let (status, _) = hub
        .post(
            "/datasets/cucumbers?proxy=true",
            r#"{"proxyDatasetConfig": {"remoteUrl": "http://localhost:7778/datasets/tomatoes"}}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, entity) = hub.get("/datasets/cucumbers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entity["id"], "ns0:cucumbers");
    assert_eq!(entity["refs"]["ns2:type"], "ns1:proxy-dataset");

    let (status, listed) = hub.get("/datasets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows(&listed).len(), 3, "core.Dataset, bananas, cucumbers");

    let (status, _) = hub.delete("/datasets/cucumbers").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = hub.get("/datasets/cucumbers").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = hub.get("/datasets/pineapples").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ingest_replay_and_deletes() {
    let hub = test_hub().await;
    hub.post(DS, "").await;

    let (status, _) = hub.post("/datasets/bananas/entities", bananas_from_to(1, 10, false)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, page) = hub.get("/datasets/bananas/changes").await;
    assert_eq!(rows(&page).len(), 12, "10 changes plus @context and @continuation");

    // Overlapping batches only append what actually changed.
    hub.post("/datasets/bananas/entities", bananas_from_to(5, 15, false)).await;
    hub.post("/datasets/bananas/entities", bananas_from_to(10, 20, false)).await;
    let (_, page) = hub.get("/datasets/bananas/changes").await;
    assert_eq!(rows(&page).len(), 22, "20 changes plus @context and @continuation");

    // Deletes are recorded as new changes.
    hub.post("/datasets/bananas/entities", bananas_from_to(7, 8, true)).await;
    let (_, page) = hub.get("/datasets/bananas/changes").await;
    let changes = rows(&page);
    assert_eq!(changes.len(), 24);
    assert_eq!(changes[7]["deleted"], JsonValue::Null, "original change 7 is untouched");
    assert_eq!(changes[22]["deleted"], true, "deleted state is a new change at the end");

    let (_, page) = hub.get("/datasets/bananas/entities").await;
    let entities = rows(&page);
    assert_eq!(entities.len(), 22);
    assert_eq!(entities[7]["deleted"], true, "entity 7 is deleted in the view");

    // Malformed batches and unknown datasets are rejected.
    let (status, _) = hub.post("/datasets/bananas/entities", "{\"not\": \"an array\"}").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = hub.post("/datasets/mangos/entities", bananas_from_to(1, 1, false)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fullsync_detects_deletions() {
    let hub = test_hub().await;
    hub.post(DS, "").await;
    hub.post("/datasets/bananas/entities", bananas_from_to(1, 20, false)).await;

    assert_eq!(post_sync(&hub, bananas_from_to(4, 8, false), true, "42", false).await, 200);
    assert_eq!(post_sync(&hub, bananas_from_to(9, 12, false), false, "42", false).await, 200);
    assert_eq!(post_sync(&hub, bananas_from_to(13, 16, false), false, "42", true).await, 200);

    let (_, page) = hub.get("/datasets/bananas/entities").await;
    let entities = rows(&page);
    assert_eq!(entities.len(), 22);
    for entity in &entities[1..4] {
        assert_eq!(entity["deleted"], true, "{} was not in the sync", entity["id"]);
    }
    for entity in &entities[4..17] {
        assert_eq!(entity["deleted"], JsonValue::Null, "{} was in the sync", entity["id"]);
    }
    for entity in &entities[17..21] {
        assert_eq!(entity["deleted"], true, "{} was not in the sync", entity["id"]);
    }

    // 20 initial changes, unchanged resends deduped, 7 deletions.
    let (_, page) = hub.get("/datasets/bananas/changes").await;
    assert_eq!(rows(&page).len(), 29);
}

#[tokio::test]
async fn fullsync_lease_conflicts() {
    let hub = test_hub().await;
    hub.post(DS, "").await;

    assert_eq!(post_sync(&hub, bananas_from_to(4, 4, false), true, "43", false).await, 200);

    // A different sync id and plain traffic are both locked out.
    assert_eq!(
        post_sync(&hub, bananas_from_to(5, 5, false), false, "44", false).await,
        StatusCode::CONFLICT
    );
    let (status, _) = hub
        .post("/datasets/bananas/entities", bananas_from_to(5, 5, false))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    for n in 6..16 {
        assert_eq!(post_sync(&hub, bananas_from_to(n, n, false), false, "43", false).await, 200);
    }
    assert_eq!(post_sync(&hub, bananas_from_to(16, 16, false), false, "43", true).await, 200);

    // The locked-out updates never became changes, so id 5 is absent.
    let (_, page) = hub.get("/datasets/bananas/entities").await;
    let five = rows(&page).iter().find(|e| e["id"] == "ns3:5");
    assert!(five.is_none(), "id 5 was rejected during the sync");
}

#[tokio::test]
async fn fullsync_abandoned_by_new_start() {
    let hub = test_hub().await;
    hub.post(DS, "").await;

    assert_eq!(post_sync(&hub, bananas_from_to(1, 1, false), true, "45", false).await, 200);
    assert_eq!(post_sync(&hub, bananas_from_to(1, 1, false), true, "46", false).await, 200);
    assert_eq!(
        post_sync(&hub, bananas_from_to(2, 2, false), false, "45", false).await,
        StatusCode::CONFLICT,
        "sync 45 is not active anymore"
    );
    assert_eq!(
        post_sync(&hub, bananas_from_to(16, 16, false), false, "46", true).await,
        200,
        "sync 46 accepts requests"
    );
}

#[tokio::test]
async fn fullsync_lease_times_out() {
    let hub = test_hub().await;
    hub.post(DS, "").await;

    assert_eq!(post_sync(&hub, bananas_from_to(1, 1, false), true, "47", false).await, 200);
    tokio::time::sleep(TEST_LEASE_TIMEOUT + TEST_LEASE_TIMEOUT / 2).await;

    // Appends are still admitted after the idle timeout...
    assert_eq!(post_sync(&hub, bananas_from_to(2, 2, false), false, "47", false).await, 200);
    // ...but the end signal finds the lease expired.
    assert_eq!(
        post_sync(&hub, bananas_from_to(3, 3, false), false, "47", true).await,
        StatusCode::GONE
    );
}

#[tokio::test]
async fn entities_paginate_with_continuation_tokens() {
    let hub = test_hub().await;
    hub.post(DS, "").await;
    hub.post("/datasets/bananas/entities", bananas_from_to(1, 100, false)).await;

    let (status, page) = hub.get("/datasets/bananas/entities?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows(&page).len(), 12);
    assert_eq!(page[1]["id"], "ns3:1");
    let token = token_of(&page);

    let (_, page) = hub
        .get(&format!(
            "/datasets/bananas/entities?limit=90&from={}",
            urlencode(&token)
        ))
        .await;
    assert_eq!(rows(&page).len(), 92);
    assert_eq!(page[1]["id"], "ns3:11");
    let token = token_of(&page);

    // All consumed: a context and a fresh continuation, nothing else.
    let (_, page) = hub
        .get(&format!(
            "/datasets/bananas/entities?limit=10&from={}",
            urlencode(&token)
        ))
        .await;
    assert_eq!(rows(&page).len(), 2);
    assert_eq!(page[1]["id"], "@continuation");
}

/// Minimal percent-encoding for base64 tokens in query strings.
fn urlencode(token: &str) -> String {
    token
        .replace('%', "%25")
        .replace('+', "%2B")
        .replace('/', "%2F")
        .replace('=', "%3D")
}
