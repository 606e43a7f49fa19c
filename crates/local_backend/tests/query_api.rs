//! End-to-end coverage of `POST /query`: scripted queries through the host
//! boundary, single-id lookups, and relation hops with paging.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use database::{
    QueryEnv,
    ScriptHost,
};
use http::StatusCode;
use serde_json::{
    json,
    Value as JsonValue,
};

use crate::common::{
    banana_relations,
    bananas_from_to,
    test_hub,
    test_hub_with_host,
    BananaRel,
    TestHub,
};

fn rel(from: u32, to: &[u32]) -> BananaRel {
    BananaRel {
        from,
        to: to.to_vec(),
    }
}

async fn query(hub: &TestHub, body: JsonValue) -> (StatusCode, JsonValue) {
    hub.post("/query", body.to_string()).await
}

/// Ids of the neighbor entities in a hop response, in emission order.
fn neighbor_ids(response: &JsonValue) -> Vec<String> {
    response[1]
        .as_array()
        .expect("triples are an array")
        .iter()
        .map(|triple| triple[2]["id"].as_str().expect("neighbor id").to_string())
        .collect()
}

fn continuations(response: &JsonValue) -> JsonValue {
    response[2].clone()
}

/// A stand-in for the embedded scripting runtime: counts a dataset's
/// entities, exercising the host/engine boundary end to end.
struct CountingHost;

#[async_trait]
impl ScriptHost for CountingHost {
    async fn run(
        &self,
        script: Vec<u8>,
        env: Arc<dyn QueryEnv>,
    ) -> anyhow::Result<Vec<JsonValue>> {
        let dataset = String::from_utf8(script)?;
        let entities = env.dataset_entities(dataset.trim()).await?;
        Ok(vec![json!({"bananaCount": entities.len()})])
    }
}

#[tokio::test]
async fn scripted_queries_run_through_the_host() {
    let hub = test_hub_with_host(Some(Arc::new(CountingHost))).await;
    hub.post("/datasets/bananas", "").await;
    hub.post("/datasets/bananas/entities", bananas_from_to(1, 100, false))
        .await;

    let script = base64::encode("bananas");
    let (status, body) = query(&hub, json!({"query": script})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"bananaCount": 100}]));
}

#[tokio::test]
async fn scripted_queries_without_a_host_are_rejected() {
    let hub = test_hub().await;
    let (status, _) = query(&hub, json!({"query": base64::encode("x")})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn single_id_lookup_returns_the_materialized_entity() {
    let hub = test_hub().await;
    hub.post("/datasets/bananas", "").await;
    hub.post("/datasets/bananas/entities", bananas_from_to(1, 20, false))
        .await;

    let (status, body) = query(&hub, json!({"entityId": "ns3:16"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], "@context");
    assert_eq!(body[1]["id"], "ns3:16");
    assert!(body[1]["recorded"].as_u64().unwrap() > 0);

    // Unknown ids yield a bare context.
    let (status, body) = query(&hub, json!({"entityId": "ns3:404"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn outgoing_relations_in_descending_neighbor_order() {
    let hub = test_hub().await;
    hub.post("/datasets/bananas", "").await;
    hub.post(
        "/datasets/bananas/entities",
        banana_relations(&[rel(1, &[2, 3]), rel(2, &[3, 4, 5, 6, 7])]),
    )
    .await;

    let (status, body) = query(
        &hub,
        json!({"startingEntities": ["ns3:2"], "predicate": "*"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        neighbor_ids(&body),
        vec!["ns3:7", "ns3:6", "ns3:5", "ns3:4", "ns3:3"]
    );
    // Every triple names its predicate and starting point.
    assert_eq!(body[1][0][0], "ns3:link");
    assert_eq!(body[1][0][1], "ns3:2");
}

#[tokio::test]
async fn outgoing_relations_page_with_continuations() {
    let hub = test_hub().await;
    hub.post("/datasets/bananas", "").await;
    hub.post(
        "/datasets/bananas/entities",
        banana_relations(&[rel(1, &[2, 3]), rel(2, &[3, 4, 5, 6, 7])]),
    )
    .await;

    let (_, body) = query(
        &hub,
        json!({"startingEntities": ["ns3:2"], "predicate": "*", "limit": 2}),
    )
    .await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:7", "ns3:6"]);

    let (_, body) = query(
        &hub,
        json!({"continuations": continuations(&body), "limit": 2}),
    )
    .await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:5", "ns3:4"]);

    let (_, body) = query(
        &hub,
        json!({"continuations": continuations(&body), "limit": 2}),
    )
    .await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:3"]);
    assert_eq!(
        continuations(&body).as_array().unwrap().len(),
        0,
        "all starts exhausted"
    );
}

#[tokio::test]
async fn inverse_relations_in_ascending_neighbor_order() {
    let hub = test_hub().await;
    hub.post("/datasets/bananas", "").await;
    hub.post(
        "/datasets/bananas/entities",
        banana_relations(&[rel(1, &[2, 3]), rel(2, &[3, 4]), rel(4, &[3, 2, 1])]),
    )
    .await;

    let (status, body) = query(
        &hub,
        json!({"startingEntities": ["ns3:3"], "predicate": "*", "inverse": true}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(neighbor_ids(&body), vec!["ns3:1", "ns3:2", "ns3:4"]);
}

#[tokio::test]
async fn inverse_relation_pages_resume_from_any_continuation() {
    let hub = test_hub().await;
    hub.post("/datasets/bananas", "").await;
    hub.post(
        "/datasets/bananas/entities",
        banana_relations(&[
            rel(1, &[2, 3]),
            rel(2, &[3, 4]),
            rel(3, &[2, 1]),
            rel(4, &[3, 2, 1]),
            rel(5, &[3, 2, 1]),
            rel(6, &[3, 2, 1]),
            rel(7, &[3, 2, 1]),
        ]),
    )
    .await;

    let (_, body) = query(
        &hub,
        json!({
            "startingEntities": ["ns3:3"],
            "predicate": "*",
            "inverse": true,
            "limit": 2
        }),
    )
    .await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:1", "ns3:2"]);
    let saved = continuations(&body);

    let (_, body) = query(&hub, json!({"continuations": saved, "limit": 2})).await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:4", "ns3:5"]);

    let (_, body) = query(
        &hub,
        json!({"continuations": continuations(&body), "limit": 2}),
    )
    .await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:6", "ns3:7"]);

    // Replaying the first continuation with another batch size walks the
    // same tail (P3 for relation cursors).
    let (_, body) = query(&hub, json!({"continuations": saved, "limit": 3})).await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:4", "ns3:5", "ns3:6"]);

    let (_, body) = query(
        &hub,
        json!({"continuations": continuations(&body), "limit": 2}),
    )
    .await;
    assert_eq!(neighbor_ids(&body), vec!["ns3:7"]);
    assert_eq!(continuations(&body).as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unrecognized_query_shapes_are_rejected() {
    let hub = test_hub().await;
    let (status, _) = query(&hub, json!({"somethingElse": true})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
