//! Shared harness for the end-to-end suites: an in-process hub driven
//! through its router, plus the batch builders the scenarios share.

#![allow(dead_code)]

use std::{
    sync::Arc,
    time::Duration,
};

use axum::{
    body::Body,
    Router,
};
use database::{
    DatabaseOptions,
    ScriptHost,
};
use http::{
    Method,
    Request,
    StatusCode,
};
use http_body_util::BodyExt;
use keyvalue::MemoryKeyValue;
use local_backend::{
    make_app,
    router::router,
    LocalAppState,
};
use serde_json::Value as JsonValue;
use tower::ServiceExt;

/// Short lease timeout so the idle-timeout scenario stays fast.
pub const TEST_LEASE_TIMEOUT: Duration = Duration::from_millis(150);

pub struct TestHub {
    pub st: LocalAppState,
    router: Router,
}

pub async fn test_hub() -> TestHub {
    test_hub_with_host(None).await
}

pub async fn test_hub_with_host(script_host: Option<Arc<dyn ScriptHost>>) -> TestHub {
    let kv = Arc::new(MemoryKeyValue::new());
    let st = make_app(
        kv,
        DatabaseOptions {
            fullsync_lease_timeout: TEST_LEASE_TIMEOUT,
        },
        script_host,
    )
    .await
    .unwrap();
    let router = router(st.clone());
    TestHub { st, router }
}

impl TestHub {
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: impl Into<String>,
    ) -> (StatusCode, JsonValue) {
        let mut request = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let request = request.body(Body::from(body.into())).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null)
        };
        (status, json)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, JsonValue) {
        self.request(Method::GET, path, &[], "").await
    }

    pub async fn post(&self, path: &str, body: impl Into<String>) -> (StatusCode, JsonValue) {
        self.request(Method::POST, path, &[], body).await
    }

    pub async fn delete(&self, path: &str) -> (StatusCode, JsonValue) {
        self.request(Method::DELETE, path, &[], "").await
    }
}

/// `[{@context}, {"id": "<from>"}, ..., {"id": "<to>"}]` under the anonymous
/// `http://example.com` namespace, optionally as deletes.
pub fn bananas_from_to(from: u32, to: u32, deleted: bool) -> String {
    let mut items =
        vec![r#"{ "id": "@context", "namespaces": { "_": "http://example.com" } }"#.to_string()];
    for n in from..=to {
        if deleted {
            items.push(format!(r#"{{ "id": "{n}", "deleted": true }}"#));
        } else {
            items.push(format!(r#"{{ "id": "{n}" }}"#));
        }
    }
    format!("[{}]", items.join(","))
}

pub struct BananaRel {
    pub from: u32,
    pub to: Vec<u32>,
}

pub fn banana_relations(rels: &[BananaRel]) -> String {
    let mut items =
        vec![r#"{ "id": "@context", "namespaces": { "_": "http://example.com" } }"#.to_string()];
    for rel in rels {
        let targets: Vec<String> = rel.to.iter().map(|n| format!(r#""{n}""#)).collect();
        items.push(format!(
            r#"{{ "id": "{}", "refs": {{ "link": [{}] }} }}"#,
            rel.from,
            targets.join(",")
        ));
    }
    format!("[{}]", items.join(","))
}

/// Extracts the continuation token from the last element of a page.
pub fn token_of(page: &JsonValue) -> String {
    let items = page.as_array().expect("page is a JSON array");
    let last = items.last().expect("page is nonempty");
    assert_eq!(last["id"], "@continuation");
    last["token"].as_str().expect("token is a string").to_string()
}
