#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use telemost_bridge::{build_router, build_state, AppState, Config};

pub const TEST_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

pub struct TestApp {
    pub _dir: TempDir,
    pub state: Arc<AppState>,
    pub router: Router,
}

/// App backed by a fresh SQLite file. `vars` override the defaults; the
/// Telemost API base points at a closed port unless overridden.
pub fn test_app(vars: &[(&str, &str)]) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("app.db").to_string_lossy().into_owned();

    let mut env: HashMap<String, String> = HashMap::from([
        ("ENCRYPTION_KEY".to_string(), TEST_KEY.to_string()),
        ("DATABASE_URL".to_string(), db_path),
        ("TELEMOST_API_BASE".to_string(), "http://127.0.0.1:9".to_string()),
        ("TELEMOST_TIMEOUT_SECS".to_string(), "2".to_string()),
    ]);
    for (key, value) in vars {
        env.insert(key.to_string(), value.to_string());
    }

    let config = Config::from_lookup(|name| env.get(name).cloned()).unwrap();
    let state = build_state(&config).unwrap();
    let router = build_router(state.clone());

    TestApp { _dir: dir, state, router }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn json(&self, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn form(&self, uri: &str, body: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}
