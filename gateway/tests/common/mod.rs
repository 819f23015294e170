//! Shared setup for the HTTP integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use gateway::auth::MemoryNotifier;
use gateway::clock::{ManualClock, SharedClock};
use gateway::config::Config;
use gateway::{router, AppState};

pub const OPERATOR: &str = "ops@nicl.mu";
pub const SECRET: &str = "integration-test-session-key";

pub struct TestApp {
    pub app: axum::Router,
    pub state: Arc<AppState>,
    pub clock: ManualClock,
    pub notifier: Arc<MemoryNotifier>,
    pub root: tempfile::TempDir,
}

/// App over a fresh work root with shell scripts standing in for the
/// Python workers. `tweak` adjusts the config before the state is built.
pub fn setup_with(tweak: impl FnOnce(&mut Config)) -> TestApp {
    let root = tempfile::tempdir().expect("Failed to create temp directory");
    let mut config = Config::local(root.path(), SECRET);
    config.authorized_users = vec![OPERATOR.to_string()];
    config.workers.interpreter = "sh".to_string();
    config.workers.render = "render_worker.sh".to_string();
    config.workers.combine = "combine_worker.sh".to_string();
    config.workers.link_generate = "link_worker.sh".to_string();
    config.workers.email = "email_worker.sh".to_string();
    tweak(&mut config);

    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0).unwrap());
    let shared: SharedClock = Arc::new(clock.clone());
    let notifier = MemoryNotifier::new();
    let state = Arc::new(
        AppState::with_notifier(config, shared, notifier.clone()).expect("Failed to build state"),
    );
    TestApp {
        app: router(Arc::clone(&state)),
        state,
        clock,
        notifier,
        root,
    }
}

pub fn setup() -> TestApp {
    setup_with(|_| {})
}

impl TestApp {
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    /// OTP login for [`OPERATOR`]; returns the bearer token.
    pub async fn login(&self) -> String {
        let (status, _) = self
            .send(post_json("/auth/otp", json!({ "identity": OPERATOR })))
            .await;
        assert_eq!(status, StatusCode::OK);
        let code = self.notifier.last_code(OPERATOR).expect("code delivered");
        let (status, body) = self
            .send(post_json(
                "/auth/otp/verify",
                json!({ "identity": OPERATOR, "code": code }),
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(req).await.expect("Request failed");
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("Invalid JSON response")
        };
        (status, value)
    }

    pub async fn send_raw(&self, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self.app.clone().oneshot(req).await.expect("Request failed");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read body")
            .to_bytes();
        (status, headers, body.to_vec())
    }
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}
