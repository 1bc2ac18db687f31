//! Shared test utilities and fixtures
//!
//! Mock tracking service plus helpers for building sessions against it.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tally_client::{AccessToken, Session};
use tally_config::{ClientSettings, DEFAULT_REFRESH_PATH};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Start a mock server that simulates the tracking service.
pub async fn start_service_mock() -> MockServer {
    MockServer::start().await
}

pub fn token(value: &str) -> AccessToken {
    AccessToken::new(value).unwrap()
}

/// A session pointed at `server` with an empty credential cell.
pub fn session_for(server: &MockServer) -> Session {
    Session::new(&ClientSettings::new(&server.uri()).unwrap()).unwrap()
}

/// A session pointed at `server` holding `initial`.
pub fn session_with_token(server: &MockServer, initial: &str) -> Session {
    let session = session_for(server);
    session.set_credential(token(initial));
    session
}

/// Refresh endpoint that issues `issued` after `delay`, counting calls.
pub async fn mount_refresh_success(
    server: &MockServer,
    issued: &str,
    delay: Duration,
) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let body = serde_json::json!({ "access_token": issued });
    Mock::given(method("POST"))
        .and(path(DEFAULT_REFRESH_PATH))
        .respond_with(move |_: &wiremock::Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200)
                .set_body_json(body.clone())
                .set_delay(delay)
        })
        .mount(server)
        .await;
    calls
}

/// Refresh endpoint that always rejects, counting calls.
pub async fn mount_refresh_rejected(server: &MockServer) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    Mock::given(method("POST"))
        .and(path(DEFAULT_REFRESH_PATH))
        .respond_with(move |_: &wiremock::Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(401).set_body_json(serde_json::json!({"error": "expired"}))
        })
        .mount(server)
        .await;
    calls
}

/// Protected GET endpoint that only accepts `valid`; anything else is a 401.
pub async fn mount_protected_get(server: &MockServer, route: &str, valid: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(route))
        .and(header("authorization", format!("Bearer {valid}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(2)
        .mount(server)
        .await;
}

/// Number of requests the server saw on `route`.
pub async fn hits(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

/// Authorization header values seen on `route`, in arrival order.
pub async fn auth_headers(server: &MockServer, route: &str) -> Vec<Option<String>> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == route)
        .map(|r| {
            r.headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .collect()
}
