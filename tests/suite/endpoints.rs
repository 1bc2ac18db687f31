//! Typed endpoints riding through token expiry.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use tally_types::{BrainStatus, StartSession, Task};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{
    mount_protected_get, mount_refresh_rejected, mount_refresh_success, session_for,
    session_with_token, start_service_mock, token,
};

#[tokio::test]
async fn expired_token_is_invisible_to_endpoint_callers() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::ZERO).await;
    mount_protected_get(
        &server,
        "/api/v1/tasks/recommend",
        "tok1",
        json!([{
            "task_name": "writing",
            "desired_effort": 6,
            "current_percent_effort": 50
        }]),
    )
    .await;

    let session = session_with_token(&server, "tok0");
    let recommended = session.recommended_tasks().await.unwrap();

    assert_eq!(recommended.len(), 1);
    assert!((recommended[0].completed_effort() - 3.0).abs() < f64::EPSILON);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn post_body_is_replayed_after_renewal() {
    let server = start_service_mock().await;
    mount_refresh_success(&server, "tok1", Duration::ZERO).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/start_session"))
        .and(header("authorization", "Bearer tok1"))
        .and(body_json(json!({
            "task_name": "reading",
            "end_ts": "2025-03-01T10:00:00Z"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "new_brain_state": {"brain_status": "busy", "streak": 3}
        })))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/start_session"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .with_priority(2)
        .mount(&server)
        .await;

    let end_ts = chrono::DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let session = session_with_token(&server, "tok0");

    let state = session
        .start_session(&StartSession {
            task_name: "reading".into(),
            end_ts,
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.brain_status, BrainStatus::Busy);
    assert_eq!(state.extra.get("streak"), Some(&json!(3)));
}

#[tokio::test]
async fn signed_out_user_sees_no_account() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_rejected(&server).await;
    mount_protected_get(&server, "/api/v1/account", "tok1", json!({"name": "Ada"})).await;

    let session = session_for(&server);

    assert!(session.account().await.unwrap().is_none());
    // Warm start and post-401 renewal.
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn login_message_then_logout() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "unused", Duration::ZERO).await;
    mount_protected_get(&server, "/api/v1/account", "tok7", json!({"email": "ada@example.com"}))
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/account/logout"))
        .and(header("authorization", "Bearer tok7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_for(&server);
    assert!(
        session
            .accept_login_message(r#"{"type":"oauth","access_token":"tok7"}"#)
            .unwrap()
    );
    assert_eq!(session.credential(), Some(token("tok7")));

    let account = session.account().await.unwrap().unwrap();
    assert_eq!(account.email.as_deref(), Some("ada@example.com"));

    assert!(session.logout().await);
    assert!(session.credential().is_none());
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn server_error_message_reaches_caller() {
    let server = start_service_mock().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/tasks/edit"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "No such task"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let session = session_with_token(&server, "tok0");
    let err = session
        .edit_task(&Task::new("missing", 1.0))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "No such task (404 Not Found)");
}
