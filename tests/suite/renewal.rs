//! End-to-end renewal behavior against a mock tracking service.

use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::future::{AbortHandle, join, join_all};
use reqwest::StatusCode;
use tally_client::{DispatchError, OutboundCall};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{
    auth_headers, hits, mount_protected_get, mount_refresh_rejected, mount_refresh_success,
    session_for, session_with_token, start_service_mock, token,
};

const TASKS: &str = "/api/v1/tasks";
const HISTORY: &str = "/api/v1/session_history";

#[tokio::test]
async fn stale_token_concurrent_calls_share_one_refresh() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::from_millis(300)).await;
    mount_protected_get(&server, TASKS, "tok1", serde_json::json!([])).await;
    mount_protected_get(&server, HISTORY, "tok1", serde_json::json!([])).await;

    let session = session_with_token(&server, "tok0");
    let x = OutboundCall::get(TASKS);
    let y = OutboundCall::get(HISTORY);

    let (rx, ry) = join(session.dispatch(&x), session.dispatch(&y)).await;

    assert_eq!(rx.unwrap().status(), StatusCode::OK);
    assert_eq!(ry.unwrap().status(), StatusCode::OK);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        auth_headers(&server, TASKS).await,
        vec![Some("Bearer tok0".into()), Some("Bearer tok1".into())]
    );
    assert_eq!(
        auth_headers(&server, HISTORY).await,
        vec![Some("Bearer tok0".into()), Some("Bearer tok1".into())]
    );
    assert_eq!(session.credential(), Some(token("tok1")));
}

#[tokio::test]
async fn empty_cell_concurrent_warm_starts_share_one_refresh() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::from_millis(200)).await;
    mount_protected_get(&server, TASKS, "tok1", serde_json::json!([])).await;

    let session = session_for(&server);
    let call = OutboundCall::get(TASKS);

    let results = join_all((0..5).map(|_| session.dispatch(&call))).await;

    for result in results {
        assert_eq!(result.unwrap().status(), StatusCode::OK);
    }
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(hits(&server, TASKS).await, 5);
}

#[tokio::test]
async fn rejected_refresh_returns_original_401_and_keeps_token() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_rejected(&server).await;
    mount_protected_get(&server, TASKS, "never-issued", serde_json::json!([])).await;

    let session = session_with_token(&server, "tok0");

    let response = session.dispatch(&OutboundCall::get(TASKS)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(hits(&server, TASKS).await, 1);
    assert_eq!(session.credential(), Some(token("tok0")));
}

#[tokio::test]
async fn valid_token_sends_once_without_refresh() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::ZERO).await;
    mount_protected_get(&server, TASKS, "tok0", serde_json::json!([])).await;

    let session = session_with_token(&server, "tok0");

    let response = session.dispatch(&OutboundCall::get(TASKS)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    assert_eq!(hits(&server, TASKS).await, 1);
}

#[tokio::test]
async fn cleared_credential_warm_starts_next_call() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::ZERO).await;
    mount_protected_get(&server, TASKS, "tok1", serde_json::json!([])).await;

    let session = session_with_token(&server, "tok0");
    session.clear_credential();

    let response = session.dispatch(&OutboundCall::get(TASKS)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        auth_headers(&server, TASKS).await,
        vec![Some("Bearer tok1".into())]
    );
}

#[tokio::test]
async fn renewed_token_is_used_on_next_first_attempt() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::ZERO).await;
    mount_protected_get(&server, TASKS, "tok1", serde_json::json!([])).await;

    let session = session_with_token(&server, "tok0");
    session.dispatch(&OutboundCall::get(TASKS)).await.unwrap();
    session.dispatch(&OutboundCall::get(TASKS)).await.unwrap();

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(
        auth_headers(&server, TASKS).await,
        vec![
            Some("Bearer tok0".into()),
            Some("Bearer tok1".into()),
            Some("Bearer tok1".into()),
        ]
    );
}

#[tokio::test]
async fn later_expiry_starts_a_fresh_renewal() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::ZERO).await;
    mount_protected_get(&server, TASKS, "tok1", serde_json::json!([])).await;

    let session = session_with_token(&server, "tok0");
    session.dispatch(&OutboundCall::get(TASKS)).await.unwrap();

    // Token revoked out of band; the next 401 must trigger a new attempt.
    session.set_credential(token("revoked"));
    let response = session.dispatch(&OutboundCall::get(TASKS)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    assert!(!session.is_renewing());
}

#[tokio::test]
async fn abort_does_not_cancel_shared_renewal() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::from_millis(300)).await;
    mount_protected_get(&server, TASKS, "tok1", serde_json::json!([])).await;

    let session = session_with_token(&server, "tok0");
    let call = OutboundCall::get(TASKS);
    let (abort_handle, registration) = AbortHandle::new_pair();

    let aborted = session.dispatch_abortable(&call, registration);
    let survivor = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        abort_handle.abort();
        session.dispatch(&call).await
    };
    let (aborted, survivor) = join(aborted, survivor).await;

    assert!(matches!(aborted, Err(DispatchError::Aborted)));
    assert_eq!(survivor.unwrap().status(), StatusCode::OK);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_during_renewal_stays_logged_out() {
    let server = start_service_mock().await;
    let refreshes = mount_refresh_success(&server, "tok1", Duration::from_millis(300)).await;
    mount_protected_get(&server, TASKS, "tok1", serde_json::json!([])).await;
    Mock::given(method("POST"))
        .and(path("/api/v1/account/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = session_with_token(&server, "tok0");
    let in_flight = tokio::spawn({
        let session = session.clone();
        async move { session.dispatch(&OutboundCall::get(TASKS)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.is_renewing());
    assert!(session.logout().await);

    let response = in_flight.await.unwrap().unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert!(session.credential().is_none());
    assert_eq!(hits(&server, TASKS).await, 1);
}
