//! Typed endpoints of the tracking service.
//!
//! Everything except logout goes through [`Session::dispatch`], so expiry is
//! handled transparently. Non-success statuses become [`ApiError::Status`] with
//! the server's `error`/`message` text when the body carries one.

use reqwest::{Response, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;

use tally_types::{
    Account, BrainState, RecommendedTask, SessionUpdate, StartSession, Task, WorkSession,
};

use crate::{DispatchError, OutboundCall, Session};

pub const ACCOUNT_PATH: &str = "/api/v1/account";
pub const LOGOUT_PATH: &str = "/api/v1/account/logout";
pub const TASKS_PATH: &str = "/api/v1/tasks";
pub const ADD_TASK_PATH: &str = "/api/v1/tasks/add";
pub const EDIT_TASK_PATH: &str = "/api/v1/tasks/edit";
pub const RECOMMEND_TASKS_PATH: &str = "/api/v1/tasks/recommend";
pub const START_SESSION_PATH: &str = "/api/v1/start_session";
pub const END_SESSION_PATH: &str = "/api/v1/end_session";
pub const UPDATE_NOTES_PATH: &str = "/api/v1/update_notes";
pub const SESSION_HISTORY_PATH: &str = "/api/v1/session_history";
pub const SESSION_UPDATE_PATH: &str = "/api/v1/session_update";

const MAX_ERROR_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("{message} ({status})")]
    Status { status: StatusCode, message: String },
    #[error("failed to decode response body: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl ApiError {
    /// The request was rejected as unauthorized even after renewal.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

/// Pull a human-readable message out of an error body.
///
/// Recognizes `{"error": "..."}`, `{"error": {"message": "..."}}` and
/// `{"message": "..."}`.
#[must_use]
pub fn extract_error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body.trim()).ok()?;
    payload
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(|message| truncate(message, MAX_ERROR_MESSAGE_CHARS))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

async fn ensure_success(response: Response, fallback: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or_else(|| fallback.to_string());
    tracing::debug!(status = %status, message = %message, "Request rejected");
    Err(ApiError::Status { status, message })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response.json().await.map_err(ApiError::Decode)
}

#[derive(Deserialize)]
struct StartSessionResponse {
    #[serde(default)]
    new_brain_state: Option<BrainState>,
}

impl Session {
    /// Signed-in account, or `None` if the service does not recognize us.
    pub async fn account(&self) -> Result<Option<Account>, ApiError> {
        let response = self.dispatch(&OutboundCall::get(ACCOUNT_PATH)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        let response = ensure_success(response, "Failed to fetch account").await?;
        decode(response).await.map(Some)
    }

    /// Invalidate the refresh credential server-side.
    ///
    /// Sent once with whatever token is in memory; never renews. On
    /// confirmation the in-memory token is cleared, and a renewal still in
    /// flight cannot put a token back. Returns whether the service confirmed.
    pub async fn logout(&self) -> bool {
        let call = OutboundCall::post(LOGOUT_PATH);
        let result = match self.url_for(call.target()) {
            Ok(url) => self.send(&call, &url, self.credential().as_ref()).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(response) if response.status().is_success() => {
                self.clear_credential();
                tracing::info!("Logged out");
                true
            }
            Ok(response) => {
                tracing::warn!(status = %response.status(), "Logout was not confirmed");
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "Logout request failed");
                false
            }
        }
    }

    pub async fn tasks(&self) -> Result<Vec<Task>, ApiError> {
        let response = self.dispatch(&OutboundCall::get(TASKS_PATH)).await?;
        let response = ensure_success(response, "Failed to fetch tasks").await?;
        decode(response).await
    }

    pub async fn add_task(&self, task: &Task) -> Result<(), ApiError> {
        let call = OutboundCall::post(ADD_TASK_PATH).json(task)?;
        let response = self.dispatch(&call).await?;
        ensure_success(response, "Failed to add task").await?;
        Ok(())
    }

    pub async fn edit_task(&self, task: &Task) -> Result<(), ApiError> {
        let call = OutboundCall::post(EDIT_TASK_PATH).json(task)?;
        let response = self.dispatch(&call).await?;
        ensure_success(response, "Failed to edit task").await?;
        Ok(())
    }

    pub async fn recommended_tasks(&self) -> Result<Vec<RecommendedTask>, ApiError> {
        let response = self
            .dispatch(&OutboundCall::get(RECOMMEND_TASKS_PATH))
            .await?;
        let response = ensure_success(response, "Failed to fetch recommended tasks").await?;
        decode(response).await
    }

    /// Start a work session. Returns the new brain state if the service sent one.
    pub async fn start_session(&self, start: &StartSession) -> Result<Option<BrainState>, ApiError> {
        let call = OutboundCall::post(START_SESSION_PATH).json(start)?;
        let response = self.dispatch(&call).await?;
        let response = ensure_success(response, "Failed to start session").await?;
        let body: StartSessionResponse = decode(response).await?;
        Ok(body.new_brain_state)
    }

    pub async fn end_session(&self) -> Result<(), ApiError> {
        let call = OutboundCall::post(END_SESSION_PATH).json(&json!({}))?;
        let response = self.dispatch(&call).await?;
        ensure_success(response, "Failed to end session").await?;
        Ok(())
    }

    /// Replace the notes on the running session. Surrounding whitespace is dropped.
    pub async fn update_notes(&self, notes: &str) -> Result<(), ApiError> {
        let call = OutboundCall::post(UPDATE_NOTES_PATH).json(&json!({ "notes": notes.trim() }))?;
        let response = self.dispatch(&call).await?;
        ensure_success(response, "Failed to update notes").await?;
        Ok(())
    }

    pub async fn session_history(&self) -> Result<Vec<WorkSession>, ApiError> {
        let response = self
            .dispatch(&OutboundCall::get(SESSION_HISTORY_PATH))
            .await?;
        let response = ensure_success(response, "Failed to fetch session history").await?;
        decode(response).await
    }

    pub async fn update_session(&self, update: &SessionUpdate) -> Result<(), ApiError> {
        let call = OutboundCall::post(SESSION_UPDATE_PATH).json(update)?;
        let response = self.dispatch(&call).await?;
        ensure_success(response, "Failed to update session").await?;
        Ok(())
    }
}
