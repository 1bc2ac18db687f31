//! Authenticated request dispatch.
//!
//! Every call from application code goes through [`Session::dispatch`]:
//!
//! ```text
//! START -> FIRST_ATTEMPT -> status != 401 ------------------------> DONE
//!                        -> 401 -> RENEWING -> token -> RETRY ----> DONE
//!                                           -> none  -----------> DONE (original 401)
//! ```
//!
//! A call is sent at most twice. A 401 that survives the retry, or a failed
//! renewal, is returned as an ordinary response for the caller to inspect.
//! Transport failures are errors and are never retried here.

use futures_util::future::{AbortRegistration, Abortable};
use reqwest::{
    Method, Response, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{AccessToken, Session};

/// One logical request from application code.
///
/// `target` is either a path relative to the session's base URL
/// (`/api/v1/tasks`, with or without the leading slash) or an absolute
/// `http(s)://` URL.
#[derive(Debug, Clone)]
pub struct OutboundCall {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
}

impl OutboundCall {
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    #[must_use]
    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set `Content-Type`.
    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(body))
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request never produced a response (connect failure, timeout, ...).
    #[error("request to {target} failed: {source}")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    /// The call's target cannot be turned into a URL.
    #[error("invalid request target {target:?}: {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request was aborted")]
    Aborted,
}

impl DispatchError {
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Resolve a call target against the base URL.
///
/// Relative targets always resolve from the origin root: a missing leading
/// slash is added, and any path on the base URL is replaced.
pub fn api_url(base: &Url, target: &str) -> Result<Url, url::ParseError> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Url::parse(target);
    }
    base.join(&tally_config::normalize_path(target))
}

impl Session {
    /// Send `call` with the current access token, renewing and retrying once
    /// on 401.
    pub async fn dispatch(&self, call: &OutboundCall) -> Result<Response, DispatchError> {
        let url = self.url_for(call.target())?;
        let inner = self.inner();

        if inner.credentials.is_empty() {
            tracing::debug!(
                endpoint = call.target(),
                "No in-memory token, attempting refresh before request"
            );
            // Best effort: on failure the request goes out unauthenticated.
            inner.renewal.renew().await;
        }

        let token = inner.credentials.read();
        let response = self.send(call, &url, token.as_ref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!(
            endpoint = call.target(),
            "Received 401, attempting refresh and retry"
        );
        let Some(fresh) = inner.renewal.renew().await else {
            tracing::warn!(
                endpoint = call.target(),
                "Refresh failed or returned no token, returning original 401 response"
            );
            return Ok(response);
        };

        tracing::debug!(endpoint = call.target(), "Retrying request with new token");
        let retry = self.send(call, &url, Some(&fresh)).await?;
        tracing::debug!(endpoint = call.target(), status = %retry.status(), "Retry response");
        Ok(retry)
    }

    /// [`dispatch`](Self::dispatch), cancellable through the paired
    /// `AbortHandle`.
    ///
    /// Aborting drops the in-flight request. A renewal the call started keeps
    /// running for any other waiters.
    pub async fn dispatch_abortable(
        &self,
        call: &OutboundCall,
        registration: AbortRegistration,
    ) -> Result<Response, DispatchError> {
        match Abortable::new(self.dispatch(call), registration).await {
            Ok(result) => result,
            Err(_aborted) => {
                tracing::debug!(endpoint = call.target(), "Request aborted by caller");
                Err(DispatchError::Aborted)
            }
        }
    }

    pub(crate) fn url_for(&self, target: &str) -> Result<Url, DispatchError> {
        api_url(self.base_url(), target).map_err(|source| DispatchError::InvalidTarget {
            target: target.to_string(),
            source,
        })
    }

    /// A single transport round trip. No renewal, no retry.
    pub(crate) async fn send(
        &self,
        call: &OutboundCall,
        url: &Url,
        token: Option<&AccessToken>,
    ) -> Result<Response, DispatchError> {
        let mut headers = call.headers().clone();
        if token.is_some() {
            headers.remove(AUTHORIZATION);
        }

        let mut request = self
            .inner()
            .http
            .request(call.method().clone(), url.clone())
            .headers(headers);
        if let Some(token) = token {
            request = request.bearer_auth(token.as_str());
        }
        if let Some(body) = call.body_bytes() {
            request = request.body(body.to_vec());
        }

        tracing::debug!(
            method = %call.method(),
            endpoint = call.target(),
            has_auth = token.is_some(),
            "Performing request"
        );
        request
            .send()
            .await
            .map_err(|source| DispatchError::Transport {
                target: call.target().to_string(),
                source,
            })
    }
}
