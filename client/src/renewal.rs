//! Single-flight access token renewal.
//!
//! A renewal presents the long-lived refresh cookie (attached by the HTTP
//! client's cookie store) to the issuer and receives a fresh access token:
//!
//! ```text
//! POST /auth/refresh            ->  200 {"access_token": "..."}
//! Content-Type: application/json
//! Cookie: refresh_token=...
//! ```
//!
//! # Single-flight
//!
//! At most one renewal is in flight at a time. The first caller registers the
//! attempt before its request is sent; every caller arriving while it is
//! outstanding awaits the same [`Shared`] outcome instead of issuing another
//! request. The attempt runs on its own task, so a caller that gives up cannot
//! cancel it for the others. Once it resolves the attempt is unregistered, so a
//! failed renewal never blocks a later one.
//!
//! # Outcome
//!
//! - Success writes the new token to the [`CredentialCell`] and yields it,
//!   unless the cell was written while the request was in flight (login or
//!   logout). Then the renewed token is dropped and the cell's current value is
//!   yielded instead, so a logout is never undone by a late renewal.
//! - Any failure (non-2xx, unreadable body, missing `access_token`, transport
//!   error) yields `None` and leaves the cell untouched.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use url::Url;

use crate::{AccessToken, credential::CredentialCell};

type RenewalOutcome = Shared<BoxFuture<'static, Option<AccessToken>>>;

#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    refresh_url: Url,
    credentials: Arc<CredentialCell>,
    pending: Mutex<Option<PendingRenewal>>,
    next_attempt: AtomicU64,
}

struct PendingRenewal {
    attempt: u64,
    outcome: RenewalOutcome,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
}

impl RenewalCoordinator {
    #[must_use]
    pub fn new(http: reqwest::Client, refresh_url: Url, credentials: Arc<CredentialCell>) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                refresh_url,
                credentials,
                pending: Mutex::new(None),
                next_attempt: AtomicU64::new(1),
            }),
        }
    }

    /// Obtain a fresh access token, joining an in-flight renewal if there is one.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn renew(&self) -> Option<AccessToken> {
        self.join_or_start().await
    }

    /// Whether a renewal is currently outstanding.
    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    #[must_use]
    pub fn refresh_url(&self) -> &Url {
        &self.inner.refresh_url
    }

    fn join_or_start(&self) -> RenewalOutcome {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = pending.as_ref() {
            tracing::debug!(
                attempt = existing.attempt,
                "Joining in-flight token renewal"
            );
            return existing.outcome.clone();
        }

        let attempt = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let generation = self.inner.credentials.generation();

        // The task cannot unregister itself until we release `pending`, so the
        // registration below is always observed first.
        let task = tokio::spawn({
            let inner = Arc::clone(&self.inner);
            async move {
                let outcome = match inner.request_token(attempt).await {
                    Some(token) => {
                        let stored = inner
                            .credentials
                            .write_if_unchanged(generation, token.clone());
                        if stored.as_ref() != Some(&token) {
                            tracing::info!(
                                attempt,
                                "Credential changed during renewal, discarding renewed token"
                            );
                        }
                        stored
                    }
                    None => None,
                };
                inner.finish(attempt);
                outcome
            }
        });

        let inner = Arc::clone(&self.inner);
        let outcome = task
            .map(move |joined| match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(attempt, error = %err, "Token renewal task did not complete");
                    inner.finish(attempt);
                    None
                }
            })
            .boxed()
            .shared();

        *pending = Some(PendingRenewal {
            attempt,
            outcome: outcome.clone(),
        });
        outcome
    }
}

impl Inner {
    fn finish(&self, attempt: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_some_and(|p| p.attempt == attempt) {
            *pending = None;
        }
    }

    async fn request_token(&self, attempt: u64) -> Option<AccessToken> {
        tracing::debug!(attempt, url = %self.refresh_url, "Attempting token refresh");

        let response = match self
            .http
            .post(self.refresh_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(attempt, error = %err, "Error refreshing token");
                return None;
            }
        };

        let status = response.status();
        tracing::debug!(attempt, status = %status, "Refresh response");
        if !status.is_success() {
            return None;
        }

        let body: RefreshResponse = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(attempt, error = %err, "Refresh response body was not usable");
                return None;
            }
        };

        match body.access_token.filter(|token| !token.is_empty()) {
            Some(raw) => match AccessToken::new(raw) {
                Ok(token) => {
                    tracing::info!(attempt, "Obtained new access token");
                    Some(token)
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "Refresh returned an unusable access token");
                    None
                }
            },
            None => {
                tracing::warn!(attempt, "Refresh succeeded but no access_token in body");
                None
            }
        }
    }
}
