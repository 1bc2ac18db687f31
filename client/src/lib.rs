//! Authenticated HTTP client for the Tally tracking service.
//!
//! # Architecture
//!
//! ```text
//! application code
//!       |
//!       v
//! Session::dispatch ----reads----> CredentialCell
//!       |                               ^
//!       | 401                           | writes (success only)
//!       v                               |
//! RenewalCoordinator::renew ------------+
//!       |
//!       v
//! POST /auth/refresh  (refresh cookie carried by the cookie store)
//! ```
//!
//! - [`credential`] - the in-memory access token slot
//! - [`renewal`] - single-flight token renewal
//! - [`dispatch`] - [`OutboundCall`] and the renew-and-retry-once dispatcher
//! - [`api`] - typed endpoints built on top of dispatch
//!
//! A [`Session`] owns all of the above and is the only place credential state
//! lives. Create one at startup and clone it freely; clones share state.
//!
//! # Error Handling
//!
//! Authorization failures are never errors at the dispatch layer: a 401 that
//! survives renewal is returned as a normal response. Transport failures and
//! malformed call targets surface as [`DispatchError`]. The typed endpoints in
//! [`api`] turn non-success statuses into [`ApiError`].

pub mod api;
pub mod credential;
pub mod dispatch;
pub mod renewal;

pub use api::ApiError;
pub use dispatch::{DispatchError, OutboundCall, api_url};
pub use tally_types::{AccessToken, LoginMessage, LoginMessageError};

use std::sync::Arc;
use std::time::Duration;

use reqwest::{
    cookie::Jar,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use tally_config::{ClientSettings, ConfigError};
use thiserror::Error;
use url::Url;

use crate::{credential::CredentialCell, renewal::RenewalCoordinator};

const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Build the HTTP client used for every request, including renewals.
///
/// The cookie store carries the long-lived refresh credential. If the settings
/// provide a refresh cookie it is seeded for the base URL.
pub fn http_client(settings: &ClientSettings) -> Result<reqwest::Client, reqwest::Error> {
    let jar = Arc::new(Jar::default());
    if let Some(cookie) = &settings.refresh_cookie {
        jar.add_cookie_str(cookie, &settings.base_url);
    }

    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        USER_AGENT,
        HeaderValue::from_static(concat!("tally/", env!("CARGO_PKG_VERSION"))),
    );

    let mut builder = reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .redirect(reqwest::redirect::Policy::none())
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
        .cookie_provider(jar);
    if let Some(timeout) = settings.request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Settings(#[from] ConfigError),
}

/// Process-wide authentication state and the entry point for all requests.
///
/// Lifecycle: created at application start, token set by login or renewal,
/// cleared at logout. Nothing is persisted.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    http: reqwest::Client,
    base_url: Url,
    credentials: Arc<CredentialCell>,
    renewal: RenewalCoordinator,
}

impl Session {
    pub fn new(settings: &ClientSettings) -> Result<Self, SessionError> {
        Ok(Self::with_client(http_client(settings)?, settings)?)
    }

    /// Build a session around an existing client.
    ///
    /// The client must keep a cookie store for renewals to succeed. Fails if
    /// the refresh path cannot be resolved against the base URL.
    pub fn with_client(http: reqwest::Client, settings: &ClientSettings) -> Result<Self, ConfigError> {
        let credentials = Arc::new(CredentialCell::new());
        let refresh_url = settings.refresh_url()?;
        let renewal = RenewalCoordinator::new(http.clone(), refresh_url, Arc::clone(&credentials));

        Ok(Self {
            inner: Arc::new(SessionInner {
                http,
                base_url: settings.base_url.clone(),
                credentials,
                renewal,
            }),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Current access token, if any.
    #[must_use]
    pub fn credential(&self) -> Option<AccessToken> {
        self.inner.credentials.read()
    }

    /// Install a token delivered out of band (e.g. by a login popup).
    pub fn set_credential(&self, token: AccessToken) {
        tracing::debug!("Access token set from login event");
        self.inner.credentials.write(Some(token));
    }

    /// Forget the current token so it is never reused.
    ///
    /// A renewal already in flight will not store its token afterwards; its
    /// waiters receive `None`.
    pub fn clear_credential(&self) {
        tracing::debug!("Access token cleared");
        self.inner.credentials.clear();
    }

    /// Handle a raw login message.
    ///
    /// Returns `Ok(true)` if it carried a token and the token was installed,
    /// `Ok(false)` if the message was not a login.
    pub fn accept_login_message(&self, raw: &str) -> Result<bool, LoginMessageError> {
        match LoginMessage::parse(raw)? {
            Some(message) => {
                self.set_credential(message.into_access_token());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Renew the access token now. Joins an in-flight renewal if there is one.
    pub async fn renew(&self) -> Option<AccessToken> {
        self.inner.renewal.renew().await
    }

    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.inner.renewal.is_renewing()
    }

    fn inner(&self) -> &SessionInner {
        &self.inner
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.inner.base_url.as_str())
            .field("refresh_url", &self.inner.renewal.refresh_url().as_str())
            .field("has_credential", &!self.inner.credentials.is_empty())
            .finish_non_exhaustive()
    }
}
