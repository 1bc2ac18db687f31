//! Out-of-band login delivery.
//!
//! The OAuth consent flow runs outside this application. When it finishes, the
//! popup (or whatever hosts the flow) posts a small JSON message back:
//!
//! ```json
//! { "type": "oauth", "access_token": "..." }
//! ```
//!
//! Messages of any other `type` are not ours and are ignored.

use serde::Deserialize;
use thiserror::Error;

use crate::{AccessToken, InvalidTokenError};

/// A login event that carries a fresh access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMessage {
    OAuth(AccessToken),
}

#[derive(Debug, Error)]
pub enum LoginMessageError {
    #[error("login message is not a JSON object: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("login message carries an unusable access token: {0}")]
    InvalidToken(#[source] InvalidTokenError),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawMessage {
    Oauth {
        #[serde(default)]
        access_token: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl LoginMessage {
    /// Parse a raw message.
    ///
    /// Returns `Ok(None)` for messages that are well-formed but not a login
    /// (unknown `type`, or an `oauth` message without a token).
    pub fn parse(raw: &str) -> Result<Option<Self>, LoginMessageError> {
        let message: RawMessage = serde_json::from_str(raw).map_err(LoginMessageError::Malformed)?;
        match message {
            RawMessage::Oauth {
                access_token: Some(token),
            } if !token.is_empty() => AccessToken::new(token)
                .map(|token| Some(Self::OAuth(token)))
                .map_err(LoginMessageError::InvalidToken),
            RawMessage::Oauth { .. } | RawMessage::Other => Ok(None),
        }
    }

    #[must_use]
    pub fn into_access_token(self) -> AccessToken {
        match self {
            Self::OAuth(token) => token,
        }
    }
}
