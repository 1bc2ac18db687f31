//! Core domain types for Tally.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod login;
mod tracking;

pub use login::{LoginMessage, LoginMessageError};
pub use tracking::{
    Account, BrainState, BrainStatus, RecommendedTask, SessionChanges, SessionUpdate,
    StartSession, Task, WorkSession,
};

use std::fmt;

use thiserror::Error;

// ============================================================================
// Access Token
// ============================================================================

/// Short-lived bearer credential attached to authenticated requests.
///
/// The value is opaque: it has no locally verifiable expiry, so validity is only
/// learned by observing server responses. Construction guarantees the token is
/// non-empty and made of visible ASCII, so it can always be placed in an
/// `Authorization` header.
///
/// Note: `Debug` is manually implemented to redact the token value, preventing
/// accidental credential disclosure in logs or error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidTokenError {
    #[error("access token must not be empty")]
    Empty,
    #[error("access token contains a character that is not allowed in an HTTP header")]
    InvalidCharacter,
}

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidTokenError> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidTokenError::Empty);
        }
        if !value.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(InvalidTokenError::InvalidCharacter);
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(<redacted>)")
    }
}
