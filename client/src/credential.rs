//! In-memory slot for the current access token.
//!
//! Nothing here is persisted; dropping the owning [`Session`](crate::Session)
//! discards the token. Reads and writes never block on I/O and the lock is
//! never held across an `.await`.
//!
//! Every write bumps a generation counter. A renewal records the generation
//! when it starts and only stores its token if nothing else (login, logout)
//! wrote in the meantime.

use std::sync::{PoisonError, RwLock};

use crate::AccessToken;

#[derive(Debug, Default)]
pub struct CredentialCell {
    slot: RwLock<Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    token: Option<AccessToken>,
    generation: u64,
}

impl CredentialCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current token, if any.
    #[must_use]
    pub fn read(&self) -> Option<AccessToken> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }

    /// Replace the current value. Last write wins.
    pub fn write(&self, token: Option<AccessToken>) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        slot.token = token;
        slot.generation += 1;
    }

    pub fn clear(&self) {
        self.write(None);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .is_none()
    }

    /// Number of writes so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Store `token` only if no write happened since `generation` was read.
    ///
    /// Returns the token now in the cell: `token` on success, otherwise
    /// whatever the intervening write left.
    pub fn write_if_unchanged(&self, generation: u64, token: AccessToken) -> Option<AccessToken> {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            return slot.token.clone();
        }
        slot.token = Some(token);
        slot.generation += 1;
        slot.token.clone()
    }
}
