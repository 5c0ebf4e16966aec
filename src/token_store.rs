//! Thread-safe token storage

use crate::types::TokenState;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Holder of the access token, refresh token and access-token expiry
///
/// Every operation is atomic: readers never observe an access token paired
/// with a different write's expiry. Durable implementations (keychain,
/// settings file) implement this same contract.
pub trait TokenStore: Send + Sync + 'static {
    /// Consistent copy of the current state
    fn get(&self) -> TokenState;

    /// Store a full credential set after login or a refresh that rotated the refresh token
    fn set_full(&self, access_token: String, refresh_token: String, expiry_millis: i64);

    /// Replace only the access token and its expiry, keeping the refresh token
    fn set_access_only(&self, access_token: String, expiry_millis: i64);

    /// Drop both tokens and reset the expiry to 0
    fn clear(&self);
}

impl<S: TokenStore + ?Sized> TokenStore for Arc<S> {
    fn get(&self) -> TokenState {
        (**self).get()
    }

    fn set_full(&self, access_token: String, refresh_token: String, expiry_millis: i64) {
        (**self).set_full(access_token, refresh_token, expiry_millis)
    }

    fn set_access_only(&self, access_token: String, expiry_millis: i64) {
        (**self).set_access_only(access_token, expiry_millis)
    }

    fn clear(&self) {
        (**self).clear()
    }
}

/// Process-local token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: RwLock<TokenState>,
}

impl MemoryTokenStore {
    /// Create an empty token store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a previously saved state
    pub fn with_state(state: TokenState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    fn update(&self, f: impl FnOnce(&mut TokenState)) {
        // Updates never panic mid-write, so a poisoned lock still holds a consistent state.
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> TokenState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_full(&self, access_token: String, refresh_token: String, expiry_millis: i64) {
        self.update(|state| {
            state.access_token = Some(access_token);
            // An empty refresh token never replaces a stored one; only clear() drops it.
            if !refresh_token.is_empty() {
                state.refresh_token = Some(refresh_token);
            }
            state.access_expiry_millis = expiry_millis;
        });
        debug!(expiry_millis, "Stored access and refresh tokens");
    }

    fn set_access_only(&self, access_token: String, expiry_millis: i64) {
        self.update(|state| {
            state.access_token = Some(access_token);
            state.access_expiry_millis = expiry_millis;
        });
        debug!(expiry_millis, "Stored access token");
    }

    fn clear(&self) {
        self.update(|state| *state = TokenState::default());
        debug!("Cleared stored tokens");
    }
}
