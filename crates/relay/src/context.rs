use std::sync::OnceLock;

use {
    secrecy::{ExposeSecret, Secret},
    tracing::warn,
};

/// Process-wide relay state shared by the webhook and the workers.
///
/// The self identity is written once at startup and read without locking
/// afterwards.
pub struct RelayContext {
    client_state: Secret<String>,
    self_identity: OnceLock<String>,
}

impl RelayContext {
    pub fn new(client_state: Secret<String>) -> Self {
        Self {
            client_state,
            self_identity: OnceLock::new(),
        }
    }

    /// Record the relay's own user ID. Returns `false` if one was already set;
    /// the first value wins.
    pub fn set_self_identity(&self, user_id: impl Into<String>) -> bool {
        let user_id = user_id.into();
        match self.self_identity.set(user_id) {
            Ok(()) => true,
            Err(rejected) => {
                warn!(
                    current = self.self_identity().unwrap_or_default(),
                    rejected = %rejected,
                    "self identity already resolved"
                );
                false
            },
        }
    }

    pub fn self_identity(&self) -> Option<&str> {
        self.self_identity.get().map(String::as_str)
    }

    pub fn is_self(&self, user_id: &str) -> bool {
        self.self_identity() == Some(user_id)
    }

    pub fn client_state_matches(&self, candidate: &str) -> bool {
        let expected = self.client_state.expose_secret();
        !expected.is_empty() && expected == candidate
    }
}

impl std::fmt::Debug for RelayContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayContext")
            .field("client_state", &"[REDACTED]")
            .field("self_identity", &self.self_identity())
            .finish()
    }
}
