use reqwest::StatusCode;

/// Crate-wide result type for Graph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors shared by the token provider, gateway and subscription manager.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The token endpoint rejected the refresh credential.
    #[error("authorization failed: {message}")]
    Auth { message: String },

    /// Connection, timeout or other network-level failure.
    #[error("transport failure: {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// Inbound webhook payload does not have the expected shape.
    #[error("invalid notification payload: {message}")]
    Validation { message: String },

    /// Graph answered with a status the caller did not expect.
    #[error("graph request failed ({status}): {body}")]
    Api { status: StatusCode, body: String },

    /// Configuration is incomplete or malformed.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn auth(message: impl std::fmt::Display) -> Self {
        Self::Auth {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn validation(message: impl std::fmt::Display) -> Self {
        Self::Validation {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            message: message.to_string(),
        }
    }

    /// Whether the error means no authenticated call can succeed until the
    /// refresh credential is replaced.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}
