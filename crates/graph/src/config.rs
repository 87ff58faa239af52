use secrecy::{ExposeSecret, Secret};

use crate::{Error, Result};

/// Public Graph REST endpoint.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Azure AD authority host used for token issuance.
pub const DEFAULT_AUTHORITY_URL: &str = "https://login.microsoftonline.com";

/// Delegated scopes the relay needs to read and post chat messages.
pub const DEFAULT_SCOPES: &[&str] = &[
    "https://graph.microsoft.com/Chat.ReadWrite",
    "https://graph.microsoft.com/User.Read",
    "offline_access",
];

/// Credentials and endpoints for one delegated Graph identity.
#[derive(Clone)]
pub struct GraphConfig {
    /// Directory (tenant) ID, used as the authority path segment.
    pub tenant_id: String,

    /// Application (client) ID of the app registration.
    pub client_id: String,

    /// Client secret of the app registration.
    pub client_secret: Secret<String>,

    /// Initial refresh token obtained out of band.
    pub refresh_token: Secret<String>,

    /// Authority host, without the tenant segment.
    pub authority_url: String,

    /// Graph REST base, requests are joined onto it.
    pub graph_base_url: String,

    pub scopes: Vec<String>,
}

impl std::fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("authority_url", &self.authority_url)
            .field("graph_base_url", &self.graph_base_url)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl GraphConfig {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        refresh_token: Secret<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret,
            refresh_token,
            ..Self::default()
        }
    }

    /// Full token endpoint URL for this tenant.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    /// Authorization endpoint for this tenant.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.authority_url.trim_end_matches('/'),
            self.tenant_id
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(Error::invalid_config("tenant id is required"));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::invalid_config("client id is required"));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(Error::invalid_config("client secret is required"));
        }
        if self.refresh_token.expose_secret().is_empty() {
            return Err(Error::invalid_config("refresh token is required"));
        }
        url::Url::parse(&self.graph_base_url).map_err(|e| {
            Error::invalid_config(format!("graph base url '{}': {e}", self.graph_base_url))
        })?;
        url::Url::parse(&self.authority_url).map_err(|e| {
            Error::invalid_config(format!("authority url '{}': {e}", self.authority_url))
        })?;
        Ok(())
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: Secret::new(String::new()),
            refresh_token: Secret::new(String::new()),
            authority_url: DEFAULT_AUTHORITY_URL.into(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}
