//! One-time authorization-code flow that yields the refresh token the relay
//! runs on.

use {
    secrecy::{ExposeSecret, Secret},
    url::Url,
};

use crate::{Error, Result, config::GraphConfig, token::token_request};

/// Redirect URI registered for the app by default.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8000/callback";

/// Where to send the user, and the `state` the callback must carry back.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub redirect_uri: String,
}

/// Tokens minted from an authorization code.
pub struct TokenGrant {
    pub access_token: Secret<String>,
    /// Absent when `offline_access` was not granted.
    pub refresh_token: Option<Secret<String>>,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Build the browser URL for a delegated consent prompt.
pub fn authorization_request(
    config: &GraphConfig,
    redirect_uri: &str,
) -> Result<AuthorizationRequest> {
    let state = uuid::Uuid::new_v4().simple().to_string();
    let mut url = Url::parse(&config.authorize_url())
        .map_err(|e| Error::invalid_config(format!("authority url: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", &config.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_mode", "query")
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("state", &state);

    Ok(AuthorizationRequest {
        url: url.to_string(),
        state,
        redirect_uri: redirect_uri.to_string(),
    })
}

/// Exchange an authorization code at the token endpoint.
pub async fn redeem_authorization_code(
    config: &GraphConfig,
    http: &reqwest::Client,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenGrant> {
    let scope = config.scopes.join(" ");
    let form = [
        ("grant_type", "authorization_code"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.expose_secret()),
        ("code", code),
        ("redirect_uri", redirect_uri),
        ("scope", scope.as_str()),
    ];
    let (access_token, refresh_token) =
        token_request(http, &config.token_url(), &form, "authorization code").await?;
    Ok(TokenGrant {
        access_token: Secret::new(access_token),
        refresh_token: refresh_token.map(Secret::new),
    })
}
