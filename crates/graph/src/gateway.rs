use std::sync::Arc;

use {
    reqwest::StatusCode,
    secrecy::ExposeSecret,
    serde::{Deserialize, de::DeserializeOwned},
    tracing::{debug, warn},
};

use crate::{Error, Result, token::TokenSource, types::ItemBody};

/// HTTP verbs the relay issues against Graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMethod {
    Get,
    Post,
    Delete,
}

impl ApiMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_reqwest().as_str())
    }
}

/// Raw Graph response: status and body, uninterpreted.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// Turn a non-2xx response into [`Error::Api`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Api {
                status: self.status,
                body: self.body,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
}

/// Authenticated wrapper around the Graph REST surface.
///
/// Asks the token source for a bearer token on every call and never retries.
#[derive(Clone)]
pub struct ApiGateway {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
}

impl ApiGateway {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for `endpoint`. Notification resources come without a
    /// leading slash (`chats('19:x')/messages('1')`).
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    pub async fn call(
        &self,
        method: ApiMethod,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse> {
        let token = self.tokens.access_token().await?;
        let url = self.url_for(endpoint);

        let mut req = self
            .http
            .request(method.as_reqwest(), &url)
            .bearer_auth(token.expose_secret());
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::transport(format!("{method} {endpoint}"), e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::transport(format!("{method} {endpoint} body"), e))?;

        debug!(%method, endpoint, %status, "graph call");
        Ok(ApiResponse { status, body })
    }

    /// Resolve the signed-in user's object ID via `GET /me`.
    pub async fn me(&self) -> Result<String> {
        let resp = self
            .call(ApiMethod::Get, "/me", None)
            .await?
            .error_for_status()?;
        Ok(resp.json::<MeResponse>()?.id)
    }

    /// Post `content` into `chat_id`. The raw response is returned; a non-2xx
    /// status is only logged here.
    pub async fn send_chat_message(
        &self,
        chat_id: &str,
        content: &str,
        content_type: Option<&str>,
    ) -> Result<ApiResponse> {
        let body = ItemBody {
            content_type: content_type.map(ToString::to_string),
            content: Some(content.to_string()),
        };
        let payload = serde_json::json!({ "body": body });
        let resp = self
            .call(
                ApiMethod::Post,
                &format!("/chats/{chat_id}/messages"),
                Some(&payload),
            )
            .await?;
        if !resp.is_success() {
            warn!(chat_id, status = %resp.status, "chat message rejected");
        }
        Ok(resp)
    }
}
