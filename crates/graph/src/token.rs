//! Delegated access tokens minted from a rotating refresh token.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::Deserialize,
    tokio::sync::Mutex,
    tracing::{debug, info, warn},
};

use crate::{Error, Result, config::GraphConfig};

#[cfg(feature = "metrics")]
const REFRESH_TOTAL: &str = "teamsmirror_token_refresh_total";
#[cfg(feature = "metrics")]
const REFRESH_FAILURES_TOTAL: &str = "teamsmirror_token_refresh_failures_total";

/// Anything able to hand out a bearer token for the next Graph call.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<Secret<String>>;
}

/// Fixed token, for tests and for tooling that already holds one.
pub struct StaticToken(Secret<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Secret::new(token.into()))
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<Secret<String>> {
        Ok(self.0.clone())
    }
}

struct Credential {
    refresh_token: Secret<String>,
    access_token: Option<Secret<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Refresh-token based provider.
///
/// Every acquisition performs a refresh, except when another caller's refresh
/// completed while this caller was waiting for the lock: the refresh token may
/// be single-use, so overlapping callers share one refresh instead of racing.
///
/// The refresh itself runs on its own task holding the credential lock, so a
/// caller that is dropped mid-refresh (a worker timeout, say) cannot lose the
/// rotated refresh token the endpoint already issued.
pub struct TokenProvider {
    config: Arc<GraphConfig>,
    http: reqwest::Client,
    credential: Arc<Mutex<Credential>>,
    completed_refreshes: Arc<AtomicU64>,
}

impl TokenProvider {
    pub fn new(config: GraphConfig, http: reqwest::Client) -> Self {
        let credential = Credential {
            refresh_token: config.refresh_token.clone(),
            access_token: None,
        };
        Self {
            config: Arc::new(config),
            http,
            credential: Arc::new(Mutex::new(credential)),
            completed_refreshes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn acquire_token(&self) -> Result<Secret<String>> {
        let seen = self.completed_refreshes.load(Ordering::Acquire);
        let mut credential = Arc::clone(&self.credential).lock_owned().await;

        if self.completed_refreshes.load(Ordering::Acquire) != seen
            && let Some(token) = credential.access_token.as_ref()
        {
            debug!("reusing access token from a refresh that completed while waiting");
            return Ok(token.clone());
        }

        let config = Arc::clone(&self.config);
        let http = self.http.clone();
        let completed = Arc::clone(&self.completed_refreshes);
        let task = tokio::spawn(async move {
            let (access_token, rotated) =
                match refresh(&http, &config, &credential.refresh_token).await {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        #[cfg(feature = "metrics")]
                        metrics::counter!(REFRESH_FAILURES_TOTAL).increment(1);
                        return Err(e);
                    },
                };

            let access_token = Secret::new(access_token);
            if let Some(rotated) = rotated {
                credential.refresh_token = Secret::new(rotated);
                info!("refresh token rotated");
            }
            credential.access_token = Some(access_token.clone());
            completed.fetch_add(1, Ordering::AcqRel);

            #[cfg(feature = "metrics")]
            metrics::counter!(REFRESH_TOTAL).increment(1);

            Ok(access_token)
        });

        task.await.map_err(|e| Error::auth(format!("token refresh task failed: {e}")))?
    }

    /// Number of refreshes that succeeded since construction.
    pub fn refresh_count(&self) -> u64 {
        self.completed_refreshes.load(Ordering::Acquire)
    }

    /// The refresh token the next refresh will present.
    pub async fn current_refresh_token(&self) -> Secret<String> {
        self.credential.lock().await.refresh_token.clone()
    }
}

/// Returns `(access_token, rotated_refresh_token)`.
async fn refresh(
    http: &reqwest::Client,
    config: &GraphConfig,
    refresh_token: &Secret<String>,
) -> Result<(String, Option<String>)> {
    let scope = config.scopes.join(" ");
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.expose_secret()),
        ("refresh_token", refresh_token.expose_secret()),
        ("scope", scope.as_str()),
    ];
    token_request(http, &config.token_url(), &form, "token refresh").await
}

/// POST `form` to the token endpoint and pull out
/// `(access_token, refresh_token)`.
///
/// 5xx is [`Error::Api`]; any other rejection, or a success without an
/// access token, is [`Error::Auth`].
pub(crate) async fn token_request(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
    context: &str,
) -> Result<(String, Option<String>)> {
    let resp = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::transport(context, e))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| Error::transport(format!("{context} body"), e))?;

    if status.is_server_error() {
        warn!(%status, context, "token endpoint unavailable");
        return Err(Error::Api { status, body });
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| Error::auth(format!("unreadable token response ({status}): {e}")))?;

    if !status.is_success() {
        let code = parsed.error.as_deref().unwrap_or("unknown_error");
        let description = parsed.error_description.as_deref().unwrap_or_default();
        warn!(%status, code, context, "token request rejected");
        return Err(Error::auth(format!("{code}: {description}")));
    }

    let access_token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::auth("token response carried no access_token"))?;
    Ok((access_token, parsed.refresh_token.filter(|t| !t.is_empty())))
}

#[async_trait]
impl TokenSource for TokenProvider {
    async fn access_token(&self) -> Result<Secret<String>> {
        self.acquire_token().await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use axum::{Router, extract::Form, http::StatusCode, routing::post};

    async fn start_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn provider(authority: String) -> TokenProvider {
        let mut config = GraphConfig::new(
            "tenant-1",
            "client-1",
            Secret::new("secret".into()),
            Secret::new("rt-0".into()),
        );
        config.authority_url = authority;
        TokenProvider::new(config, reqwest::Client::new())
    }

    #[tokio::test]
    async fn rotates_refresh_token_on_each_refresh() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen_in_handler = Arc::clone(&seen);
        let app = Router::new().route(
            "/tenant-1/oauth2/v2.0/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let seen = Arc::clone(&seen_in_handler);
                async move {
                    let mut seen = seen.lock().unwrap();
                    seen.push(form["refresh_token"].clone());
                    let n = seen.len();
                    axum::Json(serde_json::json!({
                        "access_token": format!("at-{n}"),
                        "refresh_token": format!("rt-{n}"),
                        "expires_in": 3600
                    }))
                }
            }),
        );
        let provider = provider(start_mock(app).await);

        let first = provider.acquire_token().await.unwrap();
        let second = provider.acquire_token().await.unwrap();

        assert_eq!(first.expose_secret(), "at-1");
        assert_eq!(second.expose_secret(), "at-2");
        assert_eq!(*seen.lock().unwrap(), vec!["rt-0", "rt-1"]);
        assert_eq!(provider.current_refresh_token().await.expose_secret(), "rt-2");
        assert_eq!(provider.refresh_count(), 2);
    }

    #[tokio::test]
    async fn keeps_refresh_token_when_none_is_issued() {
        let app = Router::new().route(
            "/tenant-1/oauth2/v2.0/token",
            post(|| async { axum::Json(serde_json::json!({ "access_token": "at" })) }),
        );
        let provider = provider(start_mock(app).await);

        provider.acquire_token().await.unwrap();
        assert_eq!(provider.current_refresh_token().await.expose_secret(), "rt-0");
    }

    #[tokio::test]
    async fn overlapping_callers_share_one_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            "/tenant-1/oauth2/v2.0/token",
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    axum::Json(serde_json::json!({
                        "access_token": format!("at-{n}"),
                        "refresh_token": format!("rt-{n}")
                    }))
                }
            }),
        );
        let provider = provider(start_mock(app).await);

        let (a, b) = tokio::join!(provider.acquire_token(), provider.acquire_token());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap().expose_secret(), b.unwrap().expose_secret());
    }

    #[tokio::test]
    async fn rotation_survives_a_cancelled_caller() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen_in_handler = Arc::clone(&seen);
        let app = Router::new().route(
            "/tenant-1/oauth2/v2.0/token",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let seen = Arc::clone(&seen_in_handler);
                async move {
                    seen.lock().unwrap().push(form["refresh_token"].clone());
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    axum::Json(serde_json::json!({
                        "access_token": "at-1",
                        "refresh_token": "rt-1"
                    }))
                }
            }),
        );
        let provider = provider(start_mock(app).await);

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), provider.acquire_token()).await;
        assert!(cancelled.is_err());

        // The lock is held until the detached refresh has stored its result.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(provider.current_refresh_token().await.expose_secret(), "rt-1");
        assert_eq!(provider.refresh_count(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["rt-0"]);
    }

    #[tokio::test]
    async fn rejected_refresh_token_is_auth_error() {
        let app = Router::new().route(
            "/tenant-1/oauth2/v2.0/token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    axum::Json(serde_json::json!({
                        "error": "invalid_grant",
                        "error_description": "AADSTS70008: The refresh token has expired"
                    })),
                )
            }),
        );
        let provider = provider(start_mock(app).await);

        let err = provider.acquire_token().await.unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("invalid_grant"));
        assert_eq!(provider.current_refresh_token().await.expose_secret(), "rt-0");
        assert_eq!(provider.refresh_count(), 0);
    }

    #[tokio::test]
    async fn missing_access_token_is_auth_error() {
        let app = Router::new().route(
            "/tenant-1/oauth2/v2.0/token",
            post(|| async { axum::Json(serde_json::json!({ "token_type": "Bearer" })) }),
        );
        let provider = provider(start_mock(app).await);

        assert!(provider.acquire_token().await.unwrap_err().is_auth());
    }

    #[tokio::test]
    async fn unreachable_authority_is_transport_error() {
        let provider = provider("http://127.0.0.1:1".into());
        let err = provider.acquire_token().await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn static_token_is_returned_verbatim() {
        let source = StaticToken::new("fixed");
        assert_eq!(source.access_token().await.unwrap().expose_secret(), "fixed");
    }
}
