use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    axum::{Router, extract::Query, response::Html, routing::get},
    clap::Subcommand,
    secrecy::ExposeSecret,
    teamsmirror_graph::{
        GraphConfig, TokenGrant, authorization_request, authorize::DEFAULT_REDIRECT_URI,
        redeem_authorization_code,
    },
    tokio::sync::oneshot,
    url::Url,
};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Subcommand)]
pub enum AuthAction {
    /// Sign in through the browser and print a refresh token.
    Login {
        /// Redirect URI registered on the app; its port and path are served locally.
        #[arg(long, default_value = DEFAULT_REDIRECT_URI)]
        redirect_uri: String,
        /// Print the URL instead of opening a browser.
        #[arg(long)]
        no_browser: bool,
    },
    /// Redeem an authorization code copied from the redirect URL.
    Redeem {
        #[arg(long)]
        code: String,
        #[arg(long, default_value = DEFAULT_REDIRECT_URI)]
        redirect_uri: String,
    },
}

pub async fn handle_auth(action: AuthAction, graph: GraphConfig) -> Result<()> {
    let grant = match action {
        AuthAction::Login {
            redirect_uri,
            no_browser,
        } => login(&graph, &redirect_uri, no_browser).await?,
        AuthAction::Redeem { code, redirect_uri } => {
            redeem_authorization_code(&graph, &reqwest::Client::new(), &code, &redirect_uri)
                .await
                .context("failed to redeem authorization code")?
        },
    };
    print_refresh_token(&grant)
}

async fn login(graph: &GraphConfig, redirect_uri: &str, no_browser: bool) -> Result<TokenGrant> {
    let callback = Url::parse(redirect_uri).context("invalid redirect uri")?;
    let port = callback
        .port_or_known_default()
        .context("redirect uri has no port")?;
    let req = authorization_request(graph, redirect_uri)?;

    if no_browser || open::that(&req.url).is_err() {
        println!("Open this URL to sign in:\n{}", req.url);
    } else {
        println!("Opening browser for sign-in...");
    }

    println!("Waiting for callback on {redirect_uri} ...");
    let code = wait_for_code(port, callback.path(), req.state).await?;

    println!("Exchanging code for tokens...");
    redeem_authorization_code(graph, &reqwest::Client::new(), &code, redirect_uri)
        .await
        .context("failed to redeem authorization code")
}

fn print_refresh_token(grant: &TokenGrant) -> Result<()> {
    let Some(refresh_token) = grant.refresh_token.as_ref() else {
        bail!("no refresh token issued; make sure offline_access is granted");
    };
    println!("Refresh token (set as AZURE_REFRESH_TOKEN):");
    println!("{}", refresh_token.expose_secret());
    Ok(())
}

/// Serve `path` on `127.0.0.1:{port}` until a callback with the expected
/// `state` arrives.
async fn wait_for_code(port: u16, path: &str, expected_state: String) -> Result<String> {
    let (tx, rx) = oneshot::channel::<Result<String>>();
    let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

    let app = Router::new().route(
        path,
        get(move |Query(params): Query<HashMap<String, String>>| {
            let tx = tx.lock().unwrap_or_else(|e| e.into_inner()).take();
            let result = callback_code(&params, &expected_state);
            async move {
                let page = match &result {
                    Ok(_) => "<h1>Signed in.</h1><p>You can close this window.</p>".to_string(),
                    Err(e) => format!("<h1>Sign-in failed</h1><p>{e}</p>"),
                };
                if let Some(tx) = tx {
                    let _ = tx.send(result);
                }
                Html(page)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("failed to bind callback port {port}"))?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = rx => result?,
        _ = server.into_future() => bail!("callback server exited unexpectedly"),
        _ = tokio::time::sleep(CALLBACK_TIMEOUT) => {
            bail!("sign-in callback timed out after {} seconds", CALLBACK_TIMEOUT.as_secs())
        },
    }
}

fn callback_code(params: &HashMap<String, String>, expected_state: &str) -> Result<String> {
    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(String::as_str)
            .unwrap_or_default();
        bail!("{error}: {description}");
    }
    let state = params.get("state").context("missing state")?;
    if state != expected_state {
        bail!("state mismatch");
    }
    params.get("code").cloned().context("missing code")
}
