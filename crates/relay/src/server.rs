use std::sync::Arc;

use {
    anyhow::Context,
    tracing::{error, info, warn},
};

use teamsmirror_graph::{
    ApiGateway, Subscription, SubscriptionManager, TokenProvider, TokenSource,
};

use crate::{
    config::RelayConfig,
    context::RelayContext,
    processor::NotificationProcessor,
    queue::RelayQueue,
    recorder::{MetricsHandle, init_metrics},
    webhook::{RelayState, build_router},
};

/// How far startup got before the relay settled into serving.
#[derive(Debug)]
pub enum BootstrapOutcome {
    /// Identity resolved and a subscription is active.
    Subscribed(Subscription),
    /// Identity resolved but Graph refused the subscription.
    Unsubscribed,
    /// Identity could not be resolved; nothing will be relayed.
    Degraded(teamsmirror_graph::Error),
}

/// The assembled relay: one gateway shared by subscription management and the
/// workers, one context shared by the webhook and the workers.
pub struct Relay {
    config: RelayConfig,
    gateway: ApiGateway,
    context: Arc<RelayContext>,
    queue: Arc<RelayQueue>,
    subscriptions: SubscriptionManager,
    metrics: Option<MetricsHandle>,
}

impl Relay {
    /// Assemble with a refresh-token based [`TokenProvider`]. Spawns the
    /// worker pool, so it must run inside a Tokio runtime.
    pub fn new(config: RelayConfig) -> teamsmirror_graph::Result<Self> {
        let http = config.http_client()?;
        let tokens: Arc<dyn TokenSource> =
            Arc::new(TokenProvider::new(config.graph.clone(), http.clone()));
        Ok(Self::with_token_source(config, http, tokens))
    }

    pub fn with_token_source(
        config: RelayConfig,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        let gateway = ApiGateway::new(http, config.graph.graph_base_url.clone(), tokens);
        let context = Arc::new(RelayContext::new(config.client_state.clone()));
        let processor = NotificationProcessor::new(gateway.clone(), Arc::clone(&context));
        let queue = Arc::new(RelayQueue::spawn(Arc::new(processor), config.queue_options()));
        let subscriptions = SubscriptionManager::new(gateway.clone(), config.subscription_settings());
        Self {
            config,
            gateway,
            context,
            queue,
            subscriptions,
            metrics: None,
        }
    }

    /// Serve `handle` on `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: Option<MetricsHandle>) -> Self {
        self.metrics = handle;
        self
    }

    pub fn router(&self) -> axum::Router {
        build_router(RelayState {
            context: Arc::clone(&self.context),
            queue: Arc::clone(&self.queue),
            metrics: self.metrics.clone(),
        })
    }

    pub fn context(&self) -> &Arc<RelayContext> {
        &self.context
    }

    pub fn queue(&self) -> &Arc<RelayQueue> {
        &self.queue
    }

    /// Resolve the relay's own identity, then (re)create the subscription.
    ///
    /// Failures are logged and reported in the outcome; the HTTP server keeps
    /// running either way.
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        let user_id = match self.gateway.me().await {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "critical: could not resolve own user id, relay disabled");
                return BootstrapOutcome::Degraded(e);
            },
        };
        self.context.set_self_identity(user_id.clone());
        info!(user_id = %user_id, "self identity resolved");

        if self.config.purge_subscriptions {
            match self.subscriptions.purge_subscriptions().await {
                Ok(deleted) => info!(deleted, "stale subscriptions purged"),
                Err(e) => warn!(error = %e, "could not purge existing subscriptions"),
            }
        }

        match self.subscriptions.create_subscription(&user_id).await {
            Ok(Some(subscription)) => BootstrapOutcome::Subscribed(subscription),
            Ok(None) => {
                error!("critical: subscription was not created, no notifications will arrive");
                BootstrapOutcome::Unsubscribed
            },
            Err(e) => {
                error!(error = %e, "critical: subscription request failed");
                BootstrapOutcome::Unsubscribed
            },
        }
    }
}

/// Run the relay until Ctrl-C.
///
/// The listener is bound before the subscription is requested because Graph
/// validates the notification URL while creating it.
pub async fn start_relay(config: RelayConfig) -> anyhow::Result<()> {
    config.validate().context("invalid relay configuration")?;
    let addr = config.listen_addr();
    let drain_timeout = config.task_timeout;

    let metrics = init_metrics().context("failed to install metrics recorder")?;
    let relay = Arc::new(
        Relay::new(config)
            .context("failed to assemble relay")?
            .with_metrics(metrics),
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "webhook listener bound");

    let app = relay.router();
    let bootstrapper = Arc::clone(&relay);
    tokio::spawn(async move {
        if let BootstrapOutcome::Subscribed(subscription) = bootstrapper.bootstrap().await {
            info!(
                subscription_id = %subscription.id,
                "relay ready"
            );
        }
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("webhook server failed")?;

    info!(in_flight = relay.queue().in_flight(), "draining relay queue");
    if tokio::time::timeout(drain_timeout, relay.queue().idle())
        .await
        .is_err()
    {
        warn!("relay queue did not drain before shutdown");
    }
    info!(stats = ?relay.queue().stats(), "relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use {
        mockito::{Matcher, Server},
        secrecy::Secret,
        teamsmirror_graph::{GraphConfig, StaticToken},
    };

    fn relay(server: &Server, purge: bool) -> Relay {
        let mut graph = GraphConfig::new(
            "tenant",
            "client",
            Secret::new("secret".into()),
            Secret::new("rt".into()),
        );
        graph.graph_base_url = server.url();
        let config = RelayConfig {
            graph,
            webhook_base_url: "https://relay.example.com".into(),
            client_state: Secret::new("s3cret".into()),
            purge_subscriptions: purge,
            ..RelayConfig::default()
        };
        Relay::with_token_source(
            config,
            reqwest::Client::new(),
            Arc::new(StaticToken::new("tok")),
        )
    }

    fn subscription_body() -> String {
        serde_json::json!({
            "id": "sub-1",
            "resource": "/users/self-user/chats/getAllMessages",
            "changeType": "created",
            "expirationDateTime": "2026-10-19T22:00:00.000Z",
            "notificationUrl": "https://relay.example.com/api/webhook"
        })
        .to_string()
    }

    #[tokio::test]
    async fn resolves_identity_then_subscribes() {
        let mut server = Server::new_async().await;
        let _me = server
            .mock("GET", "/me")
            .with_status(200)
            .with_body(r#"{"id":"self-user"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/subscriptions")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "resource": "/users/self-user/chats/getAllMessages",
                "notificationUrl": "https://relay.example.com/api/webhook",
                "clientState": "s3cret",
            })))
            .with_status(201)
            .with_body(subscription_body())
            .expect(1)
            .create_async()
            .await;
        let list = server
            .mock("GET", "/subscriptions")
            .expect(0)
            .create_async()
            .await;

        let relay = relay(&server, false);
        let outcome = relay.bootstrap().await;

        assert!(matches!(outcome, BootstrapOutcome::Subscribed(ref s) if s.id == "sub-1"));
        assert_eq!(relay.context().self_identity(), Some("self-user"));
        create.assert_async().await;
        list.assert_async().await;
    }

    #[tokio::test]
    async fn purges_before_subscribing_when_asked() {
        let mut server = Server::new_async().await;
        let _me = server
            .mock("GET", "/me")
            .with_status(200)
            .with_body(r#"{"id":"self-user"}"#)
            .create_async()
            .await;
        let _list = server
            .mock("GET", "/subscriptions")
            .with_status(200)
            .with_body(
                serde_json::json!({ "value": [{
                    "id": "old",
                    "resource": "/users/self-user/chats/getAllMessages",
                    "changeType": "created",
                    "expirationDateTime": "2026-10-18T00:00:00Z",
                    "notificationUrl": "https://old.example.com/api/webhook"
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        let delete = server
            .mock("DELETE", "/subscriptions/old")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/subscriptions")
            .with_status(201)
            .with_body(subscription_body())
            .create_async()
            .await;

        let outcome = relay(&server, true).bootstrap().await;

        assert!(matches!(outcome, BootstrapOutcome::Subscribed(_)));
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn unresolved_identity_skips_subscription() {
        let mut server = Server::new_async().await;
        let _me = server
            .mock("GET", "/me")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;
        let create = server
            .mock("POST", "/subscriptions")
            .expect(0)
            .create_async()
            .await;

        let relay = relay(&server, false);
        let outcome = relay.bootstrap().await;

        assert!(matches!(outcome, BootstrapOutcome::Degraded(_)));
        assert!(relay.context().self_identity().is_none());
        create.assert_async().await;
    }

    #[tokio::test]
    async fn hung_graph_connection_degrades_instead_of_waiting() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut graph = GraphConfig::new(
            "tenant",
            "client",
            Secret::new("secret".into()),
            Secret::new("rt".into()),
        );
        graph.graph_base_url = format!("http://{addr}");
        graph.authority_url = format!("http://{addr}");
        let config = RelayConfig {
            graph,
            webhook_base_url: "https://relay.example.com".into(),
            client_state: Secret::new("s3cret".into()),
            http_timeout: std::time::Duration::from_millis(200),
            ..RelayConfig::default()
        };

        let relay = Relay::new(config).unwrap();
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(5), relay.bootstrap())
            .await
            .expect("bootstrap should give up once the request times out");

        assert!(matches!(outcome, BootstrapOutcome::Degraded(_)));
        assert!(relay.context().self_identity().is_none());
    }

    #[tokio::test]
    async fn rejected_subscription_keeps_identity() {
        let mut server = Server::new_async().await;
        let _me = server
            .mock("GET", "/me")
            .with_status(200)
            .with_body(r#"{"id":"self-user"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/subscriptions")
            .with_status(400)
            .with_body(r#"{"error":{"code":"ValidationError"}}"#)
            .create_async()
            .await;

        let relay = relay(&server, false);
        let outcome = relay.bootstrap().await;

        assert!(matches!(outcome, BootstrapOutcome::Unsubscribed));
        assert_eq!(relay.context().self_identity(), Some("self-user"));
    }
}
