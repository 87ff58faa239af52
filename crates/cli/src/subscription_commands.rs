use std::sync::Arc;

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    teamsmirror_graph::{ApiGateway, SubscriptionManager, TokenProvider},
    teamsmirror_relay::RelayConfig,
};

#[derive(Subcommand)]
pub enum SubscriptionAction {
    /// List the subscriptions visible to the configured identity.
    List {
        /// Print raw JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Delete one subscription.
    Delete {
        /// Subscription ID.
        id: String,
    },
    /// Delete every visible subscription.
    Purge,
}

pub async fn handle_subscriptions(action: SubscriptionAction, config: RelayConfig) -> Result<()> {
    config
        .graph
        .validate()
        .context("invalid Graph configuration")?;

    let http = config.http_client()?;
    let tokens = Arc::new(TokenProvider::new(config.graph.clone(), http.clone()));
    let gateway = ApiGateway::new(http, config.graph.graph_base_url.clone(), tokens);
    let manager = SubscriptionManager::new(gateway, config.subscription_settings());

    match action {
        SubscriptionAction::List { json } => list(&manager, json).await,
        SubscriptionAction::Delete { id } => {
            manager
                .delete_subscription(&id)
                .await
                .with_context(|| format!("failed to delete subscription {id}"))?;
            println!("Deleted {id}");
            Ok(())
        },
        SubscriptionAction::Purge => {
            let deleted = manager.purge_subscriptions().await?;
            println!("Deleted {deleted} subscription(s)");
            Ok(())
        },
    }
}

async fn list(manager: &SubscriptionManager, json: bool) -> Result<()> {
    let subscriptions = manager.list_subscriptions().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&subscriptions)?);
        return Ok(());
    }
    if subscriptions.is_empty() {
        println!("No subscriptions.");
        return Ok(());
    }
    for s in &subscriptions {
        println!(
            "{}  {}  expires {}  -> {}",
            s.id, s.resource, s.expiration_date_time, s.notification_url
        );
    }
    Ok(())
}
