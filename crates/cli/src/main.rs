mod auth_commands;
mod subscription_commands;

use std::time::Duration;

use {
    clap::{Args, Parser, Subcommand},
    secrecy::Secret,
    teamsmirror_graph::{
        GraphConfig,
        config::{DEFAULT_AUTHORITY_URL, DEFAULT_GRAPH_BASE_URL},
    },
    teamsmirror_relay::{RelayConfig, config::DEFAULT_BIND},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(
    name = "teamsmirror",
    about = "Mirror Teams chat messages back into their chat",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(flatten)]
    graph: GraphArgs,

    // Relay arguments (used when no subcommand is provided, or with `serve`)
    #[command(flatten)]
    serve: ServeArgs,
}

/// Delegated Graph identity.
#[derive(Args)]
struct GraphArgs {
    /// Directory (tenant) ID.
    #[arg(long, global = true, env = "AZURE_TENANT_ID", default_value = "")]
    tenant_id: String,
    /// Application (client) ID.
    #[arg(long, global = true, env = "AZURE_CLIENT_ID", default_value = "")]
    client_id: String,
    #[arg(
        long,
        global = true,
        env = "AZURE_CLIENT_SECRET",
        hide_env_values = true,
        default_value = ""
    )]
    client_secret: String,
    /// Refresh token obtained out of band for the mirrored user.
    #[arg(
        long,
        global = true,
        env = "AZURE_REFRESH_TOKEN",
        hide_env_values = true,
        default_value = ""
    )]
    refresh_token: String,
    #[arg(long, global = true, env = "GRAPH_BASE_URL", default_value = DEFAULT_GRAPH_BASE_URL)]
    graph_base_url: String,
    #[arg(long, global = true, env = "AZURE_AUTHORITY_URL", default_value = DEFAULT_AUTHORITY_URL)]
    authority_url: String,
}

#[derive(Args)]
struct ServeArgs {
    /// Externally reachable base URL, e.g. https://relay.example.com.
    #[arg(long, global = true, env = "WEBHOOK_BASE_URL", default_value = "")]
    webhook_base_url: String,
    /// Shared secret Graph echoes in every notification.
    #[arg(
        long,
        global = true,
        env = "SUBSCRIPTION_CLIENT_STATE",
        hide_env_values = true,
        default_value = ""
    )]
    client_state: String,
    /// Address to bind to.
    #[arg(long, global = true, env = "TEAMSMIRROR_BIND", default_value = DEFAULT_BIND)]
    bind: String,
    /// Port to listen on.
    #[arg(long, global = true, env = "TEAMSMIRROR_PORT", default_value_t = teamsmirror_relay::config::DEFAULT_PORT)]
    port: u16,
    /// Relay worker count.
    #[arg(long, global = true, env = "TEAMSMIRROR_WORKERS", default_value_t = teamsmirror_relay::queue::DEFAULT_WORKERS)]
    workers: usize,
    /// Notifications that may wait or run at once before deliveries get a 503.
    #[arg(long, global = true, env = "TEAMSMIRROR_QUEUE_CAPACITY", default_value_t = teamsmirror_relay::queue::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
    /// Upper bound on processing one notification.
    #[arg(long, global = true, env = "TEAMSMIRROR_TASK_TIMEOUT_SECS", default_value_t = 30)]
    task_timeout_secs: u64,
    /// Upper bound on one Graph or token endpoint request, in milliseconds.
    #[arg(long, global = true, env = "TEAMSMIRROR_HTTP_TIMEOUT_MS", default_value_t = 10_000)]
    http_timeout_ms: u64,
    /// Requested subscription lifetime; Graph caps it at 72 hours.
    #[arg(long, global = true, env = "TEAMSMIRROR_SUBSCRIPTION_HOURS", default_value_t = 70)]
    subscription_hours: u32,
    /// Delete every existing subscription before subscribing.
    #[arg(long, global = true, env = "TEAMSMIRROR_PURGE_SUBSCRIPTIONS", default_value_t = false)]
    purge_subscriptions: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook relay (default when no subcommand is provided).
    Serve,
    /// Obtain the refresh token the relay runs on.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// Subscription management.
    Subscriptions {
        #[command(subcommand)]
        action: subscription_commands::SubscriptionAction,
    },
}

impl Cli {
    fn relay_config(&self) -> RelayConfig {
        let g = &self.graph;
        let s = &self.serve;
        let mut graph = GraphConfig::new(
            g.tenant_id.clone(),
            g.client_id.clone(),
            Secret::new(g.client_secret.clone()),
            Secret::new(g.refresh_token.clone()),
        );
        graph.graph_base_url = g.graph_base_url.clone();
        graph.authority_url = g.authority_url.clone();

        RelayConfig {
            graph,
            webhook_base_url: s.webhook_base_url.clone(),
            client_state: Secret::new(s.client_state.clone()),
            bind: s.bind.clone(),
            port: s.port,
            workers: s.workers,
            queue_capacity: s.queue_capacity,
            task_timeout: Duration::from_secs(s.task_timeout_secs),
            http_timeout: Duration::from_millis(s.http_timeout_ms),
            subscription_minutes: i64::from(s.subscription_hours) * 60,
            purge_subscriptions: s.purge_subscriptions,
        }
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "teamsmirror starting");

    let config = cli.relay_config();
    match cli.command {
        None | Some(Commands::Serve) => teamsmirror_relay::start_relay(config).await,
        Some(Commands::Auth { action }) => auth_commands::handle_auth(action, config.graph).await,
        Some(Commands::Subscriptions { action }) => {
            subscription_commands::handle_subscriptions(action, config).await
        },
    }
}
