use std::time::Duration;

use secrecy::{ExposeSecret, Secret};

use teamsmirror_graph::{
    Error, GraphConfig, Result,
    subscription::{DEFAULT_EXPIRATION_MINUTES, SubscriptionSettings},
};

use crate::{
    queue::{DEFAULT_QUEUE_CAPACITY, DEFAULT_TASK_TIMEOUT, DEFAULT_WORKERS, QueueOptions},
    webhook::WEBHOOK_PATH,
};

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything the relay needs to start.
#[derive(Clone)]
pub struct RelayConfig {
    pub graph: GraphConfig,

    /// Externally reachable base URL Graph delivers notifications to.
    pub webhook_base_url: String,

    /// Shared secret embedded in the subscription and echoed in notifications.
    pub client_state: Secret<String>,

    pub bind: String,
    pub port: u16,
    pub workers: usize,
    pub queue_capacity: usize,
    pub task_timeout: Duration,

    /// Per-request bound on Graph and token endpoint calls. Kept below
    /// `task_timeout` so a hung connection fails the request, not the job.
    pub http_timeout: Duration,

    /// Requested subscription lifetime; clamped to the Graph maximum.
    pub subscription_minutes: i64,

    /// Delete every existing subscription before creating a new one.
    pub purge_subscriptions: bool,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("graph", &self.graph)
            .field("webhook_base_url", &self.webhook_base_url)
            .field("client_state", &"[REDACTED]")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("task_timeout", &self.task_timeout)
            .field("http_timeout", &self.http_timeout)
            .field("subscription_minutes", &self.subscription_minutes)
            .field("purge_subscriptions", &self.purge_subscriptions)
            .finish()
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            webhook_base_url: String::new(),
            client_state: Secret::new(String::new()),
            bind: DEFAULT_BIND.into(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            subscription_minutes: DEFAULT_EXPIRATION_MINUTES,
            purge_subscriptions: false,
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        self.graph.validate()?;

        if self.client_state.expose_secret().is_empty() {
            return Err(Error::invalid_config("subscription client state is required"));
        }
        if self.workers == 0 {
            return Err(Error::invalid_config("worker count must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(Error::invalid_config("queue capacity must be at least 1"));
        }
        if self.task_timeout.is_zero() {
            return Err(Error::invalid_config("task timeout must be positive"));
        }
        if self.http_timeout.is_zero() || self.http_timeout >= self.task_timeout {
            return Err(Error::invalid_config(format!(
                "http timeout must be positive and below the task timeout ({:?})",
                self.task_timeout
            )));
        }

        let base = url::Url::parse(&self.webhook_base_url).map_err(|e| {
            Error::invalid_config(format!("webhook base url '{}': {e}", self.webhook_base_url))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(Error::invalid_config(format!(
                "webhook base url must be http(s), got '{}'",
                base.scheme()
            )));
        }
        Ok(())
    }

    /// Absolute URL Graph posts notifications to.
    pub fn notification_url(&self) -> String {
        format!(
            "{}{WEBHOOK_PATH}",
            self.webhook_base_url.trim_end_matches('/')
        )
    }

    pub fn subscription_settings(&self) -> SubscriptionSettings {
        SubscriptionSettings {
            notification_url: self.notification_url(),
            client_state: self.client_state.clone(),
            expiration_minutes: self.subscription_minutes,
        }
    }

    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            workers: self.workers,
            capacity: self.queue_capacity,
            task_timeout: self.task_timeout,
        }
    }

    /// HTTP client shared by the token provider and the Graph gateway.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .map_err(|e| Error::transport("failed to build HTTP client", e))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
