//! Webhook ingestion and the relay pipeline.
//!
//! Graph posts change notifications to [`webhook`]; admitted batches go through
//! the bounded [`queue`] to a worker pool running the [`processor`], which
//! fetches each message and posts it back into its chat unless the relay sent
//! it itself.

pub mod config;
pub mod context;
pub mod definitions;
pub mod processor;
pub mod queue;
pub mod recorder;
pub mod server;
pub mod webhook;

pub use {
    config::RelayConfig,
    context::RelayContext,
    processor::{NotificationProcessor, Outcome},
    queue::{AdmitError, NotificationHandler, QueueOptions, RelayQueue, StatsSnapshot},
    recorder::{MetricsHandle, init_metrics},
    server::{BootstrapOutcome, Relay, start_relay},
    webhook::{METRICS_PATH, RelayState, WEBHOOK_PATH, build_router},
};
