//! Inbound HTTP surface: the Graph validation handshake, notification
//! delivery, health and the metrics scrape endpoint.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{Query, State},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    tower_http::trace::TraceLayer,
    tracing::{debug, info, warn},
};

use teamsmirror_graph::NotificationBatch;

use crate::{
    context::RelayContext,
    queue::{AdmitError, RelayQueue},
    recorder::{MetricsHandle, prometheus_metrics_handler},
};

/// Path Graph posts notifications (and the validation handshake) to.
pub const WEBHOOK_PATH: &str = "/api/webhook";

pub const METRICS_PATH: &str = "/metrics";

/// Seconds Graph is asked to wait before redelivering a refused batch.
const RETRY_AFTER_SECS: &str = "5";

#[derive(Clone)]
pub struct RelayState {
    pub context: Arc<RelayContext>,
    pub queue: Arc<RelayQueue>,
    /// `None` when no recorder is installed; `/metrics` then answers 503.
    pub metrics: Option<MetricsHandle>,
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route(WEBHOOK_PATH, post(webhook_handler))
        .route(METRICS_PATH, get(prometheus_metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "user_id_identified": state.context.self_identity().is_some(),
        "queue": state.queue.stats(),
    }))
}

async fn webhook_handler(
    State(state): State<RelayState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if let Some(token) = params.get("validationToken") {
        info!("answering subscription validation handshake");
        return (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            token.clone(),
        )
            .into_response();
    }

    let batch = match NotificationBatch::parse(&body) {
        Ok(batch) => batch,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "rejecting malformed notification payload");
            state.queue.record_invalid_payload();
            return (StatusCode::BAD_REQUEST, "invalid notification payload").into_response();
        },
    };

    match state.queue.admit(batch.value) {
        Ok(count) => {
            debug!(count, "notification batch accepted");
            StatusCode::ACCEPTED.into_response()
        },
        Err(e @ AdmitError::Full { .. }) => {
            warn!(error = %e, "relay queue full, asking Graph to redeliver");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                "relay queue full",
            )
                .into_response()
        },
        Err(e @ AdmitError::Closed) => {
            warn!(error = %e, "relay queue closed");
            (StatusCode::SERVICE_UNAVAILABLE, "relay queue closed").into_response()
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use {
        async_trait::async_trait,
        secrecy::Secret,
        teamsmirror_graph::{Notification, Result},
        tokio::sync::Notify,
    };

    use crate::{
        processor::Outcome,
        queue::{NotificationHandler, QueueOptions},
    };

    /// Holds every job until released, so admitted work stays in flight.
    struct GatedHandler {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl NotificationHandler for GatedHandler {
        async fn handle(&self, _notification: &Notification) -> Result<Outcome> {
            self.gate.notified().await;
            Ok(Outcome::Relayed)
        }
    }

    async fn start(capacity: usize) -> (String, Arc<RelayQueue>, Arc<Notify>) {
        start_with_metrics(capacity, None).await
    }

    async fn start_with_metrics(
        capacity: usize,
        metrics: Option<MetricsHandle>,
    ) -> (String, Arc<RelayQueue>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let queue = Arc::new(RelayQueue::spawn(
            Arc::new(GatedHandler {
                gate: Arc::clone(&gate),
            }),
            QueueOptions {
                workers: 1,
                capacity,
                task_timeout: Duration::from_secs(5),
            },
        ));
        let state = RelayState {
            context: Arc::new(RelayContext::new(Secret::new("s".into()))),
            queue: Arc::clone(&queue),
            metrics,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });
        (format!("http://{addr}"), queue, gate)
    }

    fn batch(n: usize) -> serde_json::Value {
        let value: Vec<_> = (0..n)
            .map(|i| {
                serde_json::json!({
                    "subscriptionId": "sub-1",
                    "clientState": "s",
                    "resource": format!("chats('19:abc')/messages('{i}')"),
                })
            })
            .collect();
        serde_json::json!({ "value": value })
    }

    #[tokio::test]
    async fn handshake_token_is_url_decoded() {
        let (base, queue, _gate) = start(4).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}{WEBHOOK_PATH}?validationToken=Validation%3A%20abc%2B1"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "Validation: abc+1");
        assert_eq!(queue.stats().accepted, 0);
    }

    #[tokio::test]
    async fn full_queue_refuses_whole_batch() {
        let (base, queue, gate) = start(2).await;
        let client = reqwest::Client::new();
        let url = format!("{base}{WEBHOOK_PATH}");

        let resp = client.post(&url).json(&batch(3)).send().await.unwrap();
        assert_eq!(resp.status(), 503);
        assert_eq!(
            resp.headers().get("retry-after").unwrap().to_str().unwrap(),
            RETRY_AFTER_SECS
        );
        let stats = queue.stats();
        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.rejected, 3);

        let resp = client.post(&url).json(&batch(2)).send().await.unwrap();
        assert_eq!(resp.status(), 202);
        assert_eq!(queue.stats().accepted, 2);
        drop(gate);
    }

    #[tokio::test]
    async fn empty_batch_is_accepted() {
        let (base, queue, _gate) = start(2).await;
        let resp = reqwest::Client::new()
            .post(format!("{base}{WEBHOOK_PATH}"))
            .json(&serde_json::json!({ "value": [] }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);
        assert_eq!(queue.stats().accepted, 0);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_unavailable() {
        let (base, _queue, _gate) = start(1).await;
        let resp = reqwest::get(format!("{base}{METRICS_PATH}")).await.unwrap();
        assert_eq!(resp.status(), 503);
        assert_eq!(resp.text().await.unwrap(), "Metrics not enabled");
    }

    #[cfg(feature = "prometheus")]
    #[tokio::test]
    async fn metrics_endpoint_renders_recorded_counters() {
        use crate::definitions::notifications;

        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = MetricsHandle::new(recorder.handle());
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(notifications::ACCEPTED_TOTAL).increment(3);
        });

        let (base, _queue, _gate) = start_with_metrics(1, Some(handle)).await;
        let resp = reqwest::get(format!("{base}{METRICS_PATH}")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let body = resp.text().await.unwrap();
        assert!(
            body.contains("teamsmirror_notifications_accepted_total 3"),
            "{body}"
        );
    }
}
