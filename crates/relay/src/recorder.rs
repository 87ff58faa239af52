//! Metrics recorder installation and the `/metrics` scrape endpoint.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::webhook::RelayState;

/// Handle to the installed recorder, rendered by `GET /metrics`.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    #[cfg(feature = "prometheus")]
    pub fn new(prometheus_handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        Self { prometheus_handle }
    }

    /// Render every recorded metric in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.render()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Install the process-wide recorder. Call once at startup.
///
/// Returns `None` when no exporter is compiled in; counters are then dropped.
pub fn init_metrics() -> anyhow::Result<Option<MetricsHandle>> {
    #[cfg(feature = "prometheus")]
    {
        let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
        tracing::info!("Prometheus metrics exporter initialized");
        Ok(Some(MetricsHandle::new(handle)))
    }

    #[cfg(not(feature = "prometheus"))]
    {
        tracing::info!("metrics exporter not enabled at compile time");
        Ok(None)
    }
}

/// Prometheus text exposition, unauthenticated so scrapers can reach it.
pub async fn prometheus_metrics_handler(State(state): State<RelayState>) -> Response {
    match state.metrics.as_ref() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not enabled",
        )
            .into_response(),
    }
}
