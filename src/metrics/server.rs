//! HTTP server for the Prometheus metrics endpoint.
//!
//! Metrics are pulled at scrape time: each `/metrics` request takes a fresh
//! snapshot from the pipeline, folds it into the registry and encodes it.

use super::{MetricsRegistry, MetricsSnapshot};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;

/// Errors that can occur during metrics server operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    /// The HTTP server stopped with an error.
    #[error("server error: {0}")]
    Server(String),
}

/// Configuration for the metrics server.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind the server to.
    pub bind_addr: SocketAddr,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self::with_port(9090)
    }
}

impl MetricsServerConfig {
    /// Loopback config on the given port.
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: ([127, 0, 0, 1], port).into(),
        }
    }
}

type SnapshotSource = dyn Fn() -> MetricsSnapshot + Send + Sync;

/// Registry plus the callback that samples the pipeline.
pub struct MetricsState {
    registry: MetricsRegistry,
    source: Box<SnapshotSource>,
}

impl MetricsState {
    /// Samples the pipeline and renders the registry.
    pub fn scrape(&self) -> Result<String, super::MetricsError> {
        self.registry.update(&(self.source)());
        self.registry.encode()
    }
}

/// HTTP server for exposing Prometheus metrics.
pub struct MetricsServer {
    config: MetricsServerConfig,
    state: Arc<MetricsState>,
}

impl MetricsServer {
    /// Creates a server that samples `source` on every scrape.
    pub fn new<F>(config: MetricsServerConfig, registry: MetricsRegistry, source: F) -> Self
    where
        F: Fn() -> MetricsSnapshot + Send + Sync + 'static,
    {
        Self {
            config,
            state: Arc::new(MetricsState {
                registry,
                source: Box::new(source),
            }),
        }
    }

    /// Shared scrape state.
    pub fn state(&self) -> Arc<MetricsState> {
        Arc::clone(&self.state)
    }

    /// Serves `/metrics` and `/health` until the task is dropped.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state);

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Metrics server listening");

        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Server(e.to_string()))
    }
}

async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    match state.scrape() {
        Ok(output) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_config_defaults_to_loopback() {
        let config = MetricsServerConfig::default();
        assert_eq!(config.bind_addr.port(), 9090);
        assert!(config.bind_addr.ip().is_loopback());
    }

    #[test]
    fn test_scrape_samples_source_each_time() {
        let delivered = Arc::new(AtomicU64::new(1));
        let source = Arc::clone(&delivered);
        let server = MetricsServer::new(
            MetricsServerConfig::with_port(0),
            MetricsRegistry::new().unwrap(),
            move || MetricsSnapshot {
                captures_delivered: source.load(Ordering::SeqCst),
                ..Default::default()
            },
        );
        let state = server.state();

        assert!(state.scrape().unwrap().contains("still_capture_captures_total 1"));
        delivered.store(4, Ordering::SeqCst);
        assert!(state.scrape().unwrap().contains("still_capture_captures_total 4"));
    }
}
