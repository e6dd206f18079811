//! HTTP endpoint for Prometheus scrapes and health checks.

use crate::exporter::MetricsExporter;
use crate::health::{HealthReporter, HealthState};
use crate::observability::http_span;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct ServerState {
    exporter: MetricsExporter,
    health: Arc<HealthReporter>,
}

/// `/metrics` and `/health`; other paths get 404, other methods 405
pub fn router(exporter: MetricsExporter, health: Arc<HealthReporter>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health_status))
        .fallback(not_found)
        .layer(middleware::from_fn(trace_request))
        .with_state(ServerState { exporter, health })
}

async fn trace_request(request: Request, next: Next) -> Response {
    let span = http_span(request.method().as_str(), request.uri().path());
    next.run(request).instrument(span).await
}

async fn metrics(State(state): State<ServerState>) -> Response {
    // the registry still carries tracker and system series without a snapshot
    if let Err(e) = state.exporter.export_metrics().await {
        warn!(error = %e, code = %e.code(), "scrape served without bot metrics");
    }
    match state.exporter.render() {
        Ok(body) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n").into_response()
        }
    }
}

async fn health_status(State(state): State<ServerState>) -> Response {
    let status = state.health.get_health_status().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status)).into_response()
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found\n")
}

pub struct MetricsServer {
    listener: TcpListener,
    app: Router,
}

impl MetricsServer {
    pub async fn bind(
        addr: &str,
        exporter: MetricsExporter,
        health: Arc<HealthReporter>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(MetricsServer {
            listener,
            app: router(exporter, health),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until `cancel` fires, then let open requests finish
    pub async fn run(self, cancel: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => info!(%addr, "metrics server listening"),
            Err(e) => warn!(error = %e, "metrics server listening on unknown address"),
        }

        let served = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await;
        match served {
            Ok(()) => info!("metrics server stopped"),
            Err(e) => error!(error = %e, "metrics server failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExporterConfig, HealthConfig, RetentionConfig, TrackerConfig};
    use crate::store::{MemoryStore, Store};
    use crate::tracker::EventTracker;
    use axum::body::{self, Body};
    use axum::http;
    use prometheus::Registry;
    use tower::ServiceExt;

    fn app(store: &MemoryStore) -> Router {
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let registry = Registry::new();
        let tracker = EventTracker::new(
            shared.clone(),
            TrackerConfig::default(),
            RetentionConfig::default(),
            &registry,
        )
        .unwrap();
        let exporter = MetricsExporter::new(shared.clone(), ExporterConfig::default(), &registry).unwrap();
        let health = HealthReporter::new(shared, tracker, exporter.clone(), HealthConfig::default());
        router(exporter, Arc::new(health))
    }

    fn get(uri: &str) -> Request {
        http::Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let resp = app(&MemoryStore::new()).oneshot(get("/metrics?name[]=x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], PROMETHEUS_CONTENT_TYPE);
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("bot_telemetry_store_connection_status"));
    }

    #[tokio::test]
    async fn test_health_maps_unhealthy_to_503() {
        let store = MemoryStore::new();
        let resp = app(&store).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        store.set_available(false);
        let resp = app(&store).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_unknown_path_and_method() {
        let store = MemoryStore::new();
        let resp = app(&store).oneshot(get("/nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let post = http::Request::builder()
            .method("POST")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app(&store).oneshot(post).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
