//! Span helpers for the ingestion and export paths.

use tracing::{span, Level, Span};

/// One flush unit being written to the store
#[inline]
pub fn flush_span(events: usize, trigger: &'static str) -> Span {
    span!(
        Level::INFO,
        "telemetry.flush",
        flush.events = events,
        flush.trigger = trigger,
        otel.kind = "internal"
    )
}

/// A scan → aggregate export cycle
#[inline]
pub fn export_span() -> Span {
    span!(Level::INFO, "telemetry.export", otel.kind = "internal")
}

/// Iteration over one key pattern
#[inline]
pub fn scan_span(pattern: &str) -> Span {
    span!(
        Level::DEBUG,
        "telemetry.scan",
        db.operation = "SCAN",
        db.redis.pattern = %pattern,
        otel.kind = "client"
    )
}

/// Analytics query
#[inline]
pub fn query_span(operation: &'static str, subject: &str) -> Span {
    span!(
        Level::DEBUG,
        "telemetry.query",
        query.operation = operation,
        query.subject = %subject,
        otel.kind = "internal"
    )
}

#[inline]
pub fn health_span() -> Span {
    span!(Level::DEBUG, "telemetry.health", otel.kind = "internal")
}

/// Inbound HTTP request on the metrics endpoint
#[inline]
pub fn http_span(method: &str, path: &str) -> Span {
    span!(
        Level::DEBUG,
        "http.request",
        http.method = %method,
        http.target = %path,
        otel.kind = "server"
    )
}
