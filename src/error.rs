//! Error types shared by every telemetry component.
//!
//! Ingestion paths absorb most of these (log + counter); query and export
//! paths hand them back to the caller, so every variant carries a stable
//! [`ErrorCode`] that dashboards and the health endpoint can key on.

use serde::Serialize;
use std::fmt;

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationFailed,
    StoreConnectionFailed,
    ScriptExecutionFailed,
    BatchProcessingFailed,
    CleanupFailed,
    AnalyticsFailed,
    TrackingFailed,
    ExportFailed,
    ConfigInvalid,
    MetricsRegistryFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::StoreConnectionFailed => "STORE_CONNECTION_FAILED",
            ErrorCode::ScriptExecutionFailed => "SCRIPT_EXECUTION_FAILED",
            ErrorCode::BatchProcessingFailed => "BATCH_PROCESSING_FAILED",
            ErrorCode::CleanupFailed => "CLEANUP_FAILED",
            ErrorCode::AnalyticsFailed => "ANALYTICS_FAILED",
            ErrorCode::TrackingFailed => "TRACKING_FAILED",
            ErrorCode::ExportFailed => "EXPORT_FAILED",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::MetricsRegistryFailed => "METRICS_REGISTRY_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures raised by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (refused, dropped, not connected).
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The server cannot run the flush script at all (NOSCRIPT, scripting
    /// disabled, no permission). Nothing was written, so callers fall back to
    /// the pipelined command sequence.
    #[error("scripting unavailable: {0}")]
    ScriptUnavailable(String),

    /// The flush script ran and raised an error. No fallback: a retry of the
    /// same plan would hit the same error.
    #[error("script execution failed: {0}")]
    Script(String),

    /// A regular command returned an error reply.
    #[error("store command failed: {0}")]
    Command(String),

    /// A key held a different structure than the operation expected.
    #[error("WRONGTYPE operation against key '{0}' holding the wrong kind of value")]
    WrongType(String),

    /// The round-trip did not finish within the configured timeout.
    #[error("store operation timed out after {0}ms")]
    Timeout(u64),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Script(_) | StoreError::ScriptUnavailable(_) => ErrorCode::ScriptExecutionFailed,
            _ => ErrorCode::StoreConnectionFailed,
        }
    }

    /// Connection-level failures are the ones a circuit breaker should count
    /// and that make an auto-reconnect worthwhile.
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }
}

/// Top-level error returned by the public telemetry API.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid event: {0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("circuit breaker for {component} is open, store access rejected")]
    CircuitOpen { component: &'static str },

    #[error("failed to track bot trigger for '{bot_name}': {source}")]
    Tracking {
        bot_name: String,
        #[source]
        source: StoreError,
    },

    #[error("event tracker is shut down")]
    ShutDown,

    #[error("batch of {} events failed ({successful} ok, {failed} failed): {message}", .successful + .failed)]
    BatchProcessing {
        message: String,
        successful: usize,
        failed: usize,
    },

    #[error("{operation} failed: {message}")]
    Analytics {
        operation: &'static str,
        message: String,
    },

    #[error("metrics export failed: {0}")]
    Export(String),

    #[error("cleanup failed: {0}")]
    Cleanup(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl TelemetryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TelemetryError::Validation(_) => ErrorCode::ValidationFailed,
            TelemetryError::Store(e) => e.code(),
            TelemetryError::CircuitOpen { .. } => ErrorCode::StoreConnectionFailed,
            TelemetryError::Tracking { .. } | TelemetryError::ShutDown => ErrorCode::TrackingFailed,
            TelemetryError::BatchProcessing { .. } => ErrorCode::BatchProcessingFailed,
            TelemetryError::Analytics { .. } => ErrorCode::AnalyticsFailed,
            TelemetryError::Export(_) => ErrorCode::ExportFailed,
            TelemetryError::Cleanup(_) => ErrorCode::CleanupFailed,
            TelemetryError::Config(_) => ErrorCode::ConfigInvalid,
            TelemetryError::Metrics(_) => ErrorCode::MetricsRegistryFailed,
        }
    }

    pub(crate) fn analytics(operation: &'static str, message: impl Into<String>) -> Self {
        TelemetryError::Analytics {
            operation,
            message: message.into(),
        }
    }
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_codes() {
        assert_eq!(
            StoreError::ScriptUnavailable("NOSCRIPT".into()).code(),
            ErrorCode::ScriptExecutionFailed
        );
        assert_eq!(
            StoreError::Script("ERR user_script:1".into()).code(),
            ErrorCode::ScriptExecutionFailed
        );
        assert_eq!(
            StoreError::Connection("refused".into()).code(),
            ErrorCode::StoreConnectionFailed
        );
        assert!(StoreError::Timeout(50).is_connection());
        assert!(!StoreError::Command("ERR".into()).is_connection());
    }

    #[test]
    fn test_telemetry_error_codes() {
        let err = TelemetryError::BatchProcessing {
            message: "down".into(),
            successful: 0,
            failed: 5,
        };
        assert_eq!(err.code(), ErrorCode::BatchProcessingFailed);
        assert!(err.to_string().contains("batch of 5 events"));

        let err = TelemetryError::analytics("get_bot_metrics", "bot name is required");
        assert_eq!(err.code().as_str(), "ANALYTICS_FAILED");
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::ValidationFailed).unwrap();
        assert_eq!(json, "\"VALIDATION_FAILED\"");
    }
}
