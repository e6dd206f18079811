//! Tracing configuration, read from the standard Datadog environment variables.

use std::env;

#[derive(Debug, Clone, PartialEq)]
pub struct TracingConfig {
    pub service_name: String,
    pub env: String,
    pub version: String,
    /// APM agent endpoint, only used with the `datadog` feature
    pub trace_addr: String,
    pub trace_sample_rate: f64,
    /// Emit JSON log lines so the agent can correlate logs with traces
    pub json_logs: bool,
    /// Fallback filter when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        TracingConfig {
            service_name: "bot-telemetry".to_string(),
            env: "development".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            trace_addr: "http://127.0.0.1:8126".to_string(),
            trace_sample_rate: 1.0,
            json_logs: false,
            default_filter: "info".to_string(),
        }
    }
}

impl TracingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        TracingConfig {
            service_name: env::var("DD_SERVICE").unwrap_or(defaults.service_name),
            env: env::var("DD_ENV").unwrap_or(defaults.env),
            version: env::var("DD_VERSION").unwrap_or(defaults.version),
            trace_addr: env::var("DD_TRACE_AGENT_URL").unwrap_or(defaults.trace_addr),
            trace_sample_rate: env::var("DD_TRACE_SAMPLE_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|rate: f64| rate.clamp(0.0, 1.0))
                .unwrap_or(defaults.trace_sample_rate),
            json_logs: env::var("DD_LOGS_INJECTION")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            default_filter: defaults.default_filter,
        }
    }
}
