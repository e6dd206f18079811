//! Logging and tracing.
//!
//! Structured logs go through `tracing`; [`init_tracing`] installs the
//! subscriber. Build with `--features datadog` to also export spans to the
//! Datadog APM agent.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `info` | Log filter |
//! | `DD_SERVICE` | `bot-telemetry` | Service name |
//! | `DD_ENV` | `development` | Environment tag |
//! | `DD_VERSION` | pkg version | Service version |
//! | `DD_TRACE_AGENT_URL` | `http://127.0.0.1:8126` | APM agent URL |
//! | `DD_TRACE_SAMPLE_RATE` | `1.0` | Trace sampling rate |
//! | `DD_LOGS_INJECTION` | `false` | JSON log lines |

pub mod config;
pub mod spans;
pub mod tracing_setup;

pub use config::TracingConfig;
pub use spans::*;
pub use tracing_setup::{init as init_tracing, shutdown};
