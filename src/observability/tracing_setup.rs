//! Subscriber setup.
//!
//! Always installs an `EnvFilter` plus a fmt layer (plain or JSON). With the
//! `datadog` feature an OpenTelemetry layer exporting to the Datadog agent is
//! added on top.

use super::config::TracingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub type InitError = Box<dyn std::error::Error + Send + Sync>;

fn env_filter(config: &TracingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_filter))
}

#[cfg(not(feature = "datadog"))]
pub fn init(config: &TracingConfig) -> Result<(), InitError> {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

#[cfg(feature = "datadog")]
pub fn init(config: &TracingConfig) -> Result<(), InitError> {
    use opentelemetry_datadog::DatadogPropagator;
    use opentelemetry_sdk::trace::Sampler;

    opentelemetry::global::set_text_map_propagator(DatadogPropagator::default());

    let tracer = opentelemetry_datadog::new_pipeline()
        .with_service_name(&config.service_name)
        .with_agent_endpoint(&config.trace_addr)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::TraceIdRatioBased(config.trace_sample_rate))
                .with_resource(opentelemetry_sdk::Resource::new(vec![
                    opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
                    opentelemetry::KeyValue::new("service.version", config.version.clone()),
                    opentelemetry::KeyValue::new("deployment.environment", config.env.clone()),
                ])),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    // fmt before otel so spans are logged before export
    let registry = tracing_subscriber::registry().with(env_filter(config));
    if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .with(otel_layer)
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .with(otel_layer)
            .try_init()?;
    }

    tracing::info!(
        service = %config.service_name,
        env = %config.env,
        version = %config.version,
        sample_rate = %config.trace_sample_rate,
        "Datadog tracing initialized"
    );
    Ok(())
}

/// Flush pending spans before exit
pub fn shutdown() {
    #[cfg(feature = "datadog")]
    {
        tracing::info!("Shutting down Datadog tracing...");
        opentelemetry::global::shutdown_tracer_provider();
    }
}
