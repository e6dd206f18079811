#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use bot_telemetry::observability::{self, TracingConfig};
use bot_telemetry::{
    EventTracker, HealthReporter, MemoryStore, MetricsExporter, MetricsServer, RedisStore, Store,
    TelemetryConfig,
};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const REDIS_URL_ENV: &str = "BOT_TELEMETRY_REDIS_URL";

struct Args {
    config_path: Option<String>,
    memory: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config_path: None,
        memory: false,
    };
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--memory" => args.memory = true,
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}")),
            path if args.config_path.is_none() => args.config_path = Some(path.to_string()),
            extra => return Err(format!("unexpected argument {extra}")),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = parse_args().map_err(|e| format!("{e}\nusage: bot-telemetry [config.toml] [--memory]"))?;
    observability::init_tracing(&TracingConfig::from_env())?;

    let mut config = match &args.config_path {
        Some(path) => TelemetryConfig::from_file(path)?,
        None => TelemetryConfig::default(),
    };
    if let Ok(url) = std::env::var(REDIS_URL_ENV) {
        config.store.url = url;
    }

    let cancel = CancellationToken::new();
    let mut sweeper = None;
    let store: Arc<dyn Store> = if args.memory {
        let memory = MemoryStore::new();
        sweeper = Some(memory.spawn_ttl_sweeper(Duration::from_secs(1), cancel.child_token()));
        info!("using in-process store");
        Arc::new(memory)
    } else {
        info!(url = %config.store.url, "using redis store");
        Arc::new(RedisStore::new(config.store.clone()))
    };

    let registry = Registry::new();
    let tracker = EventTracker::new(
        store.clone(),
        config.tracker.clone(),
        config.retention.clone(),
        &registry,
    )?;
    if let Err(e) = tracker.initialize().await {
        // flushes reconnect on their own once the store is back
        warn!(error = %e, "store unavailable at startup");
    }

    let exporter = MetricsExporter::new(store.clone(), config.exporter.clone(), &registry)?;
    exporter.start();

    let health = Arc::new(HealthReporter::new(
        store.clone(),
        tracker.clone(),
        exporter.clone(),
        config.health.clone(),
    ));
    let server = MetricsServer::bind(&config.server.listen_addr, exporter.clone(), health).await?;
    let server_task = tokio::spawn(server.run(cancel.child_token()));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();

    if let Err(e) = server_task.await {
        error!(error = %e, "metrics server task failed");
    }
    exporter.shutdown().await;
    if let Err(e) = tracker.shutdown().await {
        error!(error = %e, code = %e.code(), "tracker shutdown incomplete");
    }
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    observability::shutdown();
    Ok(())
}
