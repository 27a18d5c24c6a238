//! Trace process entry point.
//!
//! Startup order: logging, environment, configuration, context (database,
//! migrations, default blocklist), services (capture, workers, schedulers,
//! supervisor, startup backfill), then the IPC loop on stdin/stdout. EOF on
//! stdin triggers a clean shutdown. Exit code 0 on clean shutdown, 1 on
//! fatal initialization failure.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;
use trace_app::context::AppContext;
use trace_app::ipc::run_server;
use trace_app::services::ServiceSet;
use trace_domain::config::TraceConfig;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,trace_core=info,trace_infra=info"));

    // Stdout carries the IPC protocol; logs go to stderr only.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    // .env is optional; the environment always wins.
    let _ = dotenvy::dotenv();

    let config_path = std::env::var("TRACE_CONFIG")
        .map(PathBuf::from)
        .ok()
        .or_else(|| Some(default_config_path()));
    let config = TraceConfig::load(config_path.as_deref()).context("configuration load failed")?;

    tracing::info!(
        data_dir = %config.data_dir.display(),
        summarization = config.summarization_enabled(),
        "starting trace"
    );

    let context =
        Arc::new(AppContext::initialize(config).context("context initialization failed")?);
    let service_set = ServiceSet::start(Arc::clone(&context))
        .await
        .context("service startup failed")?;

    let result = run_server(
        Arc::clone(&context),
        &service_set,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await;

    service_set.shutdown().await;

    match result {
        Ok(()) => {
            tracing::info!("clean shutdown");
            Ok(())
        }
        Err(err) => Err(anyhow::anyhow!("ipc loop failed: {err}")),
    }
}

fn default_config_path() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join("Trace").join("config.toml"))
        .unwrap_or_else(|_| PathBuf::from("trace.toml"))
}
