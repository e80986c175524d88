mod auth;
mod config;
mod infrastructure;
mod protocol;
mod session;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use self::config::ServerConfig;
use self::infrastructure::service_provider::ServiceProvider;

/// Loads `ServerConfig` from an optional `config.{yaml,toml,json}` in the
/// working directory, layered with `TRANSCRIBE__`-prefixed environment
/// variables (e.g. `TRANSCRIBE__SCHEDULER__MAX_CONCURRENT_TASKS=8`), the
/// same two-source layering the teacher's `build_config` does for its own
/// `agent`/`common` sections.
fn load_config() -> anyhow::Result<ServerConfig> {
    let path_override = std::env::args().skip_while(|a| a != "--config").nth(1);
    let mut builder = ::config::Config::builder();
    builder = match &path_override {
        Some(path) => builder.add_source(::config::File::with_name(path)),
        None => builder.add_source(::config::File::with_name("config").required(false)),
    };
    let settings = builder
        .add_source(::config::Environment::with_prefix("TRANSCRIBE").separator("__"))
        .build()
        .context("failed to build configuration")?;
    settings.try_deserialize().context("failed to deserialize configuration")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().context("configuration error")?;
    let sp = ServiceProvider::build(config).await.context("failed to initialize services")?;

    let services = sp.background_services();
    let handles: Vec<_> = services.into_iter().map(|service| tokio::spawn(async move { service.run().await })).collect();

    tracing::info!("transcription service started");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, draining workers");

    sp.task_manager_impl.shutdown().await;
    if let Err(e) = sp.result_cache.flush() {
        tracing::warn!(error = %e, "failed to flush result cache during shutdown");
    }
    for handle in handles {
        handle.abort();
    }

    tracing::info!("shutdown complete");
    Ok(())
}
