mod bootstrap;
mod health;

use anyhow::Result;
use greeter_core::config::{AppConfig, LoadOptions};
use greeter_core::InteractionStore;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use greeter_core::config::LogFormat::*;

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging depends on config, so config errors surface on stderr via anyhow.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(&app.config.server.bind_address, app.config.server.port, app.store.clone())
        .await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        channel_id = %app.config.slack.channel_id,
        "greeter-server started"
    );

    tokio::select! {
        result = app.runner.start() => {
            result?;
            tracing::warn!(
                event_name = "system.server.runner_stopped",
                correlation_id = "runtime",
                "socket mode runner stopped; waiting for shutdown signal"
            );
            wait_for_shutdown().await?;
        }
        signal = wait_for_shutdown() => signal?,
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        user_count = app.store.len(),
        "greeter-server stopping; flushing interaction store"
    );
    app.store.save();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
