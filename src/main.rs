use std::fs;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::program::Program;
use crate::uplink::{UplinkConfig, global_lifecycle};

mod program;
mod uplink;

#[tokio::main]
async fn main() -> Result<()> {
    let config = UplinkConfig::load_or_default("config.toml");
    let _log_guard = init_tracing(&config)?;

    let lifecycle =
        global_lifecycle(config).context("failed to build the HTTP client")?;

    Program::new(lifecycle).run().await
}

/// Console layer plus an optional daily-rolling file layer. The returned
/// guard must outlive the program so buffered log lines get flushed.
fn init_tracing(config: &UplinkConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.log_level))
        .context("invalid log level")?;

    let console_layer = tracing_subscriber::fmt::layer();

    if config.logging.log_to_file {
        fs::create_dir_all(&config.logging.log_directory)?;
        let appender =
            tracing_appender::rolling::daily(&config.logging.log_directory, "media_uplink.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .with(file_layer)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .init();
        Ok(None)
    }
}
