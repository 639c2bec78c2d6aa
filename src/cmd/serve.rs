//! The `serve` subcommand: loads [`WaygateConfig`], builds the
//! [`Application`](crate::app::Application) and runs it until SIGINT
//! or SIGTERM.

use clap::Parser;
use snafu::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::config::WaygateConfig;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: config::ConfigError },

    #[snafu(display("Server error: {message}"))]
    Server { message: String },

    #[snafu(display("Failed to install signal handler: {source}"))]
    Signal { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Bind address, overriding `server.bindAddr` from configuration.
    #[arg(long, value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Resource directory to seed the reference registry from,
    /// overriding `registry.resourceDir`.
    #[arg(long, value_name = "DIR")]
    pub resource_dir: Option<String>,
}

async fn wait_for_shutdown_signal() -> std::result::Result<(), std::io::Error> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = ctrl_c => result?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await
    }
}

pub async fn handle_serve(args: ServeArgs) -> Result<()> {
    let mut config = WaygateConfig::load().context(ConfigSnafu)?;
    if let Some(bind_addr) = args.bind_addr {
        config.server.bind_addr = bind_addr;
    }
    if let Some(resource_dir) = args.resource_dir {
        config.registry.resource_dir = Some(resource_dir);
    }

    tracing::info!(bind_addr = %config.server.bind_addr, "starting waygate");

    let cancellation = CancellationToken::new();
    let shutdown_token = cancellation.clone();
    tokio::spawn(async move {
        if let Err(err) = wait_for_shutdown_signal().await {
            tracing::warn!(error = %err, "failed to wait on shutdown signal");
        }
        tracing::info!("shutdown signal received, draining in-flight work");
        shutdown_token.cancel();
    });

    crate::app::run(&config, cancellation)
        .await
        .map_err(|err| Error::Server { message: err.to_string() })
}
