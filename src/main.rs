use clap::Parser;
use snafu::prelude::*;

mod app;
mod baseline_service;
mod blast_radius;
mod cmd;
mod config;
mod discovery;
mod endpoints;
mod events;
mod execution;
mod http;
mod model;
mod orchestrator;
mod registry;
mod repository;
mod schedule;
mod versioning;
mod watcher;
mod yaml;

use cmd::{handle_serve, ServeArgs};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Serve error: {source}"))]
    Serve { source: cmd::serve::Error },
}

#[derive(Parser, Debug)]
#[command(name = "waygate")]
#[command(author = "Waygate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "A workflow orchestration gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway HTTP server and its background loops
    Serve(ServeArgs),
}

fn init_tracing() {
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => handle_serve(args).await.context(ServeSnafu),
    }
}
