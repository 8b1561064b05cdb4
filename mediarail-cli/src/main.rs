//! Mediarail CLI - Command-line interface
//!
//! Command-line access to the ingestion pipeline: upload videos into the
//! asset library, list and edit catalog records, and resolve playback URLs.

mod commands;

use clap::Parser;
use mediarail_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "mediarail")]
#[command(about = "Video asset ingestion and playback resolution")]
struct Cli {
    /// Console log verbosity (full debug log always goes to logs/)
    #[arg(long, default_value = "warn")]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), None) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = commands::handle_command(cli.command).await {
        tracing::error!("command failed: {e}");
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}
