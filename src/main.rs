//! PrintFix CLI entry point.

use clap::Parser;

use printfix::cli::{handle_error, Cli, Commands};
use printfix::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };
    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Init(args) => printfix::cli::commands::init::execute(args, cli.json).await,
        Commands::Job(args) => printfix::cli::commands::job::execute(args, &config, cli.json).await,
        Commands::Worker(args) => printfix::cli::commands::worker::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
