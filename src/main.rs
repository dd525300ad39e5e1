//! Bulwark CLI entry point.

use clap::Parser;

use bulwark::cli::{handle_error, load_config, Cli, Commands};
use bulwark::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&config.logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Status(args) => {
            bulwark::cli::commands::status::execute(args, &config, cli.json).await
        }
        Commands::Simulate(args) => {
            bulwark::cli::commands::simulate::execute(args, &config, cli.json).await
        }
        Commands::Config(args) => {
            bulwark::cli::commands::config::execute(args, &config, cli.json).await
        }
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
