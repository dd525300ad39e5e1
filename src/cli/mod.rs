//! Operator CLI for the Bulwark protection core.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(about = "Bulwark - execution protection for agent orchestration", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .bulwark/config.yaml + .bulwark/local.yaml)
    #[arg(short, long, global = true, env = "BULWARK_CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sample resources once and show the composite security status
    Status(commands::status::StatusArgs),

    /// Drive synthetic executions through the protection core
    Simulate(commands::simulate::SimulateArgs),

    /// Configuration commands
    Config(commands::config::ConfigArgs),
}

/// Load configuration from an explicit file or the project search path.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Print an error in the selected output mode and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "error": err.to_string(),
            "causes": chain,
        });
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_else(|_| err.to_string())
        );
    } else {
        eprintln!("{} {err:#}", console::style("error:").red().bold());
    }
    std::process::exit(1)
}
