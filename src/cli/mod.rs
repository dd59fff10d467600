//! Command-line interface.

pub mod commands;
pub mod id_resolver;
pub mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;

use crate::adapters::sqlite::initialize_database;
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Parser, Debug)]
#[command(name = "printfix", version, about = "Drive documents through diagnose, fix and verify until they are print-ready")]
pub struct Cli {
    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    pub json: bool,

    /// Read configuration from this file instead of .printfix/
    #[arg(long, global = true, env = "PRINTFIX_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the project directory, config file and job database
    Init(commands::init::InitArgs),
    /// Submit, inspect and review jobs
    Job(commands::job::JobArgs),
    /// Process jobs
    Worker(commands::worker::WorkerArgs),
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => ConfigLoader::load_from_file(path),
            None => ConfigLoader::load(),
        }
    }
}

/// Open the job database named in `config`.
pub async fn open_database(config: &Config) -> Result<SqlitePool> {
    initialize_database(&config.database)
        .await
        .with_context(|| format!("Failed to open database at {}. Run 'printfix init' first.", config.database.path))
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "caused_by": chain,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
