//! Implementation of the `printfix init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, DatabaseConfig};
use crate::infrastructure::config::PROJECT_DIR;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub config_written: bool,
    pub database_path: Option<PathBuf>,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if self.config_written {
            lines.push(format!("\nWrote {PROJECT_DIR}/config.yaml"));
        }
        if let Some(db) = &self.database_path {
            lines.push(format!("Database initialized at {}", db.display()));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let project_dir = target_path.join(PROJECT_DIR);
    let config_path = project_dir.join("config.yaml");

    if config_path.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to rewrite the config.".to_string(),
            initialized_path: target_path,
            config_written: false,
            database_path: None,
        };
        output(&output_data, json_mode);
        return Ok(());
    }

    fs::create_dir_all(project_dir.join("logs"))
        .await
        .with_context(|| format!("Failed to create {}", project_dir.display()))?;

    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize default config")?;
    fs::write(&config_path, yaml)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    // The stored path stays relative; open it from the target directory here.
    let db_path = target_path.join(&config.database.path);
    let database = DatabaseConfig {
        path: db_path.display().to_string(),
        ..config.database.clone()
    };
    let pool = initialize_database(&database).await.context("Failed to initialize database")?;
    pool.close().await;

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        config_written: true,
        database_path: Some(db_path),
    };
    output(&output_data, json_mode);
    Ok(())
}
