//! Worker CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::sync::Arc;
use tracing::info;

use crate::adapters::http::{
    HttpDiagnosisProvider, HttpRationaleProvider, HttpRenderer, HttpToolExecutor, ServiceClient, ServiceClientConfig,
};
use crate::adapters::mock::{MockRenderer, MockToolExecutor, ScriptedDiagnosisProvider, StaticRationaleProvider};
use crate::adapters::sqlite::SqliteJobRepository;
use crate::cli::open_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::{
    CancellationRegistry, Collaborators, JobRunner, JobStateMachine, WorkerPool, WorkerPoolConfig, WorkerSummary,
};

#[derive(Args, Debug)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommands {
    /// Process jobs until interrupted
    Run {
        /// Jobs processed at the same time (overrides worker.concurrency)
        #[arg(short, long)]
        concurrency: Option<usize>,
        /// Process the jobs that are runnable now, then exit
        #[arg(long)]
        once: bool,
        /// Use in-process diagnosis, tool and render services
        #[arg(long)]
        mock: bool,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct WorkerOutput {
    pub summary: WorkerSummary,
}

impl CommandOutput for WorkerOutput {
    fn to_human(&self) -> String {
        let s = &self.summary;
        format!(
            "Processed {} job(s): {} done, {} needs review, {} failed, {} cancelled, {} error(s)",
            s.processed, s.done, s.needs_review, s.failed, s.cancelled, s.errors
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.summary).unwrap_or_default()
    }
}

fn mock_collaborators() -> Collaborators {
    Collaborators {
        diagnosis: Arc::new(ScriptedDiagnosisProvider::demo()),
        tools: Arc::new(MockToolExecutor::new()),
        renderer: Arc::new(MockRenderer::default()),
        rationale: Some(Arc::new(StaticRationaleProvider::new())),
    }
}

fn http_collaborators(config: &Config) -> Result<Collaborators> {
    let client = Arc::new(
        ServiceClient::new(ServiceClientConfig::from_config(config)).context("Failed to build service client")?,
    );
    info!(base_url = %client.base_url(), "Using document services");
    Ok(Collaborators {
        diagnosis: Arc::new(HttpDiagnosisProvider::new(Arc::clone(&client))),
        tools: Arc::new(HttpToolExecutor::new(Arc::clone(&client))),
        renderer: Arc::new(HttpRenderer::new(Arc::clone(&client))),
        rationale: Some(Arc::new(HttpRationaleProvider::new(client))),
    })
}

pub async fn execute(args: WorkerArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        WorkerCommands::Run { concurrency, once, mock } => {
            let pool = open_database(config).await?;
            let repo = Arc::new(SqliteJobRepository::new(pool));
            let machine = JobStateMachine::new(Arc::clone(&repo), CancellationRegistry::new());

            let collaborators = if mock {
                mock_collaborators()
            } else {
                http_collaborators(config)?
            };
            let runner = JobRunner::from_config(machine, config, collaborators).context("Failed to build job runner")?;

            let mut pool_config = WorkerPoolConfig::from(&config.worker);
            if let Some(n) = concurrency {
                pool_config.concurrency = n.max(1);
            }
            let workers = WorkerPool::new(Arc::new(runner), repo, pool_config);

            let summary = if once {
                workers.run_once().await?
            } else {
                let shutdown = workers.shutdown_handle();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Interrupt received, finishing in-flight jobs");
                        let _ = shutdown.send(());
                    }
                });
                workers.run().await?
            };

            output(&WorkerOutput { summary }, json_mode);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{JobFilter, JobState};
    use crate::services::{JobService, SubmitRequest};
    use std::io::Write;

    #[tokio::test]
    async fn test_run_once_with_mock_services() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = dir.path().join("jobs.db").display().to_string();

        let file_path = dir.path().join("flyer.pdf");
        std::fs::File::create(&file_path)
            .unwrap()
            .write_all(b"%PDF-1.7 flyer")
            .unwrap();

        let pool = open_database(&config).await.unwrap();
        let repo = Arc::new(SqliteJobRepository::new(pool));
        let service = JobService::new(
            JobStateMachine::new(repo, CancellationRegistry::new()),
            config.ingestion.clone(),
            config.gating,
        );
        let job = service.submit(SubmitRequest::new(&file_path)).await.unwrap();

        let args = WorkerArgs {
            command: WorkerCommands::Run {
                concurrency: Some(1),
                once: true,
                mock: true,
            },
        };
        execute(args, &config, true).await.unwrap();

        let job = service.get(job.id).await.unwrap();
        assert!(
            matches!(job.state, JobState::Done | JobState::NeedsReview),
            "job left in {}",
            job.state
        );
        assert_eq!(service.list(JobFilter::default()).await.unwrap().len(), 1);
    }
}
