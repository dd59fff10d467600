//! Common test utilities for integration tests
//!
//! Builds a file-backed job store, a runner over in-process collaborators,
//! and uploaded documents in a temporary directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use printfix::adapters::mock::{MockRenderer, MockToolExecutor, ScriptedDiagnosisProvider};
use printfix::adapters::sqlite::{initialize_database, SqliteJobRepository};
use printfix::domain::models::{Config, Issue, IssueSource, IssueType, Severity};
use printfix::services::{CancellationRegistry, Collaborators, JobRunner, JobService, JobStateMachine};

pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
    pub repo: Arc<SqliteJobRepository>,
    pub service: JobService<SqliteJobRepository>,
}

impl TestEnv {
    /// Fresh database under a temp dir; the diagnosis cache is off so
    /// scripted providers see every call.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.database.path = dir.path().join("printfix.db").display().to_string();
        config.cache.enabled = false;
        adjust(&mut config);

        let pool = initialize_database(&config.database)
            .await
            .expect("Failed to initialize database");
        let repo = Arc::new(SqliteJobRepository::new(pool));
        let service = JobService::new(
            JobStateMachine::new(Arc::clone(&repo), CancellationRegistry::new()),
            config.ingestion.clone(),
            config.gating,
        );
        Self {
            dir,
            config,
            repo,
            service,
        }
    }

    /// Write an upload into the temp dir.
    pub fn upload(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, bytes).expect("Failed to write upload");
        path
    }

    pub fn pdf(&self, name: &str) -> PathBuf {
        self.upload(name, format!("%PDF-1.7 {name}").as_bytes())
    }

    pub fn runner(&self, collaborators: Collaborators) -> JobRunner<SqliteJobRepository> {
        let machine = JobStateMachine::new(Arc::clone(&self.repo), CancellationRegistry::new());
        JobRunner::from_config(machine, &self.config, collaborators).expect("Failed to build runner")
    }
}

pub fn collaborators(
    diagnosis: ScriptedDiagnosisProvider,
    tools: Arc<MockToolExecutor>,
    renderer: MockRenderer,
) -> Collaborators {
    Collaborators {
        diagnosis: Arc::new(diagnosis),
        tools,
        renderer: Arc::new(renderer),
        rationale: None,
    }
}

pub fn missing_font(font: &str) -> Issue {
    Issue::new(
        IssueType::NonEmbeddedFont,
        Severity::Critical,
        IssueSource::Structural,
        format!("{font} is not embedded"),
    )
    .at(font)
}
