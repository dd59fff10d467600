//! Drives one job from wherever it is persisted to the next state that needs
//! an operator (or to a terminal state).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::cache::DiagnosisCache;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Config, DiagnosisPhase, Job, JobState, StateUpdate};
use crate::domain::ports::{DiagnosisProvider, JobRepository, LoopProgress, RationaleProvider, Renderer, ToolExecutor};
use crate::services::diagnosis_service::DiagnosisService;
use crate::services::ingestion::IngestionPipeline;
use crate::services::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::services::state_machine::JobStateMachine;
use crate::services::tool_registry::ToolRegistry;
use crate::services::verifier::Verifier;

/// External services a runner talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub diagnosis: Arc<dyn DiagnosisProvider>,
    pub tools: Arc<dyn ToolExecutor>,
    pub renderer: Arc<dyn Renderer>,
    pub rationale: Option<Arc<dyn RationaleProvider>>,
}

pub struct JobRunner<R: JobRepository> {
    machine: JobStateMachine<R>,
    ingestion: IngestionPipeline<R>,
    diagnosis: Arc<DiagnosisService>,
    orchestrator: Orchestrator<R>,
    verifier: Verifier<R>,
    max_conflict_retries: u32,
}

impl<R: JobRepository> JobRunner<R> {
    pub fn new(
        machine: JobStateMachine<R>,
        ingestion: IngestionPipeline<R>,
        diagnosis: Arc<DiagnosisService>,
        orchestrator: Orchestrator<R>,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            verifier: Verifier::new(machine.clone()),
            machine,
            ingestion,
            diagnosis,
            orchestrator,
            max_conflict_retries,
        }
    }

    /// Wire a runner from configuration.
    ///
    /// The rationale provider is only consulted when `planner.explain_decisions` is set.
    pub fn from_config(machine: JobStateMachine<R>, config: &Config, collaborators: Collaborators) -> DomainResult<Self> {
        let registry = Arc::new(ToolRegistry::builtin()?);
        let diagnosis = Arc::new(DiagnosisService::new(
            collaborators.diagnosis,
            DiagnosisCache::new(&config.cache),
            Duration::from_secs(config.providers.diagnosis_timeout_secs),
        ));
        let settings = OrchestratorSettings::from_config(config);
        let ingestion = IngestionPipeline::new(
            machine.clone(),
            Arc::clone(&collaborators.renderer),
            config.ingestion.clone(),
            settings.render_timeout,
        );

        let mut orchestrator = Orchestrator::new(
            machine.clone(),
            Arc::clone(&diagnosis),
            registry,
            collaborators.tools,
            collaborators.renderer,
            settings,
        );
        if let Some(rationale) = collaborators.rationale.filter(|_| config.planner.explain_decisions) {
            orchestrator = orchestrator.with_rationale_provider(rationale);
        }

        Ok(Self::new(machine, ingestion, diagnosis, orchestrator, config.worker.max_conflict_retries))
    }

    /// Run a job until it needs input or finishes.
    ///
    /// Returns `None` when the job was deleted before or during the run.
    /// Unrecoverable errors move the job to `failed` and are not returned.
    #[instrument(skip(self))]
    pub async fn run(&self, job_id: Uuid) -> DomainResult<Option<Job>> {
        let repo = self.machine.repository();
        let token = self.machine.cancellations().register(job_id);
        let mut conflicts = 0;

        let outcome = loop {
            let Some(job) = repo.get(job_id).await? else {
                debug!("Job no longer exists");
                break Ok(None);
            };

            match self.drive(job).await {
                Ok(job) => break Ok(Some(job)),
                Err(DomainError::StateConflict { expected, actual, .. }) if conflicts < self.max_conflict_retries => {
                    conflicts += 1;
                    debug!(%expected, ?actual, attempt = conflicts, "State changed underneath, re-reading job");
                }
                Err(DomainError::Cancelled(_)) => {
                    info!("Job cancelled");
                    break Ok(None);
                }
                Err(e) => break self.fail(job_id, e).await,
            }
        };

        if token.is_cancelled() {
            debug!("Job was deleted while held");
        }
        self.machine.cancellations().release(job_id);
        outcome
    }

    async fn drive(&self, mut job: Job) -> DomainResult<Job> {
        loop {
            job = match job.state {
                JobState::Uploaded | JobState::Ingesting | JobState::Converting | JobState::Rendering => {
                    self.ingestion.run(job).await?
                }
                JobState::Ingested => {
                    self.machine
                        .advance(job.id, JobState::Ingested, JobState::Diagnosing, StateUpdate::default())
                        .await?
                }
                JobState::Diagnosing => self.initial_diagnosis(&job).await?,
                JobState::Diagnosed if !job.options.auto_fix => {
                    info!(job_id = %job.id, "Automatic fixing disabled, holding at diagnosed");
                    return Ok(job);
                }
                JobState::Diagnosed => {
                    self.machine
                        .advance(job.id, JobState::Diagnosed, JobState::Fixing, StateUpdate::fresh_loop())
                        .await?
                }
                JobState::Fixing => self.orchestrator.run(&job).await?,
                JobState::Verifying => self.verifier.run(&job).await?,
                JobState::Done | JobState::NeedsReview | JobState::Failed => return Ok(job),
            };
        }
    }

    async fn initial_diagnosis(&self, job: &Job) -> DomainResult<Job> {
        let document = job
            .documents
            .deliverable()
            .ok_or_else(|| DomainError::Validation(format!("job {} has no document to diagnose", job.id)))?;

        let diagnosis = self
            .diagnosis
            .diagnose(document, &job.documents.current_render, job.effort)
            .await
            .for_job(job.id, job.iteration, DiagnosisPhase::Initial);
        self.machine.cancellations().check(job.id)?;

        let repo = self.machine.repository();
        let gone = |e: DomainError| match e {
            DomainError::JobNotFound(id) => DomainError::Cancelled(id),
            other => other,
        };
        repo.append_diagnosis(job.id, &diagnosis).await.map_err(gone)?;
        let progress = LoopProgress {
            iteration: job.iteration,
            documents: job.documents.clone(),
            issues_found: u32::try_from(diagnosis.issues.len()).unwrap_or(u32::MAX),
            fixes_applied: job.fixes_applied,
            fixes_failed: job.fixes_failed,
        };
        repo.record_progress(job.id, &progress).await.map_err(gone)?;

        info!(
            job_id = %job.id,
            issues = diagnosis.issues.len(),
            critical = diagnosis.summary.critical,
            degraded = diagnosis.is_degraded(),
            "Initial diagnosis recorded"
        );
        self.machine
            .advance(job.id, JobState::Diagnosing, JobState::Diagnosed, StateUpdate::default())
            .await
    }

    async fn fail(&self, job_id: Uuid, error: DomainError) -> DomainResult<Option<Job>> {
        let Some(job) = self.machine.repository().get(job_id).await? else {
            return Ok(None);
        };
        if job.state.is_terminal() {
            warn!(job_id = %job_id, state = %job.state, error = %error, "Error after job finished");
            return Ok(Some(job));
        }

        match self.machine.fail(job_id, job.state, &error).await {
            Ok(job) => Ok(Some(job)),
            Err(DomainError::Cancelled(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
