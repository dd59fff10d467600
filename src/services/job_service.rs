//! Job lifecycle API: submission, queries and operator actions.

use std::path::PathBuf;

use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Aggressiveness, Diagnosis, Effort, Fix, GatingPolicy, IngestionConfig, Job, JobFilter, JobOptions, JobState,
    OrchestrationResult, StateUpdate, VerificationResult,
};
use crate::domain::ports::JobRepository;
use crate::services::ingestion::inspect_file;
use crate::services::state_machine::JobStateMachine;

/// Everything needed to create a job.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub path: PathBuf,
    pub effort: Effort,
    pub aggressiveness: Aggressiveness,
    pub options: JobOptions,
}

impl SubmitRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            effort: Effort::default(),
            aggressiveness: Aggressiveness::default(),
            options: JobOptions::default(),
        }
    }

    pub fn with_effort(mut self, effort: Effort) -> Self {
        self.effort = effort;
        self
    }

    pub fn with_aggressiveness(mut self, aggressiveness: Aggressiveness) -> Self {
        self.aggressiveness = aggressiveness;
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

pub struct JobService<R: JobRepository> {
    machine: JobStateMachine<R>,
    ingestion: IngestionConfig,
    gating: GatingPolicy,
}

impl<R: JobRepository> JobService<R> {
    pub fn new(machine: JobStateMachine<R>, ingestion: IngestionConfig, gating: GatingPolicy) -> Self {
        Self {
            machine,
            ingestion,
            gating,
        }
    }

    /// Validate the file and create a job in `uploaded`.
    ///
    /// The gating policy in force now is copied onto the job.
    pub async fn submit(&self, request: SubmitRequest) -> DomainResult<Job> {
        let file = inspect_file(&request.path, &self.ingestion).await?;
        let job = Job::new(file.source(), request.effort, request.aggressiveness, self.gating)
            .with_options(request.options);
        self.machine.repository().create(&job).await?;

        info!(
            job_id = %job.id,
            file = %job.source.original_filename,
            format = %file.format,
            effort = %job.effort,
            aggressiveness = %job.aggressiveness,
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn get(&self, id: Uuid) -> DomainResult<Job> {
        self.machine
            .repository()
            .get(id)
            .await?
            .ok_or(DomainError::JobNotFound(id))
    }

    pub async fn list(&self, filter: JobFilter) -> DomainResult<Vec<Job>> {
        self.machine.repository().list(filter).await
    }

    /// Latest diagnosis, if any.
    pub async fn diagnosis(&self, id: Uuid) -> DomainResult<Option<Diagnosis>> {
        self.get(id).await?;
        self.machine.repository().latest_diagnosis(id).await
    }

    /// Full diagnosis history, oldest first.
    pub async fn diagnoses(&self, id: Uuid) -> DomainResult<Vec<Diagnosis>> {
        self.get(id).await?;
        self.machine.repository().list_diagnoses(id).await
    }

    pub async fn fixes(&self, id: Uuid) -> DomainResult<Vec<Fix>> {
        self.get(id).await?;
        self.machine.repository().list_fixes(id).await
    }

    pub async fn orchestration(&self, id: Uuid) -> DomainResult<Option<OrchestrationResult>> {
        Ok(self.get(id).await?.orchestration)
    }

    pub async fn verification(&self, id: Uuid) -> DomainResult<Option<VerificationResult>> {
        Ok(self.get(id).await?.verification)
    }

    /// Accept a job held for review.
    pub async fn approve(&self, id: Uuid) -> DomainResult<Job> {
        self.operator_transition(id, &[JobState::NeedsReview], JobState::Done, StateUpdate::default())
            .await
    }

    /// Send a reviewed job back through a fresh fix loop.
    pub async fn reject(&self, id: Uuid) -> DomainResult<Job> {
        self.operator_transition(id, &[JobState::NeedsReview], JobState::Fixing, StateUpdate::fresh_loop())
            .await
    }

    pub async fn rediagnose(&self, id: Uuid) -> DomainResult<Job> {
        self.operator_transition(
            id,
            &[JobState::Ingested, JobState::Diagnosed],
            JobState::Diagnosing,
            StateUpdate::default(),
        )
        .await
    }

    pub async fn refix(&self, id: Uuid) -> DomainResult<Job> {
        self.operator_transition(
            id,
            &[JobState::Diagnosed, JobState::NeedsReview],
            JobState::Fixing,
            StateUpdate::fresh_loop(),
        )
        .await
    }

    /// Remove a job in any state. Deleting a missing job is not an error.
    ///
    /// A worker holding the job stops at its next transition.
    pub async fn delete(&self, id: Uuid) -> DomainResult<bool> {
        if self.machine.cancellations().cancel(id) {
            debug!(job_id = %id, "Cancelled running job");
        }
        let deleted = self.machine.repository().delete(id).await?;
        if deleted {
            info!(job_id = %id, "Job deleted");
        }
        Ok(deleted)
    }

    async fn operator_transition(
        &self,
        id: Uuid,
        allowed: &[JobState],
        to: JobState,
        update: StateUpdate,
    ) -> DomainResult<Job> {
        let job = self.get(id).await?;
        if !allowed.contains(&job.state) {
            return Err(DomainError::InvalidStateTransition { from: job.state, to });
        }
        self.machine.request(id, job.state, to, update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use tempfile::{Builder, NamedTempFile};

    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteJobRepository};
    use crate::domain::models::{DocumentFormat, TargetPageSize};
    use crate::services::state_machine::CancellationRegistry;

    async fn service() -> (JobService<SqliteJobRepository>, JobStateMachine<SqliteJobRepository>) {
        let repo = Arc::new(SqliteJobRepository::new(create_migrated_test_pool().await.unwrap()));
        let machine = JobStateMachine::new(repo, CancellationRegistry::new());
        let gating = GatingPolicy {
            auto_approve_threshold: 80.0,
            ..GatingPolicy::default()
        };
        (JobService::new(machine.clone(), IngestionConfig::default(), gating), machine)
    }

    fn pdf() -> NamedTempFile {
        let mut file = Builder::new().suffix(".pdf").tempfile().unwrap();
        file.write_all(b"%PDF-1.4 brochure").unwrap();
        file
    }

    async fn walk(machine: &JobStateMachine<SqliteJobRepository>, id: Uuid, path: &[JobState]) {
        let mut from = JobState::Uploaded;
        for to in path {
            machine.advance(id, from, *to, StateUpdate::default()).await.unwrap();
            from = *to;
        }
    }

    const TO_REVIEW: &[JobState] = &[
        JobState::Ingesting,
        JobState::Converting,
        JobState::Rendering,
        JobState::Ingested,
        JobState::Diagnosing,
        JobState::Diagnosed,
        JobState::Fixing,
        JobState::Verifying,
        JobState::NeedsReview,
    ];

    #[tokio::test]
    async fn test_submit_creates_uploaded_job() {
        let (service, _) = service().await;
        let file = pdf();
        let options = JobOptions {
            target_page_size: TargetPageSize::A4,
            ..JobOptions::default()
        };
        let request = SubmitRequest::new(file.path())
            .with_effort(Effort::Thorough)
            .with_options(options);

        let job = service.submit(request).await.unwrap();
        assert_eq!(job.state, JobState::Uploaded);
        assert_eq!(job.effort, Effort::Thorough);
        assert_eq!(job.gating.auto_approve_threshold, 80.0);

        let stored = service.get(job.id).await.unwrap();
        assert_eq!(stored.options.target_page_size, TargetPageSize::A4);
        assert_eq!(DocumentFormat::from_path(&stored.source.uri), Some(DocumentFormat::Pdf));
    }

    #[tokio::test]
    async fn test_submit_rejects_unsupported_file() {
        let (service, _) = service().await;
        let mut file = Builder::new().suffix(".odt").tempfile().unwrap();
        file.write_all(b"PK\x03\x04").unwrap();

        let err = service.submit(SubmitRequest::new(file.path())).await.unwrap_err();
        assert!(matches!(err, DomainError::Ingestion(_)));
        assert!(service.list(JobFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approve_and_reject_from_review() {
        let (service, machine) = service().await;
        let file = pdf();
        let a = service.submit(SubmitRequest::new(file.path())).await.unwrap();
        let b = service.submit(SubmitRequest::new(file.path())).await.unwrap();
        walk(&machine, a.id, TO_REVIEW).await;
        walk(&machine, b.id, TO_REVIEW).await;

        let approved = service.approve(a.id).await.unwrap();
        assert_eq!(approved.state, JobState::Done);
        assert!(approved.completed_at.is_some());

        let rejected = service.reject(b.id).await.unwrap();
        assert_eq!(rejected.state, JobState::Fixing);
        assert_eq!(rejected.iteration, 0);
    }

    #[tokio::test]
    async fn test_operator_actions_check_state() {
        let (service, _) = service().await;
        let file = pdf();
        let job = service.submit(SubmitRequest::new(file.path())).await.unwrap();

        for result in [
            service.approve(job.id).await,
            service.reject(job.id).await,
            service.rediagnose(job.id).await,
            service.refix(job.id).await,
        ] {
            assert!(matches!(result, Err(DomainError::InvalidStateTransition { from: JobState::Uploaded, .. })));
        }
    }

    #[tokio::test]
    async fn test_rediagnose_and_refix_from_diagnosed() {
        let (service, machine) = service().await;
        let file = pdf();
        let job = service.submit(SubmitRequest::new(file.path())).await.unwrap();
        walk(&machine, job.id, &TO_REVIEW[..6]).await;

        let job = service.rediagnose(job.id).await.unwrap();
        assert_eq!(job.state, JobState::Diagnosing);
        machine
            .advance(job.id, JobState::Diagnosing, JobState::Diagnosed, StateUpdate::default())
            .await
            .unwrap();

        let job = service.refix(job.id).await.unwrap();
        assert_eq!(job.state, JobState::Fixing);
    }

    #[tokio::test]
    async fn test_delete_cancels_job_held_by_worker() {
        let (service, machine) = service().await;
        let file = pdf();
        let job = service.submit(SubmitRequest::new(file.path())).await.unwrap();
        let token = machine.cancellations().register(job.id);

        assert!(service.delete(job.id).await.unwrap());
        assert!(token.is_cancelled());
        assert!(matches!(machine.cancellations().check(job.id), Err(DomainError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_cancels() {
        let (service, machine) = service().await;
        let file = pdf();
        let job = service.submit(SubmitRequest::new(file.path())).await.unwrap();

        assert!(service.delete(job.id).await.unwrap());
        assert!(!service.delete(job.id).await.unwrap());
        assert!(!machine.cancellations().is_registered(job.id));
        assert!(matches!(service.get(job.id).await, Err(DomainError::JobNotFound(_))));
        assert!(matches!(service.fixes(job.id).await, Err(DomainError::JobNotFound(_))));
    }
}
