//! Job repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Diagnosis, DocumentFormat, DocumentSet, Fix, Job, JobFilter, JobState, OrchestrationResult, StateUpdate,
    VerificationResult,
};

/// Fix-loop progress written after every iteration.
#[derive(Debug, Clone)]
pub struct LoopProgress {
    pub iteration: u32,
    pub documents: DocumentSet,
    pub issues_found: u32,
    pub fixes_applied: u32,
    pub fixes_failed: u32,
}

/// Durable job record.
///
/// `state` is only ever changed through [`JobRepository::transition`],
/// an atomic compare-and-set against storage.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn create(&self, job: &Job) -> DomainResult<()>;

    /// Get a job by ID
    async fn get(&self, id: Uuid) -> DomainResult<Option<Job>>;

    /// List jobs, newest first
    async fn list(&self, filter: JobFilter) -> DomainResult<Vec<Job>>;

    /// Remove a job and its history. Returns false if it did not exist.
    async fn delete(&self, id: Uuid) -> DomainResult<bool>;

    /// Move the job from `from` to `to` if and only if its persisted state is `from`.
    ///
    /// Fails with `StateConflict` when the stored state differs and with
    /// `JobNotFound` when the job is gone.
    async fn transition(&self, id: Uuid, from: JobState, to: JobState, update: StateUpdate) -> DomainResult<Job>;

    /// Record the outcome of ingestion
    async fn record_ingestion(
        &self,
        id: Uuid,
        format: DocumentFormat,
        page_count: u32,
        documents: &DocumentSet,
    ) -> DomainResult<()>;

    /// Persist fix-loop progress
    async fn record_progress(&self, id: Uuid, progress: &LoopProgress) -> DomainResult<()>;

    async fn record_orchestration(&self, id: Uuid, result: &OrchestrationResult) -> DomainResult<()>;

    /// Store the verification result and the overall confidence
    async fn record_verification(&self, id: Uuid, result: &VerificationResult) -> DomainResult<()>;

    /// Append to the ordered diagnosis history
    async fn append_diagnosis(&self, id: Uuid, diagnosis: &Diagnosis) -> DomainResult<()>;

    async fn list_diagnoses(&self, id: Uuid) -> DomainResult<Vec<Diagnosis>>;

    async fn latest_diagnosis(&self, id: Uuid) -> DomainResult<Option<Diagnosis>>;

    /// Append to the ordered fix history
    async fn append_fix(&self, id: Uuid, fix: &Fix) -> DomainResult<()>;

    async fn list_fixes(&self, id: Uuid) -> DomainResult<Vec<Fix>>;
}
