//! Guarded job state transitions.
//!
//! Every transition is checked against the state graph and then applied as a
//! compare-and-set on the durable record. The repository is the authority:
//! two callers racing from the same state get one success and one
//! `StateConflict`, whatever locks they think they hold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Job, JobState, StateUpdate};
use crate::domain::ports::JobRepository;

/// Cancellation tokens for the jobs a worker in this process is running.
///
/// A worker registers a job before running it and releases it when done.
/// Deleting a registered job cancels its token; the worker stops at its next
/// transition boundary and a provider call already in flight is left to
/// finish with its result dropped. Jobs no worker holds have no entry.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token for a job a worker is about to run.
    pub fn register(&self, job_id: Uuid) -> CancellationToken {
        self.tokens().entry(job_id).or_insert_with(CancellationToken::new).clone()
    }

    /// Cancel a running job. Returns false when no worker holds it.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.tokens().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, job_id: Uuid) -> bool {
        self.tokens().get(&job_id).is_some_and(CancellationToken::is_cancelled)
    }

    pub fn is_registered(&self, job_id: Uuid) -> bool {
        self.tokens().contains_key(&job_id)
    }

    /// Fail with `Cancelled` if deletion was requested.
    pub fn check(&self, job_id: Uuid) -> DomainResult<()> {
        if self.is_cancelled(job_id) {
            return Err(DomainError::Cancelled(job_id));
        }
        Ok(())
    }

    /// Forget a job once its worker has let go of it.
    pub fn release(&self, job_id: Uuid) {
        if self.tokens().remove(&job_id).is_some() {
            debug!(job_id = %job_id, "Cancellation token released");
        }
    }
}

pub struct JobStateMachine<R: JobRepository> {
    repo: Arc<R>,
    cancellations: CancellationRegistry,
}

impl<R: JobRepository> Clone for JobStateMachine<R> {
    fn clone(&self) -> Self {
        Self {
            repo: Arc::clone(&self.repo),
            cancellations: self.cancellations.clone(),
        }
    }
}

impl<R: JobRepository> JobStateMachine<R> {
    pub fn new(repo: Arc<R>, cancellations: CancellationRegistry) -> Self {
        Self { repo, cancellations }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Worker-driven transition.
    ///
    /// A job deleted mid-run surfaces as `Cancelled` rather than `JobNotFound`.
    pub async fn advance(&self, job_id: Uuid, from: JobState, to: JobState, update: StateUpdate) -> DomainResult<Job> {
        if !from.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition { from, to });
        }
        self.cancellations.check(job_id)?;

        match self.repo.transition(job_id, from, to, update).await {
            Ok(job) => {
                info!(job_id = %job_id, from = %from, to = %to, "Job state changed");
                Ok(job)
            }
            Err(DomainError::JobNotFound(_)) => Err(DomainError::Cancelled(job_id)),
            Err(e) => Err(e),
        }
    }

    /// Move a job to `failed`, recording the error that caused it.
    pub async fn fail(&self, job_id: Uuid, from: JobState, error: &DomainError) -> DomainResult<Job> {
        warn!(job_id = %job_id, state = %from, error = %error, "Job failed");
        self.advance(job_id, from, JobState::Failed, StateUpdate::with_error(error.to_string()))
            .await
    }

    /// Operator-requested transition (approve, reject, re-diagnose, re-fix).
    ///
    /// Accepts worker edges plus operator-only edges. The caller passes the
    /// state it observed; a concurrent change yields `StateConflict`.
    pub async fn request(&self, job_id: Uuid, from: JobState, to: JobState, update: StateUpdate) -> DomainResult<Job> {
        if !from.can_transition_to(to) && !from.can_operator_transition_to(to) {
            return Err(DomainError::InvalidStateTransition { from, to });
        }

        let job = self.repo.transition(job_id, from, to, update).await?;
        info!(job_id = %job_id, from = %from, to = %to, "Job state changed on request");
        Ok(job)
    }
}
