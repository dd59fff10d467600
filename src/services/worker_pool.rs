//! Bounded pool of job workers.
//!
//! A poller scans the job store for work and feeds job ids through a channel;
//! each id is run on its own task under a concurrency permit and a per-job
//! lock. The first scan picks up jobs a previous process left mid-flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Job, JobFilter, JobState, WorkerConfig};
use crate::domain::ports::JobRepository;
use crate::services::job_runner::JobRunner;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Jobs processed at the same time
    pub concurrency: usize,
    /// Delay between scans for new work
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl From<&WorkerConfig> for WorkerPoolConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// In-process job claims. A job whose lock is held is not dispatched again.
#[derive(Debug, Clone, Default)]
pub struct JobLocks {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl JobLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a job. Returns `None` if another worker holds it.
    pub fn try_acquire(&self, job_id: Uuid) -> Option<JobLock> {
        let mut held = self.held.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        held.insert(job_id).then(|| JobLock {
            job_id,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, job_id: Uuid) -> bool {
        self.held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(&job_id)
    }
}

/// Claim on one job, released on drop.
#[derive(Debug)]
pub struct JobLock {
    job_id: Uuid,
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl JobLock {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&self.job_id);
    }
}

/// Tally of finished job runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub processed: usize,
    pub done: usize,
    pub needs_review: usize,
    pub failed: usize,
    /// Deleted while running
    pub cancelled: usize,
    /// Runs that ended in an error the job could not record
    pub errors: usize,
}

type RunOutcome = (Uuid, DomainResult<Option<Job>>);

impl WorkerSummary {
    fn record(&mut self, joined: Result<RunOutcome, JoinError>) {
        match joined {
            Ok((job_id, Ok(Some(job)))) => {
                self.processed += 1;
                match job.state {
                    JobState::Done => self.done += 1,
                    JobState::NeedsReview => self.needs_review += 1,
                    JobState::Failed => self.failed += 1,
                    _ => {}
                }
                info!(job_id = %job_id, state = %job.state, "Worker released job");
            }
            Ok((_, Ok(None))) => self.cancelled += 1,
            Ok((job_id, Err(e))) => {
                self.errors += 1;
                error!(job_id = %job_id, error = %e, "Job run aborted");
            }
            Err(e) => {
                self.errors += 1;
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

pub struct WorkerPool<R: JobRepository + 'static> {
    runner: Arc<JobRunner<R>>,
    repo: Arc<R>,
    locks: JobLocks,
    semaphore: Arc<Semaphore>,
    config: WorkerPoolConfig,
    shutdown: broadcast::Sender<()>,
}

impl<R: JobRepository + 'static> WorkerPool<R> {
    pub fn new(runner: Arc<JobRunner<R>>, repo: Arc<R>, config: WorkerPoolConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            runner,
            repo,
            locks: JobLocks::new(),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            config,
            shutdown,
        }
    }

    pub fn locks(&self) -> &JobLocks {
        &self.locks
    }

    /// Sender that stops [`WorkerPool::run`] when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Ask a running pool to stop. In-flight jobs finish first.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Jobs a worker should pick up, oldest first.
    async fn pending_jobs(&self) -> DomainResult<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .repo
            .list(JobFilter::default())
            .await?
            .into_iter()
            .filter(|job| job.state.is_worker_owned())
            .filter(|job| !(job.state == JobState::Diagnosed && !job.options.auto_fix))
            .filter(|job| !self.locks.is_held(job.id))
            .collect();
        jobs.reverse();
        Ok(jobs)
    }

    async fn dispatch(&self, job_id: Uuid, tasks: &mut JoinSet<RunOutcome>) -> bool {
        let Some(lock) = self.locks.try_acquire(job_id) else {
            debug!(job_id = %job_id, "Job already claimed");
            return false;
        };
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return false;
        };

        let runner = Arc::clone(&self.runner);
        tasks.spawn(async move {
            let _permit = permit;
            let _lock = lock;
            (job_id, runner.run(job_id).await)
        });
        true
    }

    /// Process jobs until shutdown is signalled.
    pub async fn run(&self) -> DomainResult<WorkerSummary> {
        let (tx, mut rx) = mpsc::channel::<Uuid>(self.config.concurrency * 4);
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut tasks = JoinSet::new();
        let mut queued: HashSet<Uuid> = HashSet::new();
        let mut summary = WorkerSummary::default();
        let mut first_scan = true;

        info!(concurrency = self.config.concurrency, "Worker pool started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(in_flight = tasks.len(), "Worker pool stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let pending = match self.pending_jobs().await {
                        Ok(pending) => pending,
                        Err(e) => {
                            warn!(error = %e, "Could not scan for jobs");
                            continue;
                        }
                    };
                    if first_scan {
                        let resumed = pending.iter().filter(|j| j.state != JobState::Uploaded).count();
                        if resumed > 0 {
                            info!(count = resumed, "Resuming interrupted jobs");
                        }
                        first_scan = false;
                    }
                    for job in pending {
                        if !queued.insert(job.id) {
                            continue;
                        }
                        if tx.try_send(job.id).is_err() {
                            queued.remove(&job.id);
                            break;
                        }
                    }
                }
                Some(job_id) = rx.recv() => {
                    queued.remove(&job_id);
                    self.dispatch(job_id, &mut tasks).await;
                }
                Some(joined) = tasks.join_next() => summary.record(joined),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            summary.record(joined);
        }
        info!(processed = summary.processed, "Worker pool stopped");
        Ok(summary)
    }

    /// Process every job that is pending now, including jobs that become
    /// runnable along the way, then return. Each job is run at most once.
    pub async fn run_once(&self) -> DomainResult<WorkerSummary> {
        let mut tasks = JoinSet::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut summary = WorkerSummary::default();

        loop {
            let pending: Vec<Uuid> = self
                .pending_jobs()
                .await?
                .into_iter()
                .map(|job| job.id)
                .filter(|id| seen.insert(*id))
                .collect();
            if pending.is_empty() && tasks.is_empty() {
                break;
            }

            for job_id in pending {
                self.dispatch(job_id, &mut tasks).await;
            }
            if let Some(joined) = tasks.join_next().await {
                summary.record(joined);
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lock_released_on_drop() {
        let locks = JobLocks::new();
        let id = Uuid::new_v4();

        let lock = locks.try_acquire(id).unwrap();
        assert_eq!(lock.job_id(), id);
        assert!(locks.is_held(id));
        assert!(locks.try_acquire(id).is_none());

        drop(lock);
        assert!(!locks.is_held(id));
        assert!(locks.try_acquire(id).is_some());
    }

    #[test]
    fn test_locks_are_per_job() {
        let locks = JobLocks::new();
        let _a = locks.try_acquire(Uuid::new_v4()).unwrap();
        assert!(locks.try_acquire(Uuid::new_v4()).is_some());
    }

    #[test]
    fn test_config_from_worker_section() {
        let config = WorkerPoolConfig::from(&WorkerConfig {
            concurrency: 0,
            poll_interval_ms: 250,
            max_conflict_retries: 3,
        });
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }
}
