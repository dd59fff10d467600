//! Worker pool scheduling against a file-backed job store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use printfix::adapters::mock::{office_package, MockRenderer, MockToolExecutor, ScriptedDiagnosisProvider};
use printfix::domain::models::{DocumentFormat, JobFilter, JobOptions, JobState};
use printfix::services::{SubmitRequest, WorkerPool, WorkerPoolConfig};

use common::{collaborators, TestEnv};

fn pool_config(concurrency: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        concurrency,
        poll_interval: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_run_once_processes_every_pending_job() {
    let env = TestEnv::new().await;
    for name in ["a.pdf", "b.pdf", "c.pdf"] {
        env.service.submit(SubmitRequest::new(env.pdf(name))).await.unwrap();
    }
    let sheet = env.upload("budget.xlsx", &office_package(DocumentFormat::Xlsx.required_entries()).unwrap());
    let failing = env.service.submit(SubmitRequest::new(&sheet)).await.unwrap();

    let runner = env.runner(collaborators(
        ScriptedDiagnosisProvider::new(),
        Arc::new(MockToolExecutor::new()),
        MockRenderer::new(1).failing_conversion("converter offline"),
    ));
    let pool = WorkerPool::new(Arc::new(runner), Arc::clone(&env.repo), pool_config(2));

    let summary = pool.run_once().await.unwrap();

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.done, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors, 0);

    let failed = env.service.get(failing.id).await.unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.error.unwrap().contains("converter offline"));
}

#[tokio::test]
async fn test_held_jobs_are_not_picked_up_until_refixed() {
    let env = TestEnv::new().await;
    let options = JobOptions {
        auto_fix: false,
        ..JobOptions::default()
    };
    let job = env
        .service
        .submit(SubmitRequest::new(env.pdf("held.pdf")).with_options(options))
        .await
        .unwrap();

    let runner = Arc::new(env.runner(collaborators(
        ScriptedDiagnosisProvider::new(),
        Arc::new(MockToolExecutor::new()),
        MockRenderer::new(1),
    )));
    let pool = WorkerPool::new(Arc::clone(&runner), Arc::clone(&env.repo), pool_config(1));

    pool.run_once().await.unwrap();
    assert_eq!(env.service.get(job.id).await.unwrap().state, JobState::Diagnosed);

    let second = pool.run_once().await.unwrap();
    assert_eq!(second.processed, 0);

    env.service.refix(job.id).await.unwrap();
    let third = pool.run_once().await.unwrap();
    assert_eq!(third.done, 1);
    assert_eq!(env.service.get(job.id).await.unwrap().state, JobState::Done);
}

#[tokio::test]
async fn test_run_stops_on_shutdown_after_draining() {
    let env = TestEnv::new().await;
    let job = env.service.submit(SubmitRequest::new(env.pdf("flyer.pdf"))).await.unwrap();

    let runner = env.runner(collaborators(
        ScriptedDiagnosisProvider::new(),
        Arc::new(MockToolExecutor::new()),
        MockRenderer::new(1),
    ));
    let pool = Arc::new(WorkerPool::new(Arc::new(runner), Arc::clone(&env.repo), pool_config(2)));

    let handle = tokio::spawn({
        let pool = Arc::clone(&pool);
        async move { pool.run().await }
    });

    let mut state = JobState::Uploaded;
    for _ in 0..200 {
        state = env.service.get(job.id).await.unwrap().state;
        if state == JobState::Done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, JobState::Done);

    pool.shutdown();
    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("pool did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(summary.done, 1);
    assert_eq!(env.service.list(JobFilter::default()).await.unwrap().len(), 1);
}
