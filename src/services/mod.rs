//! Application services: planning, the fix loop, verification and job lifecycle.

pub mod diagnosis_merger;
pub mod diagnosis_service;
pub mod fix_planner;
pub mod fix_report;
pub mod ingestion;
pub mod job_runner;
pub mod job_service;
pub mod orchestrator;
pub mod state_machine;
pub mod tool_registry;
pub mod verifier;
pub mod worker_pool;

pub use diagnosis_service::DiagnosisService;
pub use fix_planner::PlanningContext;
pub use ingestion::{inspect_file, IngestionPipeline, InspectedFile};
pub use job_runner::{Collaborators, JobRunner};
pub use job_service::{JobService, SubmitRequest};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use state_machine::{CancellationRegistry, JobStateMachine};
pub use tool_registry::ToolRegistry;
pub use verifier::Verifier;
pub use worker_pool::{JobLocks, WorkerPool, WorkerPoolConfig, WorkerSummary};
