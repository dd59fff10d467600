//! PrintFix - print-readiness job engine
//!
//! PrintFix takes uploaded office documents and PDFs through ingestion,
//! diagnosis, an iterative fix loop and a confidence-gated verification,
//! ending each job as done, held for review, or failed.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Job lifecycle, issue and fix models, port traits
//! - **Service Layer** (`services`): State machine, diagnosis, planning, fix loop, verification, workers
//! - **Adapters** (`adapters`): SQLite persistence, HTTP document services, diagnosis cache, mocks
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use printfix::services::{JobService, SubmitRequest};
//!
//! let job = service.submit(SubmitRequest::new("brochure.pdf")).await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Aggressiveness, Config, Diagnosis, DocumentFormat, Effort, Fix, Issue, IssueType, Job, JobOptions, JobState,
    OrchestrationResult, Severity, VerificationResult,
};
pub use domain::ports::{DiagnosisProvider, JobRepository, RationaleProvider, Renderer, ToolExecutor};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{JobRunner, JobService, SubmitRequest, WorkerPool};
