pub mod config;
pub mod document;
pub mod fix;
pub mod issue;
pub mod job;
pub mod orchestration;
pub mod verification;

pub use config::{
    CacheConfig, Config, DatabaseConfig, IngestionConfig, LoggingConfig, PlannerConfig, ProvidersConfig,
    RateLimitConfig, RetryConfig, WorkerConfig,
};
pub use document::{DocumentHandle, DocumentSet, PageImage, RenderSet};
pub use fix::{Fix, FixPlan, PlanDecision, PlanOutcome, ToolInvocation, ToolOutcome, ToolParams};
pub use issue::{
    DegradedPass, Diagnosis, DiagnosisPass, DiagnosisPhase, DiagnosisReadiness, DiagnosisSummary, FixImpact, Issue,
    IssueKey, IssueSource, IssueType, Severity,
};
pub use job::{
    Aggressiveness, DocumentFormat, Effort, Job, JobFilter, JobOptions, JobState, SourceFile, StateUpdate,
    TargetColorspace, TargetPageSize,
};
pub use orchestration::{FallbackReason, FallbackRecord, OrchestrationResult, StopReason};
pub use verification::{
    FixAction, FixReport, FixReportEntry, GatingPolicy, PageConfidence, PrintReadiness, Routing, SeverityWeights,
    VerificationResult,
};
