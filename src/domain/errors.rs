//! Domain errors for the PrintFix job engine.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::JobState;

/// Domain-level errors that can occur while driving a job.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: JobState, to: JobState },

    #[error("State conflict on job {job_id}: expected {expected}, found {}", .actual.map_or("<missing>", |s| s.as_str()))]
    StateConflict {
        job_id: Uuid,
        expected: JobState,
        actual: Option<JobState>,
    },

    /// Unsupported or corrupt input. Fatal for the job, never retried.
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    #[error("Provider {provider} timed out after {}s", .timeout.as_secs_f64())]
    ProviderTimeout { provider: String, timeout: Duration },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Tool {tool} failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid parameters for tool {tool}: {reason}")]
    InvalidToolParams { tool: String, reason: String },

    #[error("Tool registry is inconsistent: {0}")]
    Registry(String),

    #[error("Job {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DomainError {
    /// Whether the worker may carry on with the job after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StateConflict { .. }
                | Self::ProviderTimeout { .. }
                | Self::Provider(_)
                | Self::ToolExecution { .. }
        )
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_conflict_message() {
        let id = Uuid::new_v4();
        let err = DomainError::StateConflict {
            job_id: id,
            expected: JobState::Diagnosed,
            actual: Some(JobState::Fixing),
        };
        let msg = err.to_string();
        assert!(msg.contains("expected diagnosed"));
        assert!(msg.contains("found fixing"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_ingestion_is_fatal() {
        assert!(!DomainError::Ingestion("corrupt".into()).is_recoverable());
    }
}
