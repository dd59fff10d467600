//! Fix-loop summary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::fix::Fix;
use super::issue::IssueKey;

/// Why the fix loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Latest diagnosis has no critical or warning issue
    Converged,
    /// Iteration budget for the effort tier exhausted
    IterationCap,
    /// Blocking issues remain but the planner proposed nothing
    NoActionableFixes,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::IterationCap => "iteration_cap",
            Self::NoActionableFixes => "no_actionable_fixes",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an issue was routed to the PDF representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FallbackReason {
    /// No original-format tool is registered for the issue
    ToolMissing,
    /// The original-format tool failed
    ToolFailed { tool: String, error: String },
}

/// One fallback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub iteration: u32,
    pub issue: IssueKey,
    pub reason: FallbackReason,
    pub tool: String,
    pub success: bool,
}

/// Summary of one completed fix-loop run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// Iterations that executed fixes
    pub iterations: u32,
    pub max_iterations: u32,
    pub stop_reason: StopReason,
    pub fixes: Vec<Fix>,
    pub fallbacks: Vec<FallbackRecord>,
    /// Blocking issues in the first and last diagnosis of the run
    pub initial_blocking: u32,
    pub final_blocking: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OrchestrationResult {
    pub fn converged(&self) -> bool {
        self.stop_reason == StopReason::Converged
    }

    pub fn fallback_triggered(&self) -> bool {
        !self.fallbacks.is_empty()
    }

    pub fn fixes_applied(&self) -> usize {
        self.fixes.iter().filter(|f| f.success).count()
    }

    pub fn fixes_failed(&self) -> usize {
        self.fixes.iter().filter(|f| !f.success).count()
    }
}
