//! Tool invocations, fix plans and the recorded fix history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::document::DocumentHandle;
use super::issue::IssueKey;
use super::job::DocumentFormat;

/// Resolved tool parameters, checked against the tool's schema before execution.
pub type ToolParams = Map<String, Value>;

/// One tool call the planner proposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub target_format: DocumentFormat,
    #[serde(default)]
    pub params: ToolParams,
    /// Issues this invocation addresses
    pub issues: Vec<IssueKey>,
    /// Runs against the PDF representation instead of the original format
    #[serde(default)]
    pub fallback: bool,
    pub rationale: String,
}

/// Result envelope returned by the external tool layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    /// New revision produced by a successful invocation
    #[serde(default)]
    pub document: Option<DocumentHandle>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn succeeded(document: DocumentHandle) -> Self {
        Self {
            success: true,
            document: Some(document),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            document: None,
            error: Some(error.into()),
        }
    }
}

/// What the planner decided for one issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOutcome {
    Accepted,
    Skipped,
    /// No registered tool for the issue in the document's format
    UnfixableInCurrentFormat,
    /// The chosen tool already failed twice for this issue
    Exhausted,
}

impl PlanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Skipped => "skipped",
            Self::UnfixableInCurrentFormat => "unfixable_in_current_format",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Per-issue planning decision with its rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDecision {
    pub issue: IssueKey,
    pub outcome: PlanOutcome,
    pub tool: Option<String>,
    pub rationale: String,
}

/// Output of the fix planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixPlan {
    /// In issue priority order, deduplicated by tool and parameters
    pub invocations: Vec<ToolInvocation>,
    pub decisions: Vec<PlanDecision>,
}

impl FixPlan {
    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn unfixable(&self) -> impl Iterator<Item = &PlanDecision> {
        self.decisions
            .iter()
            .filter(|d| d.outcome == PlanOutcome::UnfixableInCurrentFormat)
    }
}

/// One applied or attempted tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub id: Uuid,
    pub job_id: Uuid,
    pub iteration: u32,
    pub tool: String,
    pub target_format: DocumentFormat,
    pub params: ToolParams,
    pub issues: Vec<IssueKey>,
    pub success: bool,
    pub error: Option<String>,
    pub rationale: String,
    pub fallback: bool,
    pub created_at: DateTime<Utc>,
}

impl Fix {
    pub fn record(job_id: Uuid, iteration: u32, invocation: &ToolInvocation, success: bool, error: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            iteration,
            tool: invocation.tool.clone(),
            target_format: invocation.target_format,
            params: invocation.params.clone(),
            issues: invocation.issues.clone(),
            success,
            error,
            rationale: invocation.rationale.clone(),
            fallback: invocation.fallback,
            created_at: Utc::now(),
        }
    }
}
