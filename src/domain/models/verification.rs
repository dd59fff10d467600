//! Confidence gating and verification results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::issue::{Diagnosis, IssueKey, Severity};
use super::job::JobState;

/// Points a single remaining issue subtracts from a page's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityWeights {
    #[serde(default = "default_critical_weight")]
    pub critical: f64,
    #[serde(default = "default_warning_weight")]
    pub warning: f64,
    #[serde(default = "default_info_weight")]
    pub info: f64,
}

const fn default_critical_weight() -> f64 {
    30.0
}

const fn default_warning_weight() -> f64 {
    10.0
}

const fn default_info_weight() -> f64 {
    2.0
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: default_critical_weight(),
            warning: default_warning_weight(),
            info: default_info_weight(),
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::Warning => self.warning,
            Severity::Info => self.info,
        }
    }
}

/// Routing decision for a verified job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    AutoApprove,
    NeedsReview,
}

impl Routing {
    pub fn target_state(&self) -> JobState {
        match self {
            Self::AutoApprove => JobState::Done,
            Self::NeedsReview => JobState::NeedsReview,
        }
    }
}

/// Threshold and weights applied to a job, captured when the job is created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatingPolicy {
    #[serde(default = "default_auto_approve_threshold")]
    pub auto_approve_threshold: f64,
    #[serde(default)]
    pub weights: SeverityWeights,
}

const fn default_auto_approve_threshold() -> f64 {
    70.0
}

impl Default for GatingPolicy {
    fn default() -> Self {
        Self {
            auto_approve_threshold: default_auto_approve_threshold(),
            weights: SeverityWeights::default(),
        }
    }
}

impl GatingPolicy {
    pub fn route(&self, overall: f64) -> Routing {
        if overall >= self.auto_approve_threshold {
            Routing::AutoApprove
        } else {
            Routing::NeedsReview
        }
    }
}

/// Human-facing band for an overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintReadiness {
    PrintReady,
    LikelyFine,
    NeedsReview,
    ManualIntervention,
}

impl PrintReadiness {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::PrintReady
        } else if score >= 70.0 {
            Self::LikelyFine
        } else if score >= 50.0 {
            Self::NeedsReview
        } else {
            Self::ManualIntervention
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrintReady => "print_ready",
            Self::LikelyFine => "likely_fine",
            Self::NeedsReview => "needs_review",
            Self::ManualIntervention => "manual_intervention",
        }
    }
}

/// Confidence for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageConfidence {
    pub page: u32,
    pub score: f64,
    /// Remaining issues counted against this page, document-level ones included
    pub remaining_issues: u32,
    pub before_image: Option<String>,
    pub after_image: Option<String>,
}

/// What happened to an issue found by the first diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAction {
    /// Gone from the final diagnosis
    Fixed,
    /// Every attempted fix failed and the issue remains
    Failed,
    /// Planner never proposed a fix and the issue remains
    Skipped,
    /// A fix succeeded but the issue still shows up
    Remaining,
}

impl FixAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Remaining => "remaining",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixReportEntry {
    pub issue: IssueKey,
    pub severity_before: Severity,
    pub severity_after: Option<Severity>,
    pub action: FixAction,
    pub tools: Vec<String>,
}

/// Before/after account of the initial issues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixReport {
    pub entries: Vec<FixReportEntry>,
    /// Issues found only after fixing started
    pub introduced: Vec<IssueKey>,
    pub summary: String,
}

/// Outcome of verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub final_diagnosis: Diagnosis,
    pub pages: Vec<PageConfidence>,
    pub overall: f64,
    pub routing: Routing,
    pub readiness: PrintReadiness,
    pub threshold_used: f64,
    pub weights_used: SeverityWeights,
    pub report: FixReport,
    pub verified_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threshold_routing() {
        let policy = GatingPolicy::default();
        assert_eq!(policy.route(65.0), Routing::NeedsReview);
        assert_eq!(policy.route(70.0), Routing::AutoApprove);
        assert_eq!(policy.route(70.0).target_state(), JobState::Done);
        assert_eq!(policy.route(69.99).target_state(), JobState::NeedsReview);
    }

    #[test]
    fn test_custom_threshold() {
        let policy = GatingPolicy {
            auto_approve_threshold: 85.0,
            ..GatingPolicy::default()
        };
        assert_eq!(policy.route(80.0), Routing::NeedsReview);
    }

    #[test]
    fn test_readiness_bands() {
        assert_eq!(PrintReadiness::from_score(95.0), PrintReadiness::PrintReady);
        assert_eq!(PrintReadiness::from_score(70.0), PrintReadiness::LikelyFine);
        assert_eq!(PrintReadiness::from_score(50.0), PrintReadiness::NeedsReview);
        assert_eq!(PrintReadiness::from_score(10.0), PrintReadiness::ManualIntervention);
    }
}
