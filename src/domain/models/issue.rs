//! Issues and diagnoses.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of print defect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    ClippedContent,
    MarginViolation,
    OrphanWidow,
    MisalignedElements,
    ImageOverflow,
    TextOverflow,
    SmallFont,
    WrongOrientation,
    BlankPage,
    VisualInconsistency,
    NonEmbeddedFont,
    RgbColorspace,
    LowDpiImage,
    PageSizeMismatch,
    InconsistentMargins,
    BadPageBreak,
    TableOverflow,
    HiddenContent,
    TrackedChanges,
}

/// Whether fixing an issue can change what the reader sees beyond layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixImpact {
    /// Layout only: margins, page geometry, breaks, blank pages
    Structural,
    /// Alters fonts, text size, tables or other rendered content
    ContentAffecting,
}

impl IssueType {
    pub const ALL: [IssueType; 19] = [
        Self::ClippedContent,
        Self::MarginViolation,
        Self::OrphanWidow,
        Self::MisalignedElements,
        Self::ImageOverflow,
        Self::TextOverflow,
        Self::SmallFont,
        Self::WrongOrientation,
        Self::BlankPage,
        Self::VisualInconsistency,
        Self::NonEmbeddedFont,
        Self::RgbColorspace,
        Self::LowDpiImage,
        Self::PageSizeMismatch,
        Self::InconsistentMargins,
        Self::BadPageBreak,
        Self::TableOverflow,
        Self::HiddenContent,
        Self::TrackedChanges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClippedContent => "clipped_content",
            Self::MarginViolation => "margin_violation",
            Self::OrphanWidow => "orphan_widow",
            Self::MisalignedElements => "misaligned_elements",
            Self::ImageOverflow => "image_overflow",
            Self::TextOverflow => "text_overflow",
            Self::SmallFont => "small_font",
            Self::WrongOrientation => "wrong_orientation",
            Self::BlankPage => "blank_page",
            Self::VisualInconsistency => "visual_inconsistency",
            Self::NonEmbeddedFont => "non_embedded_font",
            Self::RgbColorspace => "rgb_colorspace",
            Self::LowDpiImage => "low_dpi_image",
            Self::PageSizeMismatch => "page_size_mismatch",
            Self::InconsistentMargins => "inconsistent_margins",
            Self::BadPageBreak => "bad_page_break",
            Self::TableOverflow => "table_overflow",
            Self::HiddenContent => "hidden_content",
            Self::TrackedChanges => "tracked_changes",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Fixed classification used by every planning policy.
    pub fn impact(&self) -> FixImpact {
        match self {
            Self::MarginViolation
            | Self::InconsistentMargins
            | Self::PageSizeMismatch
            | Self::WrongOrientation
            | Self::BlankPage
            | Self::OrphanWidow
            | Self::BadPageBreak => FixImpact::Structural,
            _ => FixImpact::ContentAffecting,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue severity. Ordered so that `Critical` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Critical and warning issues block convergence.
    pub fn is_blocking(&self) -> bool {
        *self >= Self::Warning
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which diagnosis pass reported an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Visual,
    Structural,
}

impl IssueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Structural => "structural",
        }
    }
}

/// Identity of an issue across iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueKey {
    pub issue_type: IssueType,
    /// `None` for document-level issues
    pub page: Option<u32>,
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{}@p{}", self.issue_type, page),
            None => write!(f, "{}@document", self.issue_type),
        }
    }
}

/// One detected defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    pub source: IssueSource,
    /// 1-based page, `None` when the issue applies to the whole document
    #[serde(default)]
    pub page: Option<u32>,
    pub description: String,
    /// Free-form position hint, e.g. a font name or "top margin"
    #[serde(default)]
    pub location: Option<String>,
    /// Provider confidence in [0, 1]
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Tool the provider thinks would fix this
    #[serde(default)]
    pub suggested_fix: Option<String>,
}

impl Issue {
    pub fn new(issue_type: IssueType, severity: Severity, source: IssueSource, description: impl Into<String>) -> Self {
        Self {
            issue_type,
            severity,
            source,
            page: None,
            description: description.into(),
            location: None,
            confidence: None,
            suggested_fix: None,
        }
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn suggesting(mut self, tool: impl Into<String>) -> Self {
        self.suggested_fix = Some(tool.into());
        self
    }

    pub fn key(&self) -> IssueKey {
        IssueKey {
            issue_type: self.issue_type,
            page: self.page,
        }
    }
}

/// Readiness verdict derived from severity counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisReadiness {
    Ready,
    NeedsFixes,
    MajorIssues,
}

/// Severity counts of a diagnosis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisSummary {
    pub critical: u32,
    pub warning: u32,
    pub info: u32,
}

impl DiagnosisSummary {
    pub fn from_issues(issues: &[Issue]) -> Self {
        issues.iter().fold(Self::default(), |mut acc, issue| {
            match issue.severity {
                Severity::Critical => acc.critical += 1,
                Severity::Warning => acc.warning += 1,
                Severity::Info => acc.info += 1,
            }
            acc
        })
    }

    pub fn total(&self) -> u32 {
        self.critical + self.warning + self.info
    }

    pub fn readiness(&self) -> DiagnosisReadiness {
        if self.critical > 0 {
            DiagnosisReadiness::MajorIssues
        } else if self.warning > 0 {
            DiagnosisReadiness::NeedsFixes
        } else {
            DiagnosisReadiness::Ready
        }
    }
}

/// A diagnosis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisPass {
    Visual,
    Structural,
}

/// A pass that failed or timed out and contributed no issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedPass {
    pub pass: DiagnosisPass,
    pub reason: String,
}

/// Where in the job lifecycle a diagnosis was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisPhase {
    /// Taken in the `diagnosing` state
    Initial,
    /// Taken inside the fix loop
    FixLoop,
}

impl DiagnosisPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::FixLoop => "fix_loop",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initial" => Some(Self::Initial),
            "fix_loop" => Some(Self::FixLoop),
            _ => None,
        }
    }
}

/// Merged, severity-ranked issues for one render of one job.
///
/// Never mutated once recorded; each iteration supersedes the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub id: Uuid,
    pub job_id: Option<Uuid>,
    pub iteration: u32,
    pub phase: DiagnosisPhase,
    pub issues: Vec<Issue>,
    pub summary: DiagnosisSummary,
    #[serde(default)]
    pub degraded: Vec<DegradedPass>,
    /// Served from the diagnosis cache
    #[serde(default)]
    pub cached: bool,
    pub created_at: DateTime<Utc>,
}

impl Diagnosis {
    /// Wrap already merged and ordered issues.
    pub fn new(issues: Vec<Issue>, degraded: Vec<DegradedPass>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: None,
            iteration: 0,
            phase: DiagnosisPhase::Initial,
            summary: DiagnosisSummary::from_issues(&issues),
            issues,
            degraded,
            cached: false,
            created_at: Utc::now(),
        }
    }

    pub fn for_job(mut self, job_id: Uuid, iteration: u32, phase: DiagnosisPhase) -> Self {
        self.job_id = Some(job_id);
        self.iteration = iteration;
        self.phase = phase;
        self
    }

    /// No critical or warning issue remains. Info-only diagnoses are clean.
    pub fn is_clean(&self) -> bool {
        !self.issues.iter().any(|i| i.severity.is_blocking())
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Both passes failed, so an empty issue list says nothing about the document.
    pub fn is_uninspected(&self) -> bool {
        [DiagnosisPass::Visual, DiagnosisPass::Structural]
            .iter()
            .all(|pass| self.degraded.iter().any(|d| d.pass == *pass))
    }

    pub fn find(&self, key: IssueKey) -> Option<&Issue> {
        self.issues.iter().find(|i| i.key() == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(!Severity::Info.is_blocking());
    }

    #[test]
    fn test_issue_type_round_trip() {
        for t in IssueType::ALL {
            assert_eq!(IssueType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(IssueType::from_str("font_substitution"), None);
    }

    #[test]
    fn test_impact_table() {
        assert_eq!(IssueType::MarginViolation.impact(), FixImpact::Structural);
        assert_eq!(IssueType::OrphanWidow.impact(), FixImpact::Structural);
        assert_eq!(IssueType::NonEmbeddedFont.impact(), FixImpact::ContentAffecting);
        assert_eq!(IssueType::TableOverflow.impact(), FixImpact::ContentAffecting);
    }

    #[test]
    fn test_info_only_diagnosis_is_clean() {
        let diagnosis = Diagnosis::new(
            vec![Issue::new(IssueType::SmallFont, Severity::Info, IssueSource::Visual, "tiny footnote")],
            vec![],
        );
        assert!(diagnosis.is_clean());
        assert_eq!(diagnosis.summary.readiness(), DiagnosisReadiness::Ready);
    }

    #[test]
    fn test_issue_deserializes_with_type_field() {
        let json = r#"{"type":"clipped_content","severity":"critical","source":"structural","page":3,"description":"cut"}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.key(), IssueKey { issue_type: IssueType::ClippedContent, page: Some(3) });
        assert!(issue.suggested_fix.is_none());
    }
}
