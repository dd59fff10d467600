//! Job domain model.
//!
//! A job carries one uploaded document through ingestion, diagnosis,
//! the fix loop and verification. Its `state` only changes through
//! compare-and-set transitions on the job repository.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::DocumentSet;
use super::orchestration::OrchestrationResult;
use super::verification::{GatingPolicy, VerificationResult};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// File accepted, waiting for a worker
    Uploaded,
    /// Detecting the document format
    Ingesting,
    /// Producing the PDF representation
    Converting,
    /// Rendering page images
    Rendering,
    /// Ready for diagnosis
    Ingested,
    Diagnosing,
    Diagnosed,
    /// Fix loop running
    Fixing,
    Verifying,
    Done,
    /// Confidence below the auto-approve threshold
    NeedsReview,
    Failed,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Uploaded
    }
}

impl JobState {
    pub const ALL: [JobState; 12] = [
        Self::Uploaded,
        Self::Ingesting,
        Self::Converting,
        Self::Rendering,
        Self::Ingested,
        Self::Diagnosing,
        Self::Diagnosed,
        Self::Fixing,
        Self::Verifying,
        Self::Done,
        Self::NeedsReview,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Ingesting => "ingesting",
            Self::Converting => "converting",
            Self::Rendering => "rendering",
            Self::Ingested => "ingested",
            Self::Diagnosing => "diagnosing",
            Self::Diagnosed => "diagnosed",
            Self::Fixing => "fixing",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::NeedsReview => "needs_review",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "uploaded" => Some(Self::Uploaded),
            "ingesting" => Some(Self::Ingesting),
            "converting" => Some(Self::Converting),
            "rendering" => Some(Self::Rendering),
            "ingested" => Some(Self::Ingested),
            "diagnosing" => Some(Self::Diagnosing),
            "diagnosed" => Some(Self::Diagnosed),
            "fixing" => Some(Self::Fixing),
            "verifying" => Some(Self::Verifying),
            "done" => Some(Self::Done),
            "needs_review" | "needs-review" => Some(Self::NeedsReview),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// States a worker drives forward on its own. Everything else waits
    /// for an operator (approve, reject, re-fix) or is terminal.
    pub fn is_worker_owned(&self) -> bool {
        !matches!(self, Self::Done | Self::Failed | Self::NeedsReview)
    }

    /// Edges taken by the worker while driving a job forward.
    pub fn valid_transitions(&self) -> Vec<JobState> {
        match self {
            Self::Uploaded => vec![Self::Ingesting, Self::Failed],
            Self::Ingesting => vec![Self::Converting, Self::Failed],
            Self::Converting => vec![Self::Rendering, Self::Failed],
            Self::Rendering => vec![Self::Ingested, Self::Failed],
            Self::Ingested => vec![Self::Diagnosing, Self::Failed],
            Self::Diagnosing => vec![Self::Diagnosed, Self::Failed],
            Self::Diagnosed => vec![Self::Fixing, Self::Failed],
            Self::Fixing => vec![Self::Verifying, Self::Failed],
            Self::Verifying => vec![Self::Done, Self::NeedsReview, Self::Failed],
            Self::NeedsReview => vec![Self::Fixing, Self::Done, Self::Failed],
            Self::Done | Self::Failed => vec![],
        }
    }

    /// Edges only an explicit operator request may take.
    ///
    /// `diagnosed -> diagnosing` is the re-diagnose request; the fix loop
    /// itself never leaves `fixing` to re-diagnose.
    pub fn operator_transitions(&self) -> Vec<JobState> {
        match self {
            Self::Diagnosed => vec![Self::Diagnosing],
            _ => vec![],
        }
    }

    pub fn can_transition_to(&self, new_state: Self) -> bool {
        self.valid_transitions().contains(&new_state)
    }

    pub fn can_operator_transition_to(&self, new_state: Self) -> bool {
        self.can_transition_to(new_state) || self.operator_transitions().contains(&new_state)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effort tier: diagnosis depth and iteration budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Quick,
    Standard,
    Thorough,
}

impl Default for Effort {
    fn default() -> Self {
        Self::Standard
    }
}

impl Effort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Thorough => "thorough",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "quick" => Some(Self::Quick),
            "standard" => Some(Self::Standard),
            "thorough" => Some(Self::Thorough),
            _ => None,
        }
    }

    /// Maximum fix-loop iterations.
    pub fn max_iterations(&self) -> u32 {
        match self {
            Self::Quick => 1,
            Self::Standard => 3,
            Self::Thorough => 5,
        }
    }

    /// Pages sent to the visual pass. `None` samples every page.
    pub fn max_pages_sampled(&self) -> Option<usize> {
        match self {
            Self::Quick => Some(10),
            Self::Standard => Some(30),
            Self::Thorough => None,
        }
    }

    /// Page images per visual provider request.
    pub fn page_batch_size(&self) -> usize {
        match self {
            Self::Quick => 10,
            Self::Standard => 5,
            Self::Thorough => 3,
        }
    }
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How readily the planner proposes content-affecting fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    Conservative,
    Moderate,
    Aggressive,
    SmartAuto,
}

impl Default for Aggressiveness {
    fn default() -> Self {
        Self::SmartAuto
    }
}

impl Aggressiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conservative => "conservative",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
            Self::SmartAuto => "smart_auto",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "conservative" => Some(Self::Conservative),
            "moderate" => Some(Self::Moderate),
            "aggressive" => Some(Self::Aggressive),
            "smart_auto" | "smart-auto" | "smart" => Some(Self::SmartAuto),
            _ => None,
        }
    }
}

impl fmt::Display for Aggressiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document formats the engine routes tools for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Xlsx,
    Pptx,
}

impl DocumentFormat {
    pub const ALL: [DocumentFormat; 4] = [Self::Pdf, Self::Docx, Self::Xlsx, Self::Pptx];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Xlsx => "xlsx",
            Self::Pptx => "pptx",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    /// Detect the format from a file name's extension.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_str)
    }

    /// Leading bytes every well-formed file of this format starts with.
    pub fn magic_bytes(&self) -> &'static [u8] {
        match self {
            Self::Pdf => b"%PDF-",
            Self::Docx | Self::Xlsx | Self::Pptx => b"PK\x03\x04",
        }
    }

    /// Archive entries an office package of this format must contain.
    pub fn required_entries(&self) -> &'static [&'static str] {
        match self {
            Self::Pdf => &[],
            Self::Docx => &["[Content_Types].xml", "word/document.xml"],
            Self::Xlsx => &["[Content_Types].xml", "xl/workbook.xml"],
            Self::Pptx => &["[Content_Types].xml", "ppt/presentation.xml"],
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested output page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetPageSize {
    A4,
    Letter,
    #[default]
    Original,
}

impl TargetPageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A4 => "a4",
            Self::Letter => "letter",
            Self::Original => "original",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "a4" => Some(Self::A4),
            "letter" => Some(Self::Letter),
            "original" => Some(Self::Original),
            _ => None,
        }
    }

    /// Width and height in inches, or `None` to keep the document's size.
    pub fn dimensions_inches(&self) -> Option<(f64, f64)> {
        match self {
            Self::A4 => Some((8.27, 11.69)),
            Self::Letter => Some((8.5, 11.0)),
            Self::Original => None,
        }
    }
}

/// Requested output colorspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetColorspace {
    Cmyk,
    Rgb,
    #[default]
    Original,
}

impl TargetColorspace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cmyk => "cmyk",
            Self::Rgb => "rgb",
            Self::Original => "original",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cmyk" => Some(Self::Cmyk),
            "rgb" => Some(Self::Rgb),
            "original" => Some(Self::Original),
            _ => None,
        }
    }
}

/// Per-job processing options chosen at upload time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub target_page_size: TargetPageSize,
    #[serde(default)]
    pub target_colorspace: TargetColorspace,
    /// When false the worker stops at `diagnosed` and waits for a re-fix request.
    #[serde(default = "default_auto_fix")]
    pub auto_fix: bool,
}

const fn default_auto_fix() -> bool {
    true
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            target_page_size: TargetPageSize::default(),
            target_colorspace: TargetColorspace::default(),
            auto_fix: default_auto_fix(),
        }
    }
}

/// The uploaded file as accepted at job creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Storage reference handed to the render and tool services
    pub uri: String,
    pub original_filename: String,
    /// Hex SHA-256 of the file bytes
    pub content_hash: String,
    pub size_bytes: u64,
}

/// A print-fix job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub effort: Effort,
    pub aggressiveness: Aggressiveness,
    pub options: JobOptions,
    pub source: SourceFile,
    /// Detected during ingestion
    pub format: Option<DocumentFormat>,
    pub page_count: Option<u32>,
    /// Fix-loop iteration reached in the current loop run
    pub iteration: u32,
    pub issues_found: u32,
    pub fixes_applied: u32,
    pub fixes_failed: u32,
    /// Overall confidence, set once verified
    pub confidence: Option<f64>,
    /// Gating policy snapshot taken when the job was created
    pub gating: GatingPolicy,
    pub documents: DocumentSet,
    pub orchestration: Option<OrchestrationResult>,
    pub verification: Option<VerificationResult>,
    pub error: Option<String>,
    /// Bumped on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(source: SourceFile, effort: Effort, aggressiveness: Aggressiveness, gating: GatingPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: JobState::default(),
            effort,
            aggressiveness,
            options: JobOptions::default(),
            source,
            format: None,
            page_count: None,
            iteration: 0,
            issues_found: 0,
            fixes_applied: 0,
            fixes_failed: 0,
            confidence: None,
            gating,
            documents: DocumentSet::default(),
            orchestration: None,
            verification: None,
            error: None,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: Option<i64>,
}

/// Side effects applied atomically with a state transition.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    /// Error detail recorded on the job (used with `failed`)
    pub error: Option<String>,
    /// Start a fresh fix-loop run at iteration zero
    pub reset_iteration: bool,
}

impl StateUpdate {
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn fresh_loop() -> Self {
        Self {
            reset_iteration: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_chain_is_legal() {
        let chain = [
            JobState::Uploaded,
            JobState::Ingesting,
            JobState::Converting,
            JobState::Rendering,
            JobState::Ingested,
            JobState::Diagnosing,
            JobState::Diagnosed,
            JobState::Fixing,
            JobState::Verifying,
            JobState::Done,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(JobState::Verifying.can_transition_to(JobState::NeedsReview));
    }

    #[test]
    fn test_loop_never_leaves_fixing_to_diagnose() {
        assert!(!JobState::Fixing.can_transition_to(JobState::Diagnosing));
        assert!(!JobState::Diagnosed.can_transition_to(JobState::Diagnosing));
        assert!(!JobState::Fixing.can_operator_transition_to(JobState::Diagnosing));
        assert!(JobState::Diagnosed.can_operator_transition_to(JobState::Diagnosing));
    }

    #[test]
    fn test_review_edges() {
        assert!(JobState::NeedsReview.can_transition_to(JobState::Fixing));
        assert!(JobState::NeedsReview.can_transition_to(JobState::Done));
        assert!(JobState::Done.valid_transitions().is_empty());
        assert!(JobState::Failed.valid_transitions().is_empty());
    }

    #[test]
    fn test_every_active_state_can_fail() {
        for state in JobState::ALL {
            if !state.is_terminal() {
                assert!(state.can_transition_to(JobState::Failed), "{state} cannot fail");
            }
        }
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in JobState::ALL {
            assert_eq!(JobState::from_str(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_effort_caps() {
        assert_eq!(Effort::Quick.max_iterations(), 1);
        assert_eq!(Effort::Standard.max_iterations(), 3);
        assert_eq!(Effort::Thorough.max_iterations(), 5);
        assert_eq!(Effort::Thorough.max_pages_sampled(), None);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(DocumentFormat::from_path("report.DOCX"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_path("/tmp/a.pdf"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_path("notes.txt"), None);
        assert_eq!(DocumentFormat::from_path("noext"), None);
    }

    #[test]
    fn test_office_formats_require_content_types() {
        assert!(DocumentFormat::Pdf.required_entries().is_empty());
        for format in [DocumentFormat::Docx, DocumentFormat::Xlsx, DocumentFormat::Pptx] {
            assert!(format.required_entries().contains(&"[Content_Types].xml"));
        }
        assert!(DocumentFormat::Pptx.required_entries().contains(&"ppt/presentation.xml"));
    }

    #[test]
    fn test_page_size_dimensions() {
        assert_eq!(TargetPageSize::Letter.dimensions_inches(), Some((8.5, 11.0)));
        assert_eq!(TargetPageSize::Original.dimensions_inches(), None);
    }
}
