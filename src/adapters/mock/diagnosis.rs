//! Scripted diagnosis provider.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DocumentHandle, Issue, IssueSource, IssueType, PageImage, Severity};
use crate::domain::ports::DiagnosisProvider;

/// One scripted response.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    Issues(Vec<Issue>),
    Fail(String),
}

/// Responses handed out in order; the last one repeats forever.
#[derive(Debug, Default)]
struct Script {
    steps: Vec<ScriptedResponse>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl Script {
    async fn next(&self) -> DomainResult<Vec<Issue>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = match self.steps.len() {
            0 => return Ok(Vec::new()),
            len => &self.steps[call.min(len - 1)],
        };
        match step {
            ScriptedResponse::Issues(issues) => Ok(issues.clone()),
            ScriptedResponse::Fail(reason) => Err(DomainError::Provider(reason.clone())),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Diagnosis provider that replays scripted issue lists.
///
/// A provider with no script reports a clean document.
#[derive(Debug, Default)]
pub struct ScriptedDiagnosisProvider {
    visual: Script,
    structural: Script,
    visual_pages: AtomicUsize,
}

impl ScriptedDiagnosisProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider used by `worker run --mock`: a margin problem on the first
    /// structural pass that the fix loop then clears.
    pub fn demo() -> Self {
        Self::new()
            .with_structural(vec![Issue::new(
                IssueType::MarginViolation,
                Severity::Warning,
                IssueSource::Structural,
                "Left margin below printable area",
            )
            .on_page(1)])
            .with_structural(vec![])
    }

    /// Append a visual response.
    pub fn with_visual(mut self, issues: Vec<Issue>) -> Self {
        self.visual.steps.push(ScriptedResponse::Issues(issues));
        self
    }

    /// Append a structural response.
    pub fn with_structural(mut self, issues: Vec<Issue>) -> Self {
        self.structural.steps.push(ScriptedResponse::Issues(issues));
        self
    }

    pub fn failing_visual(mut self, reason: impl Into<String>) -> Self {
        self.visual.steps.push(ScriptedResponse::Fail(reason.into()));
        self
    }

    pub fn failing_structural(mut self, reason: impl Into<String>) -> Self {
        self.structural.steps.push(ScriptedResponse::Fail(reason.into()));
        self
    }

    pub fn with_visual_delay(mut self, delay: Duration) -> Self {
        self.visual.delay = Some(delay);
        self
    }

    pub fn with_structural_delay(mut self, delay: Duration) -> Self {
        self.structural.delay = Some(delay);
        self
    }

    /// Structural passes run so far.
    pub fn structural_calls(&self) -> usize {
        self.structural.calls()
    }

    /// Visual batches diagnosed so far.
    pub fn visual_calls(&self) -> usize {
        self.visual.calls()
    }

    pub fn visual_pages_seen(&self) -> usize {
        self.visual_pages.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiagnosisProvider for ScriptedDiagnosisProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn diagnose_visual(&self, pages: &[PageImage]) -> DomainResult<Vec<Issue>> {
        self.visual_pages.fetch_add(pages.len(), Ordering::SeqCst);
        self.visual.next().await
    }

    async fn diagnose_structural(&self, _document: &DocumentHandle) -> DomainResult<Vec<Issue>> {
        self.structural.next().await
    }
}
