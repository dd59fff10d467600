//! Ports for the external diagnosis, tool, render and rationale services.
//!
//! The engine never looks inside these collaborators. Callers wrap every
//! call in a timeout; implementations only report success or failure.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{DocumentHandle, Issue, PageImage, PlanDecision, RenderSet, ToolInvocation, ToolOutcome};

/// Issue detection passes.
#[async_trait]
pub trait DiagnosisProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect rendered page images.
    async fn diagnose_visual(&self, pages: &[PageImage]) -> DomainResult<Vec<Issue>>;

    /// Inspect the document structure.
    async fn diagnose_structural(&self, document: &DocumentHandle) -> DomainResult<Vec<Issue>>;
}

/// Document editing tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run a tool against a document revision. A tool that ran but could not
    /// fix anything reports `success: false` rather than an error.
    async fn invoke(&self, invocation: &ToolInvocation, document: &DocumentHandle) -> DomainResult<ToolOutcome>;
}

/// Format conversion and page rendering.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Produce a PDF revision of the document. PDFs come back unchanged.
    async fn convert_to_pdf(&self, document: &DocumentHandle) -> DomainResult<DocumentHandle>;

    /// Render a PDF to page images.
    async fn render_pages(&self, pdf: &DocumentHandle) -> DomainResult<RenderSet>;
}

/// Supplies human-readable rationale for planner decisions.
///
/// The text never changes the decision itself.
#[async_trait]
pub trait RationaleProvider: Send + Sync {
    async fn explain(&self, issue: &Issue, decision: &PlanDecision) -> DomainResult<String>;
}
