//! In-process tool executor and renderer.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DocumentFormat, DocumentHandle, PageImage, RenderSet, ToolInvocation, ToolOutcome};
use crate::domain::ports::{Renderer, ToolExecutor};

/// Hash of a revision derived from its parent and the edit applied to it.
fn derive_hash(parent: &str, edit: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.as_bytes());
    hasher.update(b"\0");
    hasher.update(edit.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Tool executor that succeeds unless told otherwise.
///
/// Every successful invocation yields a new revision whose hash depends on
/// the parent revision, the tool and its parameters.
#[derive(Debug, Default)]
pub struct MockToolExecutor {
    failing: HashSet<String>,
    erroring: HashSet<String>,
    delay: Option<Duration>,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `success: false` for every call of `tool`.
    pub fn failing(mut self, tool: impl Into<String>) -> Self {
        self.failing.insert(tool.into());
        self
    }

    /// Return an error for every call of `tool`.
    pub fn erroring(mut self, tool: impl Into<String>) -> Self {
        self.erroring.insert(tool.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Invocations received so far, in order.
    pub async fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().await.clone()
    }

    pub async fn calls_to(&self, tool: &str) -> usize {
        self.invocations.lock().await.iter().filter(|i| i.tool == tool).count()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    async fn invoke(&self, invocation: &ToolInvocation, document: &DocumentHandle) -> DomainResult<ToolOutcome> {
        self.invocations.lock().await.push(invocation.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.erroring.contains(&invocation.tool) {
            return Err(DomainError::ToolExecution {
                tool: invocation.tool.clone(),
                message: "mock tool crashed".to_string(),
            });
        }
        if self.failing.contains(&invocation.tool) {
            return Ok(ToolOutcome::failed(format!("{} could not apply the change", invocation.tool)));
        }

        let edit = format!("{}:{}", invocation.tool, serde_json::Value::Object(invocation.params.clone()));
        let hash = derive_hash(&document.content_hash, &edit);
        Ok(ToolOutcome::succeeded(DocumentHandle::new(
            format!("{}@{}", document.uri, &hash[..12]),
            document.format,
            hash,
        )))
    }
}

/// Renderer that fabricates page images without touching any file.
#[derive(Debug)]
pub struct MockRenderer {
    pages: u32,
    conversion_error: Option<String>,
    conversions: AtomicUsize,
}

impl MockRenderer {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            conversion_error: None,
            conversions: AtomicUsize::new(0),
        }
    }

    pub fn failing_conversion(mut self, reason: impl Into<String>) -> Self {
        self.conversion_error = Some(reason.into());
        self
    }

    pub fn conversions(&self) -> usize {
        self.conversions.load(Ordering::SeqCst)
    }
}

impl Default for MockRenderer {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn convert_to_pdf(&self, document: &DocumentHandle) -> DomainResult<DocumentHandle> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.conversion_error {
            return Err(DomainError::Provider(reason.clone()));
        }
        if document.format == DocumentFormat::Pdf {
            return Ok(document.clone());
        }

        let hash = derive_hash(&document.content_hash, "convert:pdf");
        Ok(DocumentHandle::new(format!("{}.pdf", document.uri), DocumentFormat::Pdf, hash))
    }

    async fn render_pages(&self, pdf: &DocumentHandle) -> DomainResult<RenderSet> {
        let pages = (1..=self.pages)
            .map(|page| PageImage {
                page,
                uri: format!("{}#page={page}", pdf.uri),
            })
            .collect();
        Ok(RenderSet { pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolParams;

    fn invocation(tool: &str) -> ToolInvocation {
        ToolInvocation {
            tool: tool.to_string(),
            target_format: DocumentFormat::Docx,
            params: ToolParams::new(),
            issues: vec![],
            fallback: false,
            rationale: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_successful_invocation_changes_hash() {
        let executor = MockToolExecutor::new();
        let doc = DocumentHandle::new("mem://a.docx", DocumentFormat::Docx, "parent");
        let outcome = executor.invoke(&invocation("set_margins"), &doc).await.unwrap();

        assert!(outcome.success);
        let revised = outcome.document.unwrap();
        assert_ne!(revised.content_hash, doc.content_hash);
        assert_eq!(revised.format, DocumentFormat::Docx);
    }

    #[tokio::test]
    async fn test_failing_tool() {
        let executor = MockToolExecutor::new().failing("replace_font");
        let doc = DocumentHandle::new("mem://a.docx", DocumentFormat::Docx, "parent");
        let outcome = executor.invoke(&invocation("replace_font"), &doc).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert_eq!(executor.calls_to("replace_font").await, 1);
    }

    #[tokio::test]
    async fn test_pdf_conversion_is_identity_for_pdf() {
        let renderer = MockRenderer::default();
        let pdf = DocumentHandle::new("mem://a.pdf", DocumentFormat::Pdf, "h");
        assert_eq!(renderer.convert_to_pdf(&pdf).await.unwrap(), pdf);

        let docx = DocumentHandle::new("mem://a.docx", DocumentFormat::Docx, "h");
        let converted = renderer.convert_to_pdf(&docx).await.unwrap();
        assert_eq!(converted.format, DocumentFormat::Pdf);
        assert_eq!(renderer.render_pages(&converted).await.unwrap().page_count(), 3);
    }
}
