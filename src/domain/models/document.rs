//! Document handles and render sets exchanged with external services.

use serde::{Deserialize, Serialize};

use super::fix::ToolInvocation;
use super::job::DocumentFormat;

/// Opaque reference to one revision of a document held by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentHandle {
    pub uri: String,
    pub format: DocumentFormat,
    /// Hex SHA-256 of the revision's bytes
    pub content_hash: String,
}

impl DocumentHandle {
    pub fn new(uri: impl Into<String>, format: DocumentFormat, content_hash: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            format,
            content_hash: content_hash.into(),
        }
    }
}

/// One rendered page image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-based page number
    pub page: u32,
    pub uri: String,
}

/// Page images of one rendered revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderSet {
    pub pages: Vec<PageImage>,
}

impl RenderSet {
    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    pub fn page(&self, page: u32) -> Option<&PageImage> {
        self.pages.iter().find(|p| p.page == page)
    }

    /// Evenly spaced subset of at most `limit` pages, always keeping the first and last.
    pub fn sample(&self, limit: Option<usize>) -> Vec<PageImage> {
        let total = self.pages.len();
        match limit {
            Some(limit) if limit > 0 && total > limit => {
                if limit == 1 {
                    return vec![self.pages[0].clone()];
                }
                let mut picked: Vec<usize> = (0..limit).map(|i| i * (total - 1) / (limit - 1)).collect();
                picked.dedup();
                picked.into_iter().map(|i| self.pages[i].clone()).collect()
            }
            _ => self.pages.clone(),
        }
    }
}

/// Every representation of a job's document the engine keeps track of.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSet {
    /// The uploaded file
    pub original: Option<DocumentHandle>,
    /// Latest revision in the original format
    pub working: Option<DocumentHandle>,
    /// PDF rendering of `working` with `pdf_patches` applied
    pub pdf: Option<DocumentHandle>,
    /// Successful PDF fallback invocations, replayed after every conversion
    #[serde(default)]
    pub pdf_patches: Vec<ToolInvocation>,
    /// Page images of the ingested document
    #[serde(default)]
    pub initial_render: RenderSet,
    /// Page images of the latest revision
    #[serde(default)]
    pub current_render: RenderSet,
}

impl DocumentSet {
    /// Revision that would be delivered: the patched PDF once any fallback
    /// fix has landed, otherwise the working revision.
    pub fn deliverable(&self) -> Option<&DocumentHandle> {
        if self.pdf_patches.is_empty() {
            self.working.as_ref()
        } else {
            self.pdf.as_ref()
        }
    }
}
