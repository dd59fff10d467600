//! File inspection and the ingest phase of a job.
//!
//! `uploaded → ingesting → converting → rendering → ingested`. Every failure
//! here is an [`DomainError::Ingestion`]: the job cannot be diagnosed without
//! a readable document and a page render.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    DocumentFormat, DocumentHandle, DocumentSet, IngestionConfig, Job, JobState, RenderSet, SourceFile, StateUpdate,
};
use crate::domain::ports::{JobRepository, Renderer};
use crate::services::state_machine::JobStateMachine;

/// Facts about an uploaded file, gathered before it is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedFile {
    pub path: PathBuf,
    pub format: DocumentFormat,
    pub content_hash: String,
    pub size_bytes: u64,
}

impl InspectedFile {
    pub fn source(&self) -> SourceFile {
        SourceFile {
            uri: self.path.display().to_string(),
            original_filename: self
                .path
                .file_name()
                .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned()),
            content_hash: self.content_hash.clone(),
            size_bytes: self.size_bytes,
        }
    }

    pub fn handle(&self) -> DocumentHandle {
        DocumentHandle::new(self.path.display().to_string(), self.format, self.content_hash.clone())
    }
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Check extension, size, leading bytes and package parts, and hash the
/// content.
pub async fn inspect_file(path: &Path, config: &IngestionConfig) -> DomainResult<InspectedFile> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        DomainError::Ingestion(format!(
            "unsupported file type: {} (expected .pdf, .docx, .xlsx or .pptx)",
            path.display()
        ))
    })?;

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| DomainError::Ingestion(format!("cannot read {}: {e}", path.display())))?;
    let limit = config.max_upload_bytes();
    if metadata.len() > limit {
        return Err(DomainError::Ingestion(format!(
            "{} is {} bytes, limit is {limit}",
            path.display(),
            metadata.len()
        )));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| DomainError::Ingestion(format!("cannot read {}: {e}", path.display())))?;
    if !bytes.starts_with(format.magic_bytes()) {
        return Err(DomainError::Ingestion(format!(
            "{} does not look like a {format} file",
            path.display()
        )));
    }
    check_package(path, format, &bytes)?;

    let path = tokio::fs::canonicalize(path).await.unwrap_or_else(|_| path.to_path_buf());
    Ok(InspectedFile {
        path,
        format,
        content_hash: content_hash(&bytes),
        size_bytes: bytes.len() as u64,
    })
}

/// Office formats are zip packages; the archive must open and hold the
/// parts the format requires.
fn check_package(path: &Path, format: DocumentFormat, bytes: &[u8]) -> DomainResult<()> {
    let required = format.required_entries();
    if required.is_empty() {
        return Ok(());
    }

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DomainError::Ingestion(format!("{} is not a valid {format} package: {e}", path.display())))?;
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|entry| archive.by_name(entry).is_err())
        .collect();
    if !missing.is_empty() {
        return Err(DomainError::Ingestion(format!(
            "{} is missing required {format} parts: {}",
            path.display(),
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Drives a job from `uploaded` to `ingested`.
pub struct IngestionPipeline<R: JobRepository> {
    machine: JobStateMachine<R>,
    renderer: Arc<dyn Renderer>,
    config: IngestionConfig,
    render_timeout: Duration,
}

impl<R: JobRepository> IngestionPipeline<R> {
    pub fn new(
        machine: JobStateMachine<R>,
        renderer: Arc<dyn Renderer>,
        config: IngestionConfig,
        render_timeout: Duration,
    ) -> Self {
        Self {
            machine,
            renderer,
            config,
            render_timeout,
        }
    }

    /// Run the remaining ingest steps for `job`. Resumes from whichever
    /// ingest state the job is in; intermediate results are recomputed.
    pub async fn run(&self, job: Job) -> DomainResult<Job> {
        let id = job.id;
        let mut current = job;
        let mut inspected: Option<InspectedFile> = None;
        let mut pdf: Option<DocumentHandle> = None;

        loop {
            current = match current.state {
                JobState::Uploaded => {
                    self.machine
                        .advance(id, JobState::Uploaded, JobState::Ingesting, StateUpdate::default())
                        .await?
                }
                JobState::Ingesting => {
                    inspected = Some(self.inspect(&current).await?);
                    self.machine
                        .advance(id, JobState::Ingesting, JobState::Converting, StateUpdate::default())
                        .await?
                }
                JobState::Converting => {
                    let file = match inspected.take() {
                        Some(file) => file,
                        None => self.inspect(&current).await?,
                    };
                    pdf = Some(self.pdf_for(&file.handle()).await?);
                    inspected = Some(file);
                    self.machine
                        .advance(id, JobState::Converting, JobState::Rendering, StateUpdate::default())
                        .await?
                }
                JobState::Rendering => {
                    let file = match inspected.take() {
                        Some(file) => file,
                        None => self.inspect(&current).await?,
                    };
                    let original = file.handle();
                    let pdf = match pdf.take() {
                        Some(pdf) => pdf,
                        None => self.pdf_for(&original).await?,
                    };
                    let render = self.render(&pdf).await?;
                    let page_count = render.page_count();
                    if page_count == 0 {
                        return Err(DomainError::Ingestion("document rendered to zero pages".to_string()));
                    }

                    let documents = DocumentSet {
                        original: Some(original.clone()),
                        working: Some(original),
                        pdf: Some(pdf),
                        pdf_patches: Vec::new(),
                        initial_render: render.clone(),
                        current_render: render,
                    };
                    self.machine
                        .repository()
                        .record_ingestion(id, file.format, page_count, &documents)
                        .await
                        .map_err(|e| match e {
                            DomainError::JobNotFound(_) => DomainError::Cancelled(id),
                            other => other,
                        })?;
                    info!(job_id = %id, format = %file.format, page_count, "Document ingested");

                    self.machine
                        .advance(id, JobState::Rendering, JobState::Ingested, StateUpdate::default())
                        .await?
                }
                _ => return Ok(current),
            };
        }
    }

    async fn inspect(&self, job: &Job) -> DomainResult<InspectedFile> {
        let file = inspect_file(Path::new(&job.source.uri), &self.config).await?;
        if file.content_hash != job.source.content_hash {
            return Err(DomainError::Ingestion(format!(
                "{} changed after upload",
                job.source.original_filename
            )));
        }
        debug!(job_id = %job.id, format = %file.format, bytes = file.size_bytes, "Upload inspected");
        Ok(file)
    }

    /// PDF uploads are their own PDF representation and skip the converter.
    async fn pdf_for(&self, original: &DocumentHandle) -> DomainResult<DocumentHandle> {
        if original.format == DocumentFormat::Pdf {
            return Ok(original.clone());
        }
        match tokio::time::timeout(self.render_timeout, self.renderer.convert_to_pdf(original)).await {
            Ok(Ok(pdf)) => Ok(pdf),
            Ok(Err(e)) => Err(DomainError::Ingestion(format!("conversion to PDF failed: {e}"))),
            Err(_) => Err(DomainError::Ingestion(format!(
                "conversion to PDF timed out after {}s",
                self.render_timeout.as_secs()
            ))),
        }
    }

    async fn render(&self, pdf: &DocumentHandle) -> DomainResult<RenderSet> {
        match tokio::time::timeout(self.render_timeout, self.renderer.render_pages(pdf)).await {
            Ok(Ok(render)) => Ok(render),
            Ok(Err(e)) => Err(DomainError::Ingestion(format!("page rendering failed: {e}"))),
            Err(_) => Err(DomainError::Ingestion(format!(
                "page rendering timed out after {}s",
                self.render_timeout.as_secs()
            ))),
        }
    }
}
