//! Runs both diagnosis passes against one revision and merges them.
//!
//! Passes run concurrently, each under its own timeout. A pass that errors or
//! times out is recorded as degraded and contributes no issues.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::adapters::cache::{DiagnosisCache, DiagnosisCacheKey};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Diagnosis, DocumentHandle, Effort, Issue, PageImage, RenderSet};
use crate::domain::ports::DiagnosisProvider;
use crate::services::diagnosis_merger::{self, PassOutcome};

pub struct DiagnosisService {
    provider: Arc<dyn DiagnosisProvider>,
    cache: DiagnosisCache,
    timeout: Duration,
}

impl DiagnosisService {
    pub fn new(provider: Arc<dyn DiagnosisProvider>, cache: DiagnosisCache, timeout: Duration) -> Self {
        Self { provider, cache, timeout }
    }

    /// Diagnose `document` and its rendered pages at the given effort tier.
    ///
    /// The returned diagnosis is not yet bound to a job.
    pub async fn diagnose(&self, document: &DocumentHandle, render: &RenderSet, effort: Effort) -> Diagnosis {
        let key = DiagnosisCacheKey::new(document.content_hash.clone(), effort);
        if let Some(issues) = self.cache.get(&key).await {
            debug!(content_hash = %document.content_hash, %effort, "Diagnosis cache hit");
            let mut diagnosis = Diagnosis::new(issues.as_ref().clone(), vec![]);
            diagnosis.cached = true;
            return diagnosis;
        }

        let pages = render.sample(effort.max_pages_sampled());
        let (visual, structural) = tokio::join!(
            self.with_timeout(self.visual_pass(pages, effort.page_batch_size())),
            self.with_timeout(self.provider.diagnose_structural(document)),
        );

        for (pass, result) in [("visual", &visual), ("structural", &structural)] {
            if let Err(e) = result {
                warn!(pass, provider = self.provider.name(), error = %e, "Diagnosis pass degraded");
            }
        }

        let diagnosis = diagnosis_merger::merge(PassOutcome::from_result(visual), PassOutcome::from_result(structural));
        if !diagnosis.is_degraded() {
            self.cache.insert(key, diagnosis.issues.clone()).await;
        }
        diagnosis
    }

    async fn visual_pass(&self, pages: Vec<PageImage>, batch_size: usize) -> DomainResult<Vec<Issue>> {
        if pages.is_empty() {
            return Ok(Vec::new());
        }

        let calls: Vec<_> = pages
            .chunks(batch_size.max(1))
            .map(|batch| self.provider.diagnose_visual(batch))
            .collect();
        let batches = try_join_all(calls).await?;

        Ok(batches.into_iter().flatten().collect())
    }

    async fn with_timeout<T>(&self, call: impl Future<Output = DomainResult<T>>) -> DomainResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(DomainError::ProviderTimeout {
                    provider: self.provider.name().to_string(),
                    timeout: self.timeout,
                })
            })
    }
}
