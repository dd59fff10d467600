//! Fix-loop controller.
//!
//! Runs inside the `fixing` state:
//!
//! ```text
//! loop:
//!   diagnose the current revision and record it
//!   clean                 -> stop (converged)
//!   iteration == max      -> stop (iteration_cap)
//!   plan; nothing to run  -> stop (no_actionable_fixes)
//!   run original-format invocations
//!   route missing or failed fixes to the PDF representation, once
//!   re-render, persist progress, iteration += 1
//! ```
//!
//! Suspension only happens at provider calls. The loop never leaves `fixing`
//! until it stops, and then hands the job to verification.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Aggressiveness, Config, Diagnosis, DiagnosisPhase, DocumentFormat, DocumentHandle, DocumentSet, FallbackReason,
    FallbackRecord, Fix, FixPlan, Issue, IssueKey, Job, JobState, OrchestrationResult, PlanOutcome, Severity,
    StateUpdate, StopReason, ToolInvocation,
};
use crate::domain::ports::{JobRepository, LoopProgress, RationaleProvider, Renderer, ToolExecutor};
use crate::services::diagnosis_service::DiagnosisService;
use crate::services::fix_planner::{self, PlanningContext};
use crate::services::state_machine::JobStateMachine;
use crate::services::tool_registry::{ParamContext, ToolRegistry};

/// Failures of the same tool on the same issue after which it is not planned again.
const MAX_FAILURES_PER_TOOL: u32 = 2;

/// Timeouts and policy knobs for the fix loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub tool_timeout: Duration,
    pub render_timeout: Duration,
    pub rationale_timeout: Duration,
    pub severity_floor: Severity,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            tool_timeout: Duration::from_secs(60),
            render_timeout: Duration::from_secs(180),
            rationale_timeout: Duration::from_secs(30),
            severity_floor: Severity::Warning,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tool_timeout: Duration::from_secs(config.providers.tool_timeout_secs),
            render_timeout: Duration::from_secs(config.providers.render_timeout_secs),
            rationale_timeout: Duration::from_secs(config.providers.rationale_timeout_secs),
            severity_floor: config.planner.severity_floor,
        }
    }
}

/// Mutable state of one loop run.
struct LoopRun {
    job_id: uuid::Uuid,
    format: DocumentFormat,
    iteration: u32,
    documents: DocumentSet,
    fixes: Vec<Fix>,
    fallbacks: Vec<FallbackRecord>,
    /// Failed attempts per (issue, tool) across the whole job
    failures: HashMap<(IssueKey, String), u32>,
    initial_blocking: Option<u32>,
    final_blocking: u32,
}

impl LoopRun {
    fn exhausted(&self) -> std::collections::HashSet<(IssueKey, String)> {
        self.failures
            .iter()
            .filter(|(_, count)| **count >= MAX_FAILURES_PER_TOOL)
            .map(|(pair, _)| pair.clone())
            .collect()
    }

    fn record_failure(&mut self, invocation: &ToolInvocation) {
        for key in &invocation.issues {
            *self.failures.entry((*key, invocation.tool.clone())).or_insert(0) += 1;
        }
    }
}

/// Fallback invocation plus the issues it stands in for.
struct FallbackGroup {
    invocation: ToolInvocation,
    reasons: Vec<(IssueKey, FallbackReason)>,
}

pub struct Orchestrator<R: JobRepository> {
    machine: JobStateMachine<R>,
    diagnosis: Arc<DiagnosisService>,
    registry: Arc<ToolRegistry>,
    executor: Arc<dyn ToolExecutor>,
    renderer: Arc<dyn Renderer>,
    rationale: Option<Arc<dyn RationaleProvider>>,
    settings: OrchestratorSettings,
}

impl<R: JobRepository> Orchestrator<R> {
    pub fn new(
        machine: JobStateMachine<R>,
        diagnosis: Arc<DiagnosisService>,
        registry: Arc<ToolRegistry>,
        executor: Arc<dyn ToolExecutor>,
        renderer: Arc<dyn Renderer>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            machine,
            diagnosis,
            registry,
            executor,
            renderer,
            rationale: None,
            settings,
        }
    }

    /// Let an external service phrase smart-auto rationales.
    pub fn with_rationale_provider(mut self, provider: Arc<dyn RationaleProvider>) -> Self {
        self.rationale = Some(provider);
        self
    }

    /// Run the fix loop for a job in `fixing` and move it to `verifying`.
    ///
    /// A job found mid-loop resumes from its persisted iteration and document
    /// set, starting with a fresh diagnosis.
    #[instrument(skip(self, job), fields(job_id = %job.id, effort = %job.effort, aggressiveness = %job.aggressiveness))]
    pub async fn run(&self, job: &Job) -> DomainResult<Job> {
        if job.state != JobState::Fixing {
            return Err(DomainError::Validation(format!(
                "job {} is {}, the fix loop runs in fixing",
                job.id, job.state
            )));
        }
        let format = job
            .format
            .ok_or_else(|| DomainError::Validation(format!("job {} has not been ingested", job.id)))?;

        let repo = self.machine.repository();
        let mut failures = HashMap::new();
        for fix in repo.list_fixes(job.id).await?.iter().filter(|f| !f.success) {
            for key in &fix.issues {
                *failures.entry((*key, fix.tool.clone())).or_insert(0) += 1;
            }
        }

        let max_iterations = job.effort.max_iterations();
        let started_at = Utc::now();
        let mut run = LoopRun {
            job_id: job.id,
            format,
            iteration: job.iteration,
            documents: job.documents.clone(),
            fixes: Vec::new(),
            fallbacks: Vec::new(),
            failures,
            initial_blocking: None,
            final_blocking: 0,
        };
        if run.iteration > 0 {
            info!(iteration = run.iteration, "Resuming fix loop");
        }

        let stop_reason = loop {
            let diagnosis = self.diagnose(job, &run).await?;
            let blocking = diagnosis.summary.critical + diagnosis.summary.warning;
            run.initial_blocking.get_or_insert(blocking);
            run.final_blocking = blocking;

            if diagnosis.is_clean() {
                break StopReason::Converged;
            }
            if run.iteration >= max_iterations {
                break StopReason::IterationCap;
            }

            let mut plan = fix_planner::plan(&diagnosis, &self.registry, &self.planning_context(job, format, &run));
            self.explain(job, &diagnosis, &mut plan).await;
            for decision in &plan.decisions {
                debug!(
                    issue = %decision.issue,
                    outcome = decision.outcome.as_str(),
                    tool = decision.tool.as_deref().unwrap_or("-"),
                    rationale = %decision.rationale,
                    "Plan decision"
                );
            }

            if !self.iterate(job, &diagnosis, plan, &mut run).await? {
                break StopReason::NoActionableFixes;
            }

            run.iteration += 1;
            self.save_progress(job, &run).await?;
        };

        info!(
            iterations = run.iteration,
            stop_reason = %stop_reason,
            fixes = run.fixes.len(),
            fallbacks = run.fallbacks.len(),
            "Fix loop stopped"
        );

        self.save_progress(job, &run).await?;
        let result = OrchestrationResult {
            iterations: run.iteration,
            max_iterations,
            stop_reason,
            fixes: run.fixes,
            fallbacks: run.fallbacks,
            initial_blocking: run.initial_blocking.unwrap_or(0),
            final_blocking: run.final_blocking,
            started_at,
            finished_at: Utc::now(),
        };
        repo.record_orchestration(job.id, &result).await.map_err(|e| cancelled_if_gone(job.id, e))?;

        self.machine
            .advance(job.id, JobState::Fixing, JobState::Verifying, StateUpdate::default())
            .await
    }

    async fn diagnose(&self, job: &Job, run: &LoopRun) -> DomainResult<Diagnosis> {
        self.machine.cancellations().check(job.id)?;
        let document = run
            .documents
            .deliverable()
            .ok_or_else(|| DomainError::Validation(format!("job {} has no working document", job.id)))?;

        let diagnosis = self
            .diagnosis
            .diagnose(document, &run.documents.current_render, job.effort)
            .await
            .for_job(job.id, run.iteration, DiagnosisPhase::FixLoop);

        // A deletion that landed during the provider call discards the result.
        self.machine.cancellations().check(job.id)?;
        self.machine
            .repository()
            .append_diagnosis(job.id, &diagnosis)
            .await
            .map_err(|e| cancelled_if_gone(job.id, e))?;

        debug!(
            iteration = run.iteration,
            critical = diagnosis.summary.critical,
            warning = diagnosis.summary.warning,
            info = diagnosis.summary.info,
            cached = diagnosis.cached,
            "Loop diagnosis recorded"
        );
        Ok(diagnosis)
    }

    fn planning_context(&self, job: &Job, format: DocumentFormat, run: &LoopRun) -> PlanningContext {
        PlanningContext {
            format,
            aggressiveness: job.aggressiveness,
            params: ParamContext {
                page_size: job.options.target_page_size,
                colorspace: job.options.target_colorspace,
            },
            severity_floor: self.settings.severity_floor,
            exhausted: run.exhausted(),
        }
    }

    /// Execute one iteration's plan. Returns false when nothing could be run.
    async fn iterate(&self, job: &Job, diagnosis: &Diagnosis, plan: FixPlan, run: &mut LoopRun) -> DomainResult<bool> {
        let ctx = self.planning_context(job, run.format, run);
        let mut pending: Vec<(Issue, FallbackReason)> = plan
            .unfixable()
            .filter_map(|d| diagnosis.find(d.issue))
            .map(|issue| (issue.clone(), FallbackReason::ToolMissing))
            .collect();

        let has_fallback = pending
            .iter()
            .any(|(issue, reason)| self.fallback_invocation(issue, reason, run.format, &ctx).is_some());
        if plan.is_empty() && !has_fallback {
            return Ok(false);
        }

        let mut working_changed = false;
        for invocation in &plan.invocations {
            self.machine.cancellations().check(job.id)?;
            let working = run
                .documents
                .working
                .clone()
                .ok_or_else(|| DomainError::Validation(format!("job {} has no working document", job.id)))?;

            match self.run_tool(invocation, &working).await {
                Ok(revised) => {
                    run.documents.working = Some(revised);
                    working_changed = true;
                    self.record_fix(run, invocation, None).await?;
                }
                Err(error) => {
                    warn!(tool = %invocation.tool, error = %error, "Tool invocation failed");
                    run.record_failure(invocation);
                    self.record_fix(run, invocation, Some(error.clone())).await?;
                    for key in &invocation.issues {
                        if let Some(issue) = diagnosis.find(*key) {
                            let reason = FallbackReason::ToolFailed {
                                tool: invocation.tool.clone(),
                                error: error.clone(),
                            };
                            pending.push((issue.clone(), reason));
                        }
                    }
                }
            }
        }

        let groups = if run.format == DocumentFormat::Pdf {
            Vec::new()
        } else {
            self.group_fallbacks(&pending, &self.planning_context(job, run.format, run))
        };

        if working_changed || run.documents.pdf.is_none() {
            self.rebuild_pdf(&mut run.documents).await?;
        }
        for group in groups {
            self.apply_fallback(job, group, run).await?;
        }

        self.machine.cancellations().check(job.id)?;
        let pdf = run
            .documents
            .pdf
            .clone()
            .ok_or_else(|| DomainError::Validation(format!("job {} has no PDF representation", job.id)))?;
        run.documents.current_render = self.with_render_timeout(self.renderer.render_pages(&pdf)).await?;
        Ok(true)
    }

    fn fallback_invocation(
        &self,
        issue: &Issue,
        reason: &FallbackReason,
        format: DocumentFormat,
        ctx: &PlanningContext,
    ) -> Option<ToolInvocation> {
        if format == DocumentFormat::Pdf {
            return None;
        }
        let choice = self.registry.choose(issue, DocumentFormat::Pdf)?;
        if ctx.is_exhausted(issue.key(), choice.spec.name) {
            return None;
        }
        let params = self.registry.resolve_params(&choice, issue, &ctx.params).ok()?;

        let rationale = match reason {
            FallbackReason::ToolMissing => format!(
                "no {format} tool addresses {}; applying {} to the PDF",
                issue.issue_type, choice.spec.name
            ),
            FallbackReason::ToolFailed { tool, .. } => {
                format!("{tool} failed; applying {} to the PDF instead", choice.spec.name)
            }
        };
        Some(ToolInvocation {
            tool: choice.spec.name.to_string(),
            target_format: DocumentFormat::Pdf,
            params,
            issues: vec![issue.key()],
            fallback: true,
            rationale,
        })
    }

    fn group_fallbacks(&self, pending: &[(Issue, FallbackReason)], ctx: &PlanningContext) -> Vec<FallbackGroup> {
        let mut groups: Vec<FallbackGroup> = Vec::new();
        for (issue, reason) in pending {
            let Some(invocation) = self.fallback_invocation(issue, reason, ctx.format, ctx) else {
                debug!(issue = %issue.key(), "No PDF fallback available");
                continue;
            };
            let key = issue.key();
            match groups
                .iter_mut()
                .find(|g| g.invocation.tool == invocation.tool && g.invocation.params == invocation.params)
            {
                Some(group) => {
                    if !group.invocation.issues.contains(&key) {
                        group.invocation.issues.push(key);
                    }
                    group.reasons.push((key, reason.clone()));
                }
                None => groups.push(FallbackGroup {
                    invocation,
                    reasons: vec![(key, reason.clone())],
                }),
            }
        }
        groups
    }

    async fn apply_fallback(&self, job: &Job, group: FallbackGroup, run: &mut LoopRun) -> DomainResult<()> {
        self.machine.cancellations().check(job.id)?;
        let pdf = run
            .documents
            .pdf
            .clone()
            .ok_or_else(|| DomainError::Validation(format!("job {} has no PDF representation", job.id)))?;

        let invocation = group.invocation;
        info!(tool = %invocation.tool, issues = invocation.issues.len(), "Routing to PDF fallback");
        let success = match self.run_tool(&invocation, &pdf).await {
            Ok(patched) => {
                run.documents.pdf = Some(patched);
                run.documents.pdf_patches.push(invocation.clone());
                self.record_fix(run, &invocation, None).await?;
                true
            }
            Err(error) => {
                warn!(tool = %invocation.tool, error = %error, "PDF fallback failed");
                run.record_failure(&invocation);
                self.record_fix(run, &invocation, Some(error)).await?;
                false
            }
        };

        for (issue, reason) in group.reasons {
            run.fallbacks.push(FallbackRecord {
                iteration: run.iteration,
                issue,
                reason,
                tool: invocation.tool.clone(),
                success,
            });
        }
        Ok(())
    }

    /// Convert the working revision and replay every PDF patch on top of it.
    /// A patch that no longer applies is dropped.
    async fn rebuild_pdf(&self, documents: &mut DocumentSet) -> DomainResult<()> {
        let working = documents
            .working
            .clone()
            .ok_or_else(|| DomainError::Validation("no working document to convert".to_string()))?;
        let mut pdf = if working.format == DocumentFormat::Pdf {
            working
        } else {
            self.with_render_timeout(self.renderer.convert_to_pdf(&working)).await?
        };

        let mut applied = Vec::with_capacity(documents.pdf_patches.len());
        for patch in documents.pdf_patches.drain(..) {
            match self.run_tool(&patch, &pdf).await {
                Ok(patched) => {
                    pdf = patched;
                    applied.push(patch);
                }
                Err(error) => warn!(tool = %patch.tool, error = %error, "PDF patch no longer applies, dropped"),
            }
        }
        documents.pdf_patches = applied;
        documents.pdf = Some(pdf);
        Ok(())
    }

    /// Run one invocation under the tool timeout. Any failure is returned as text.
    async fn run_tool(&self, invocation: &ToolInvocation, document: &DocumentHandle) -> Result<DocumentHandle, String> {
        let call = self.registry.execute(self.executor.as_ref(), invocation, document);
        match tokio::time::timeout(self.settings.tool_timeout, call).await {
            Ok(Ok(outcome)) if outcome.success => outcome
                .document
                .ok_or_else(|| "tool reported success without a document".to_string()),
            Ok(Ok(outcome)) => Err(outcome.error.unwrap_or_else(|| "tool reported failure".to_string())),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", self.settings.tool_timeout.as_secs())),
        }
    }

    async fn record_fix(&self, run: &mut LoopRun, invocation: &ToolInvocation, error: Option<String>) -> DomainResult<()> {
        let fix = Fix::record(run.job_id, run.iteration, invocation, error.is_none(), error);
        self.machine
            .repository()
            .append_fix(run.job_id, &fix)
            .await
            .map_err(|e| cancelled_if_gone(run.job_id, e))?;
        run.fixes.push(fix);
        Ok(())
    }

    async fn save_progress(&self, job: &Job, run: &LoopRun) -> DomainResult<()> {
        let applied = u32::try_from(run.fixes.iter().filter(|f| f.success).count()).unwrap_or(u32::MAX);
        let failed = u32::try_from(run.fixes.iter().filter(|f| !f.success).count()).unwrap_or(u32::MAX);
        let progress = LoopProgress {
            iteration: run.iteration,
            documents: run.documents.clone(),
            issues_found: job.issues_found,
            fixes_applied: job.fixes_applied.saturating_add(applied),
            fixes_failed: job.fixes_failed.saturating_add(failed),
        };
        self.machine
            .repository()
            .record_progress(job.id, &progress)
            .await
            .map_err(|e| cancelled_if_gone(job.id, e))
    }

    /// Replace smart-auto rationales with provider text where it answers in time.
    async fn explain(&self, job: &Job, diagnosis: &Diagnosis, plan: &mut FixPlan) {
        let Some(provider) = &self.rationale else {
            return;
        };
        if job.aggressiveness != Aggressiveness::SmartAuto {
            return;
        }

        let timeout = self.settings.rationale_timeout;
        let requests = plan
            .decisions
            .iter()
            .filter(|d| matches!(d.outcome, PlanOutcome::Accepted | PlanOutcome::Skipped))
            .filter_map(|d| diagnosis.find(d.issue).map(|issue| (issue, d)))
            .map(|(issue, decision)| async move {
                let text = tokio::time::timeout(timeout, provider.explain(issue, decision)).await;
                (decision.issue, text)
            });

        let mut explained: HashMap<IssueKey, String> = HashMap::new();
        for (key, result) in join_all(requests).await {
            match result {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    explained.insert(key, text.trim().to_string());
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(issue = %key, error = %e, "Rationale provider failed, keeping default"),
                Err(_) => debug!(issue = %key, "Rationale provider timed out, keeping default"),
            }
        }

        for decision in &mut plan.decisions {
            if let Some(text) = explained.get(&decision.issue) {
                decision.rationale = text.clone();
            }
        }
        for invocation in &mut plan.invocations {
            if let Some(text) = invocation.issues.first().and_then(|k| explained.get(k)) {
                invocation.rationale = text.clone();
            }
        }
    }

    async fn with_render_timeout<T>(&self, call: impl Future<Output = DomainResult<T>>) -> DomainResult<T> {
        tokio::time::timeout(self.settings.render_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(DomainError::ProviderTimeout {
                    provider: "renderer".to_string(),
                    timeout: self.settings.render_timeout,
                })
            })
    }
}

fn cancelled_if_gone(job_id: uuid::Uuid, err: DomainError) -> DomainError {
    match err {
        DomainError::JobNotFound(_) => DomainError::Cancelled(job_id),
        other => other,
    }
}
