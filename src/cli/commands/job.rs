//! Job CLI commands.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use comfy_table::Cell;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapters::sqlite::SqliteJobRepository;
use crate::cli::id_resolver::resolve_job_id;
use crate::cli::open_database;
use crate::cli::output::{output, severity_cell, short_id, state_cell, table, truncate, CommandOutput};
use crate::domain::models::{
    Aggressiveness, Config, Diagnosis, Effort, Fix, Job, JobFilter, JobOptions, JobState, OrchestrationResult,
    TargetColorspace, TargetPageSize, VerificationResult,
};
use crate::services::{CancellationRegistry, JobService, JobStateMachine, SubmitRequest};

#[derive(Args, Debug)]
pub struct JobArgs {
    #[command(subcommand)]
    pub command: JobCommands,
}

#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// Submit a document (pdf, docx, xlsx, pptx)
    Submit {
        /// Document to fix
        file: PathBuf,
        /// Effort tier (quick, standard, thorough)
        #[arg(short, long, default_value = "standard", value_parser = parse_effort)]
        effort: Effort,
        /// Fix aggressiveness (conservative, moderate, aggressive, smart_auto)
        #[arg(short, long, default_value = "moderate", value_parser = parse_aggressiveness)]
        aggressiveness: Aggressiveness,
        /// Target page size (letter, a4, original)
        #[arg(long, default_value = "original", value_parser = parse_page_size)]
        page_size: TargetPageSize,
        /// Target colorspace (cmyk, rgb, original)
        #[arg(long, default_value = "original", value_parser = parse_colorspace)]
        colorspace: TargetColorspace,
        /// Stop after diagnosis and wait for `job refix`
        #[arg(long)]
        no_auto_fix: bool,
    },
    /// List jobs, newest first
    List {
        /// Filter by state
        #[arg(short, long, value_parser = parse_state)]
        state: Option<JobState>,
        /// Maximum number of jobs
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },
    /// Show job details
    Show {
        /// Job ID or unique prefix
        id: String,
    },
    /// Show the latest diagnosis
    Diagnosis {
        /// Job ID or unique prefix
        id: String,
        /// Show every diagnosis, oldest first
        #[arg(long)]
        all: bool,
    },
    /// Show every fix attempt
    Fixes {
        /// Job ID or unique prefix
        id: String,
    },
    /// Show the fix-loop outcome
    Orchestration {
        /// Job ID or unique prefix
        id: String,
    },
    /// Show confidence scores and the fix report
    Verification {
        /// Job ID or unique prefix
        id: String,
    },
    /// Accept a job held for review
    Approve {
        /// Job ID or unique prefix
        id: String,
    },
    /// Send a job held for review back through the fix loop
    Reject {
        /// Job ID or unique prefix
        id: String,
    },
    /// Diagnose a job again
    Rediagnose {
        /// Job ID or unique prefix
        id: String,
    },
    /// Start a fresh fix loop
    Refix {
        /// Job ID or unique prefix
        id: String,
    },
    /// Delete a job and its history
    Delete {
        /// Job ID or unique prefix
        id: String,
    },
}

fn parse_effort(s: &str) -> Result<Effort, String> {
    Effort::from_str(s).ok_or_else(|| format!("unknown effort '{s}'"))
}

fn parse_aggressiveness(s: &str) -> Result<Aggressiveness, String> {
    Aggressiveness::from_str(s).ok_or_else(|| format!("unknown aggressiveness '{s}'"))
}

fn parse_page_size(s: &str) -> Result<TargetPageSize, String> {
    TargetPageSize::from_str(s).ok_or_else(|| format!("unknown page size '{s}'"))
}

fn parse_colorspace(s: &str) -> Result<TargetColorspace, String> {
    TargetColorspace::from_str(s).ok_or_else(|| format!("unknown colorspace '{s}'"))
}

fn parse_state(s: &str) -> Result<JobState, String> {
    JobState::from_str(s).ok_or_else(|| format!("unknown state '{s}'"))
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Debug, serde::Serialize)]
pub struct JobListOutput {
    pub jobs: Vec<Job>,
    pub total: usize,
}

impl CommandOutput for JobListOutput {
    fn to_human(&self) -> String {
        if self.jobs.is_empty() {
            return "No jobs found.".to_string();
        }

        let mut t = table(&["ID", "FILE", "STATE", "EFFORT", "MODE", "ITER", "CONFIDENCE"]);
        for job in &self.jobs {
            t.add_row(vec![
                Cell::new(short_id(&job.id)),
                Cell::new(truncate(&job.source.original_filename, 32)),
                state_cell(job.state),
                Cell::new(job.effort.as_str()),
                Cell::new(job.aggressiveness.as_str()),
                Cell::new(job.iteration),
                Cell::new(job.confidence.map_or_else(|| "-".to_string(), |c| format!("{c:.1}"))),
            ]);
        }
        format!("{t}\n\nShowing {} job(s)", self.total)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct JobDetailOutput {
    pub job: Job,
}

impl CommandOutput for JobDetailOutput {
    fn to_human(&self) -> String {
        let job = &self.job;
        let mut lines = vec![
            format!("Job: {}", job.id),
            format!("File: {} ({} bytes)", job.source.original_filename, job.source.size_bytes),
            format!("State: {}", job.state),
            format!("Effort: {}  Aggressiveness: {}", job.effort, job.aggressiveness),
            format!(
                "Targets: page size {}, colorspace {}, auto fix {}",
                job.options.target_page_size.as_str(),
                job.options.target_colorspace.as_str(),
                job.options.auto_fix
            ),
        ];
        if let Some(format) = job.format {
            lines.push(format!("Format: {format}"));
        }
        if let Some(pages) = job.page_count {
            lines.push(format!("Pages: {pages}"));
        }
        lines.push(format!(
            "Iteration: {}  Issues found: {}  Fixes applied: {}  Fixes failed: {}",
            job.iteration, job.issues_found, job.fixes_applied, job.fixes_failed
        ));
        if let Some(confidence) = job.confidence {
            lines.push(format!(
                "Confidence: {confidence:.1} (auto-approve at {:.1})",
                job.gating.auto_approve_threshold
            ));
        }
        if let Some(error) = &job.error {
            lines.push(format!("Error: {error}"));
        }
        lines.push(format!("Created at: {}", job.created_at.format(TIME_FORMAT)));
        lines.push(format!("Updated at: {}", job.updated_at.format(TIME_FORMAT)));
        if let Some(completed) = job.completed_at {
            lines.push(format!("Completed at: {}", completed.format(TIME_FORMAT)));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.job).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct DiagnosisOutput {
    pub diagnoses: Vec<Diagnosis>,
}

impl CommandOutput for DiagnosisOutput {
    fn to_human(&self) -> String {
        if self.diagnoses.is_empty() {
            return "No diagnosis recorded yet.".to_string();
        }

        let mut sections = Vec::new();
        for diagnosis in &self.diagnoses {
            let s = &diagnosis.summary;
            let mut lines = vec![format!(
                "Diagnosis ({}, iteration {}{}): {} critical, {} warning, {} info",
                diagnosis.phase.as_str(),
                diagnosis.iteration,
                if diagnosis.cached { ", cached" } else { "" },
                s.critical,
                s.warning,
                s.info
            )];
            for degraded in &diagnosis.degraded {
                lines.push(format!("  degraded {:?} pass: {}", degraded.pass, degraded.reason));
            }
            if !diagnosis.issues.is_empty() {
                let mut t = table(&["TYPE", "SEVERITY", "SOURCE", "PAGE", "DESCRIPTION"]);
                for issue in &diagnosis.issues {
                    t.add_row(vec![
                        Cell::new(issue.issue_type.as_str()),
                        severity_cell(issue.severity),
                        Cell::new(issue.source.as_str()),
                        Cell::new(issue.page.map_or_else(|| "-".to_string(), |p| p.to_string())),
                        Cell::new(truncate(&issue.description, 60)),
                    ]);
                }
                lines.push(t.to_string());
            }
            sections.push(lines.join("\n"));
        }
        sections.join("\n\n")
    }

    fn to_json(&self) -> serde_json::Value {
        match self.diagnoses.as_slice() {
            [only] => serde_json::to_value(only).unwrap_or_default(),
            all => serde_json::to_value(all).unwrap_or_default(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct FixesOutput {
    pub fixes: Vec<Fix>,
}

impl CommandOutput for FixesOutput {
    fn to_human(&self) -> String {
        if self.fixes.is_empty() {
            return "No fixes attempted.".to_string();
        }

        let mut t = table(&["ITER", "TOOL", "FORMAT", "ISSUES", "RESULT", "RATIONALE"]);
        for fix in &self.fixes {
            let result = match (&fix.error, fix.success) {
                (_, true) => "ok".to_string(),
                (Some(error), false) => format!("failed: {}", truncate(error, 30)),
                (None, false) => "failed".to_string(),
            };
            let tool = if fix.fallback {
                format!("{} (fallback)", fix.tool)
            } else {
                fix.tool.clone()
            };
            t.add_row(vec![
                Cell::new(fix.iteration),
                Cell::new(tool),
                Cell::new(fix.target_format.as_str()),
                Cell::new(fix.issues.len()),
                Cell::new(result),
                Cell::new(truncate(&fix.rationale, 50)),
            ]);
        }
        t.to_string()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.fixes).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct OrchestrationOutput {
    pub orchestration: Option<OrchestrationResult>,
}

impl CommandOutput for OrchestrationOutput {
    fn to_human(&self) -> String {
        let Some(result) = &self.orchestration else {
            return "Fix loop has not finished yet.".to_string();
        };

        let mut lines = vec![
            format!("Stop reason: {}", result.stop_reason),
            format!("Iterations: {} of {}", result.iterations, result.max_iterations),
            format!(
                "Blocking issues: {} -> {}",
                result.initial_blocking, result.final_blocking
            ),
            format!(
                "Fixes this run: {} applied, {} failed",
                result.fixes_applied(),
                result.fixes.len() - result.fixes_applied()
            ),
        ];
        if result.fallback_triggered() {
            lines.push("\nFallbacks:".to_string());
            for fallback in &result.fallbacks {
                lines.push(format!(
                    "  - {} via {} (iteration {}, {:?}, {})",
                    fallback.issue,
                    fallback.tool,
                    fallback.iteration,
                    fallback.reason,
                    if fallback.success { "ok" } else { "failed" }
                ));
            }
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.orchestration).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct VerificationOutput {
    pub verification: Option<VerificationResult>,
}

impl CommandOutput for VerificationOutput {
    fn to_human(&self) -> String {
        let Some(result) = &self.verification else {
            return "Job has not been verified yet.".to_string();
        };

        let mut lines = vec![
            format!(
                "Overall confidence: {:.1} ({}), threshold {:.1}",
                result.overall,
                result.readiness.as_str(),
                result.threshold_used
            ),
            format!("Routed to: {}", result.routing.target_state()),
        ];

        if !result.pages.is_empty() {
            let mut t = table(&["PAGE", "SCORE", "REMAINING"]);
            for page in &result.pages {
                t.add_row(vec![
                    Cell::new(page.page),
                    Cell::new(format!("{:.1}", page.score)),
                    Cell::new(page.remaining_issues),
                ]);
            }
            lines.push(t.to_string());
        }

        let report = &result.report;
        lines.push(format!("\n{}", report.summary));
        if !report.entries.is_empty() {
            let mut t = table(&["ISSUE", "BEFORE", "AFTER", "ACTION", "TOOLS"]);
            for entry in &report.entries {
                t.add_row(vec![
                    Cell::new(entry.issue.to_string()),
                    severity_cell(entry.severity_before),
                    entry.severity_after.map_or_else(|| Cell::new("-"), severity_cell),
                    Cell::new(entry.action.as_str()),
                    Cell::new(entry.tools.join(", ")),
                ]);
            }
            lines.push(t.to_string());
        }
        if !report.introduced.is_empty() {
            lines.push("Introduced by fixes:".to_string());
            for key in &report.introduced {
                lines.push(format!("  - {key}"));
            }
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.verification).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct JobActionOutput {
    pub success: bool,
    pub message: String,
    pub job_id: String,
    pub state: Option<JobState>,
}

impl CommandOutput for JobActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn action(job: &Job, verb: &str) -> JobActionOutput {
    JobActionOutput {
        success: true,
        message: format!("Job {} {verb}; now {}", short_id(&job.id), job.state),
        job_id: job.id.to_string(),
        state: Some(job.state),
    }
}

pub async fn execute(args: JobArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = open_database(config).await?;
    let repo = Arc::new(SqliteJobRepository::new(pool.clone()));
    let machine = JobStateMachine::new(repo, CancellationRegistry::new());
    let service = JobService::new(machine, config.ingestion.clone(), config.gating);

    match args.command {
        JobCommands::Submit {
            file,
            effort,
            aggressiveness,
            page_size,
            colorspace,
            no_auto_fix,
        } => {
            let options = JobOptions {
                target_page_size: page_size,
                target_colorspace: colorspace,
                auto_fix: !no_auto_fix,
            };
            let request = SubmitRequest::new(&file)
                .with_effort(effort)
                .with_aggressiveness(aggressiveness)
                .with_options(options);
            let job = service
                .submit(request)
                .await
                .with_context(|| format!("Failed to submit {}", file.display()))?;
            output(&JobDetailOutput { job }, json_mode);
        }
        JobCommands::List { state, limit } => {
            let jobs = service
                .list(JobFilter {
                    state,
                    limit: Some(limit),
                })
                .await
                .context("Failed to list jobs")?;
            let total = jobs.len();
            output(&JobListOutput { jobs, total }, json_mode);
        }
        JobCommands::Show { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let job = service.get(id).await?;
            output(&JobDetailOutput { job }, json_mode);
        }
        JobCommands::Diagnosis { id, all } => {
            let id = resolve_job_id(&pool, &id).await?;
            let diagnoses = if all {
                service.diagnoses(id).await?
            } else {
                service.diagnosis(id).await?.into_iter().collect()
            };
            output(&DiagnosisOutput { diagnoses }, json_mode);
        }
        JobCommands::Fixes { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let fixes = service.fixes(id).await?;
            output(&FixesOutput { fixes }, json_mode);
        }
        JobCommands::Orchestration { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let orchestration = service.orchestration(id).await?;
            output(&OrchestrationOutput { orchestration }, json_mode);
        }
        JobCommands::Verification { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let verification = service.verification(id).await?;
            output(&VerificationOutput { verification }, json_mode);
        }
        JobCommands::Approve { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let job = service.approve(id).await?;
            output(&action(&job, "approved"), json_mode);
        }
        JobCommands::Reject { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let job = service.reject(id).await?;
            output(&action(&job, "rejected"), json_mode);
        }
        JobCommands::Rediagnose { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let job = service.rediagnose(id).await?;
            output(&action(&job, "queued for diagnosis"), json_mode);
        }
        JobCommands::Refix { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            let job = service.refix(id).await?;
            output(&action(&job, "queued for fixing"), json_mode);
        }
        JobCommands::Delete { id } => {
            let id = resolve_job_id(&pool, &id).await?;
            if !service.delete(id).await? {
                return Err(anyhow!("Job {id} not found"));
            }
            let result = JobActionOutput {
                success: true,
                message: format!("Job {} deleted", short_id(&id)),
                job_id: id.to_string(),
                state: None,
            };
            output(&result, json_mode);
        }
    }

    Ok(())
}
