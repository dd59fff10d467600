//! Confidence scoring and the `verifying → done | needs_review` gate.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::info;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Diagnosis, DiagnosisPhase, Fix, GatingPolicy, Job, JobState, PageConfidence, PrintReadiness, RenderSet, Routing,
    StateUpdate, VerificationResult,
};
use crate::domain::ports::JobRepository;
use crate::services::fix_report;
use crate::services::state_machine::JobStateMachine;

/// Score every page of the final render.
///
/// A page starts at 100 and loses the configured weight for each remaining
/// issue on it; document-level issues count against every page. Pages named
/// by issues but missing from the render are scored too.
pub fn score_pages(diagnosis: &Diagnosis, before: &RenderSet, after: &RenderSet, policy: &GatingPolicy) -> Vec<PageConfidence> {
    let mut pages: BTreeSet<u32> = after.pages.iter().map(|p| p.page).collect();
    pages.extend(diagnosis.issues.iter().filter_map(|i| i.page));
    if pages.is_empty() {
        pages.insert(1);
    }

    pages
        .into_iter()
        .map(|page| {
            let remaining: Vec<_> = diagnosis
                .issues
                .iter()
                .filter(|i| i.page.is_none_or(|p| p == page))
                .collect();
            let penalty: f64 = remaining.iter().map(|i| policy.weights.weight(i.severity)).sum();

            PageConfidence {
                page,
                score: (100.0 - penalty).clamp(0.0, 100.0),
                remaining_issues: u32::try_from(remaining.len()).unwrap_or(u32::MAX),
                before_image: before.page(page).map(|p| p.uri.clone()),
                after_image: after.page(page).map(|p| p.uri.clone()),
            }
        })
        .collect()
}

/// Lowest page score. One broken page is enough to hold a job back.
pub fn overall_score(pages: &[PageConfidence]) -> f64 {
    pages.iter().map(|p| p.score).fold(100.0, f64::min)
}

/// Pure verification of a finished fix loop.
///
/// A final diagnosis that neither pass produced is never auto-approved.
pub fn verify(
    initial: &Diagnosis,
    last: &Diagnosis,
    fixes: &[Fix],
    before: &RenderSet,
    after: &RenderSet,
    policy: &GatingPolicy,
) -> VerificationResult {
    let pages = score_pages(last, before, after, policy);
    let overall = overall_score(&pages);
    let routing = if last.is_uninspected() {
        Routing::NeedsReview
    } else {
        policy.route(overall)
    };

    VerificationResult {
        final_diagnosis: last.clone(),
        pages,
        overall,
        routing,
        readiness: PrintReadiness::from_score(overall),
        threshold_used: policy.auto_approve_threshold,
        weights_used: policy.weights,
        report: fix_report::build(initial, last, fixes),
        verified_at: Utc::now(),
    }
}

/// Verifies jobs in `verifying` and routes them.
pub struct Verifier<R: JobRepository> {
    machine: JobStateMachine<R>,
}

impl<R: JobRepository> Verifier<R> {
    pub fn new(machine: JobStateMachine<R>) -> Self {
        Self { machine }
    }

    /// Score the job's latest diagnosis with the gating policy recorded on
    /// the job and move it to `done` or `needs_review`.
    pub async fn run(&self, job: &Job) -> DomainResult<Job> {
        let repo = self.machine.repository();
        let history = repo.list_diagnoses(job.id).await?;
        let last = history
            .last()
            .ok_or_else(|| DomainError::Validation(format!("job {} has no diagnosis to verify", job.id)))?;
        let initial = history
            .iter()
            .rev()
            .find(|d| d.phase == DiagnosisPhase::Initial)
            .unwrap_or(last);
        let fixes = repo.list_fixes(job.id).await?;

        let result = verify(
            initial,
            last,
            &fixes,
            &job.documents.initial_render,
            &job.documents.current_render,
            &job.gating,
        );
        repo.record_verification(job.id, &result).await.map_err(|e| match e {
            DomainError::JobNotFound(id) => DomainError::Cancelled(id),
            other => other,
        })?;

        info!(
            job_id = %job.id,
            overall = result.overall,
            threshold = result.threshold_used,
            readiness = result.readiness.as_str(),
            "Job verified"
        );
        self.machine
            .advance(job.id, JobState::Verifying, result.routing.target_state(), StateUpdate::default())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        DegradedPass, DiagnosisPass, Issue, IssueSource, IssueType, PageImage, Severity, SeverityWeights,
    };

    fn render(pages: u32, tag: &str) -> RenderSet {
        RenderSet {
            pages: (1..=pages)
                .map(|page| PageImage { page, uri: format!("{tag}-{page}.png") })
                .collect(),
        }
    }

    fn issue(severity: Severity, page: Option<u32>) -> Issue {
        let mut issue = Issue::new(IssueType::ClippedContent, severity, IssueSource::Visual, "x");
        issue.page = page;
        issue
    }

    #[test]
    fn test_clean_diagnosis_scores_full() {
        let clean = Diagnosis::new(vec![], vec![]);
        let result = verify(&clean, &clean, &[], &render(3, "a"), &render(3, "b"), &GatingPolicy::default());
        assert_eq!(result.overall, 100.0);
        assert_eq!(result.routing, Routing::AutoApprove);
        assert_eq!(result.readiness, PrintReadiness::PrintReady);
        assert_eq!(result.pages.len(), 3);
        assert_eq!(result.pages[1].before_image.as_deref(), Some("a-2.png"));
        assert_eq!(result.pages[1].after_image.as_deref(), Some("b-2.png"));
    }

    #[test]
    fn test_overall_is_worst_page() {
        let diagnosis = Diagnosis::new(
            vec![issue(Severity::Critical, Some(2)), issue(Severity::Info, Some(1))],
            vec![],
        );
        let pages = score_pages(&diagnosis, &render(3, "a"), &render(3, "b"), &GatingPolicy::default());
        let scores: Vec<f64> = pages.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![98.0, 70.0, 100.0]);
        assert_eq!(overall_score(&pages), 70.0);
    }

    #[test]
    fn test_document_level_issue_counts_everywhere() {
        let diagnosis = Diagnosis::new(vec![issue(Severity::Warning, None)], vec![]);
        let pages = score_pages(&diagnosis, &render(2, "a"), &render(2, "b"), &GatingPolicy::default());
        assert!(pages.iter().all(|p| p.score == 90.0 && p.remaining_issues == 1));
    }

    #[test]
    fn test_gating_at_threshold() {
        // one critical (30) + a 5-point info weight = 65
        let policy = GatingPolicy {
            auto_approve_threshold: 70.0,
            weights: SeverityWeights { critical: 30.0, warning: 10.0, info: 5.0 },
        };
        let below = Diagnosis::new(
            vec![issue(Severity::Critical, Some(1)), issue(Severity::Info, Some(1))],
            vec![],
        );
        let result = verify(&below, &below, &[], &render(1, "a"), &render(1, "b"), &policy);
        assert_eq!(result.overall, 65.0);
        assert_eq!(result.routing, Routing::NeedsReview);
        assert_eq!(result.routing.target_state(), JobState::NeedsReview);

        let at = Diagnosis::new(vec![issue(Severity::Critical, Some(1))], vec![]);
        let result = verify(&at, &at, &[], &render(1, "a"), &render(1, "b"), &policy);
        assert_eq!(result.overall, 70.0);
        assert_eq!(result.routing.target_state(), JobState::Done);
        assert_eq!(result.threshold_used, 70.0);
    }

    fn degraded(pass: DiagnosisPass) -> DegradedPass {
        DegradedPass {
            pass,
            reason: "provider unavailable".into(),
        }
    }

    #[test]
    fn test_uninspected_final_diagnosis_needs_review() {
        let initial = Diagnosis::new(vec![issue(Severity::Warning, Some(1))], vec![]);
        let blind = Diagnosis::new(
            vec![],
            vec![degraded(DiagnosisPass::Visual), degraded(DiagnosisPass::Structural)],
        );

        let result = verify(&initial, &blind, &[], &render(1, "a"), &render(1, "b"), &GatingPolicy::default());
        assert_eq!(result.overall, 100.0);
        assert_eq!(result.routing, Routing::NeedsReview);
        assert_eq!(result.routing.target_state(), JobState::NeedsReview);
    }

    #[test]
    fn test_one_degraded_pass_still_gates_on_score() {
        let partial = Diagnosis::new(vec![], vec![degraded(DiagnosisPass::Visual)]);
        let result = verify(&partial, &partial, &[], &render(1, "a"), &render(1, "b"), &GatingPolicy::default());
        assert_eq!(result.routing, Routing::AutoApprove);
    }

    #[test]
    fn test_score_never_negative() {
        let diagnosis = Diagnosis::new((0..5).map(|_| issue(Severity::Critical, None)).collect(), vec![]);
        let pages = score_pages(&diagnosis, &RenderSet::default(), &RenderSet::default(), &GatingPolicy::default());
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].score, 0.0);
    }
}
