//! Reconciles the visual and structural passes into one ranked diagnosis.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::domain::errors::DomainError;
use crate::domain::models::{DegradedPass, Diagnosis, DiagnosisPass, Issue, IssueKey, IssueSource};

/// Result of one diagnosis pass. A failed pass contributes no issues.
#[derive(Debug)]
pub enum PassOutcome {
    Completed(Vec<Issue>),
    Failed(String),
}

impl PassOutcome {
    pub fn from_result(result: Result<Vec<Issue>, DomainError>) -> Self {
        match result {
            Ok(issues) => Self::Completed(issues),
            Err(err) => Self::Failed(err.to_string()),
        }
    }
}

/// Merge both passes into a [`Diagnosis`].
///
/// Issues are grouped by `(type, page)`; each group keeps its most severe
/// issue, with the structural description winning a severity tie.
/// Document-level issues never merge with page-scoped ones. Output is
/// ordered critical → warning → info, then by ascending page with
/// document-level issues last.
pub fn merge(visual: PassOutcome, structural: PassOutcome) -> Diagnosis {
    let mut degraded = Vec::new();
    let mut combined = Vec::new();

    for (pass, outcome) in [(DiagnosisPass::Visual, visual), (DiagnosisPass::Structural, structural)] {
        match outcome {
            PassOutcome::Completed(issues) => combined.extend(issues),
            PassOutcome::Failed(reason) => degraded.push(DegradedPass { pass, reason }),
        }
    }

    Diagnosis::new(merge_issues(combined), degraded)
}

/// Deduplicate and order a flat issue list.
pub fn merge_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut order: Vec<IssueKey> = Vec::new();
    let mut best: HashMap<IssueKey, Issue> = HashMap::new();

    for issue in issues {
        let key = issue.key();
        match best.get_mut(&key) {
            None => {
                order.push(key);
                best.insert(key, issue);
            }
            Some(kept) => {
                if outranks(&issue, kept) {
                    let fallback_fix = kept.suggested_fix.take();
                    *kept = issue;
                    if kept.suggested_fix.is_none() {
                        kept.suggested_fix = fallback_fix;
                    }
                } else if kept.suggested_fix.is_none() {
                    kept.suggested_fix = issue.suggested_fix;
                }
            }
        }
    }

    let mut merged: Vec<Issue> = order.into_iter().filter_map(|key| best.remove(&key)).collect();
    // Stable sort keeps first-seen order inside a (severity, page) tier.
    merged.sort_by_key(|issue| (Reverse(issue.severity), issue.page.is_none(), issue.page));
    merged
}

fn outranks(candidate: &Issue, kept: &Issue) -> bool {
    candidate.severity > kept.severity
        || (candidate.severity == kept.severity
            && candidate.source == IssueSource::Structural
            && kept.source == IssueSource::Visual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{IssueType, Severity};
    use proptest::prelude::*;

    fn visual(issue_type: IssueType, severity: Severity) -> Issue {
        Issue::new(issue_type, severity, IssueSource::Visual, "seen on the render")
    }

    fn structural(issue_type: IssueType, severity: Severity) -> Issue {
        Issue::new(issue_type, severity, IssueSource::Structural, "found in the file")
    }

    #[test]
    fn test_clipped_content_dedup_keeps_critical() {
        let diagnosis = merge(
            PassOutcome::Completed(vec![visual(IssueType::ClippedContent, Severity::Warning).on_page(3)]),
            PassOutcome::Completed(vec![structural(IssueType::ClippedContent, Severity::Critical).on_page(3)]),
        );

        assert_eq!(diagnosis.issues.len(), 1);
        assert_eq!(diagnosis.issues[0].severity, Severity::Critical);
        assert_eq!(diagnosis.issues[0].page, Some(3));
        assert!(!diagnosis.is_clean());
    }

    #[test]
    fn test_tie_prefers_structural_description() {
        let merged = merge_issues(vec![
            visual(IssueType::SmallFont, Severity::Warning).on_page(1),
            structural(IssueType::SmallFont, Severity::Warning).on_page(1),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, IssueSource::Structural);
        assert_eq!(merged[0].description, "found in the file");
    }

    #[test]
    fn test_document_level_not_merged_with_page_scoped() {
        let merged = merge_issues(vec![
            structural(IssueType::NonEmbeddedFont, Severity::Warning),
            visual(IssueType::NonEmbeddedFont, Severity::Warning).on_page(2),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].page, Some(2));
        assert_eq!(merged[1].page, None);
    }

    #[test]
    fn test_ordering() {
        let merged = merge_issues(vec![
            visual(IssueType::SmallFont, Severity::Info).on_page(1),
            structural(IssueType::NonEmbeddedFont, Severity::Critical),
            visual(IssueType::MarginViolation, Severity::Warning).on_page(5),
            visual(IssueType::ClippedContent, Severity::Critical).on_page(4),
            visual(IssueType::BlankPage, Severity::Warning).on_page(2),
        ]);
        let order: Vec<(Severity, Option<u32>)> = merged.iter().map(|i| (i.severity, i.page)).collect();
        assert_eq!(
            order,
            vec![
                (Severity::Critical, Some(4)),
                (Severity::Critical, None),
                (Severity::Warning, Some(2)),
                (Severity::Warning, Some(5)),
                (Severity::Info, Some(1)),
            ]
        );
    }

    #[test]
    fn test_suggestion_survives_from_losing_issue() {
        let merged = merge_issues(vec![
            visual(IssueType::TableOverflow, Severity::Warning).on_page(2).suggesting("resize_table_text"),
            structural(IssueType::TableOverflow, Severity::Critical).on_page(2),
        ]);
        assert_eq!(merged[0].severity, Severity::Critical);
        assert_eq!(merged[0].suggested_fix.as_deref(), Some("resize_table_text"));
    }

    #[test]
    fn test_failed_pass_is_degraded_not_fatal() {
        let diagnosis = merge(
            PassOutcome::Failed("provider timed out".into()),
            PassOutcome::Completed(vec![structural(IssueType::BlankPage, Severity::Warning).on_page(7)]),
        );
        assert_eq!(diagnosis.issues.len(), 1);
        assert!(diagnosis.is_degraded());
        assert_eq!(diagnosis.degraded[0].pass, DiagnosisPass::Visual);
    }

    #[test]
    fn test_both_passes_failed_yields_empty_degraded_diagnosis() {
        let diagnosis = merge(PassOutcome::Failed("a".into()), PassOutcome::Failed("b".into()));
        assert!(diagnosis.issues.is_empty());
        assert_eq!(diagnosis.degraded.len(), 2);
    }

    fn arb_issue() -> impl Strategy<Value = Issue> {
        (
            prop::sample::select(IssueType::ALL.to_vec()),
            prop::sample::select(vec![Severity::Info, Severity::Warning, Severity::Critical]),
            prop::bool::ANY,
            prop::option::of(1u32..8),
        )
            .prop_map(|(issue_type, severity, is_structural, page)| {
                let source = if is_structural { IssueSource::Structural } else { IssueSource::Visual };
                let mut issue = Issue::new(issue_type, severity, source, "generated");
                issue.page = page;
                issue
            })
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent(issues in prop::collection::vec(arb_issue(), 0..40)) {
            let once = merge(PassOutcome::Completed(issues), PassOutcome::Completed(vec![]));
            let twice = merge(PassOutcome::Completed(once.issues.clone()), PassOutcome::Completed(vec![]));
            prop_assert_eq!(once.issues, twice.issues);
        }

        #[test]
        fn prop_merged_keys_are_unique(issues in prop::collection::vec(arb_issue(), 0..40)) {
            let merged = merge_issues(issues);
            let mut keys: Vec<IssueKey> = merged.iter().map(Issue::key).collect();
            let before = keys.len();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(before, keys.len());
        }

        #[test]
        fn prop_merged_is_ranked(issues in prop::collection::vec(arb_issue(), 0..40)) {
            let merged = merge_issues(issues);
            for pair in merged.windows(2) {
                let a = (Reverse(pair[0].severity), pair[0].page.is_none(), pair[0].page);
                let b = (Reverse(pair[1].severity), pair[1].page.is_none(), pair[1].page);
                prop_assert!(a <= b);
            }
        }
    }
}
