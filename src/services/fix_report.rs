//! Before/after account of what happened to each initially reported issue.

use std::collections::BTreeSet;

use crate::domain::models::{Diagnosis, Fix, FixAction, FixReport, FixReportEntry, IssueKey};

/// Compare the first and last diagnosis of a job against its fix history.
pub fn build(initial: &Diagnosis, last: &Diagnosis, fixes: &[Fix]) -> FixReport {
    let entries: Vec<FixReportEntry> = initial
        .issues
        .iter()
        .map(|issue| {
            let key = issue.key();
            let attempts: Vec<&Fix> = fixes.iter().filter(|f| f.issues.contains(&key)).collect();
            let tools: BTreeSet<&str> = attempts.iter().map(|f| f.tool.as_str()).collect();
            let severity_after = last.find(key).map(|i| i.severity);

            let action = match severity_after {
                None => FixAction::Fixed,
                Some(_) if attempts.is_empty() => FixAction::Skipped,
                Some(_) if attempts.iter().any(|f| f.success) => FixAction::Remaining,
                Some(_) => FixAction::Failed,
            };

            FixReportEntry {
                issue: key,
                severity_before: issue.severity,
                severity_after,
                action,
                tools: tools.into_iter().map(str::to_string).collect(),
            }
        })
        .collect();

    let introduced: Vec<IssueKey> = last
        .issues
        .iter()
        .map(|i| i.key())
        .filter(|key| initial.find(*key).is_none())
        .collect();

    let summary = summarize(&entries, &introduced, fixes);
    FixReport {
        entries,
        introduced,
        summary,
    }
}

fn summarize(entries: &[FixReportEntry], introduced: &[IssueKey], fixes: &[Fix]) -> String {
    if entries.is_empty() && introduced.is_empty() {
        return "No issues were found; the document was already print-ready.".to_string();
    }

    let count = |action: FixAction| entries.iter().filter(|e| e.action == action).count();
    let applied = fixes.iter().filter(|f| f.success).count();
    let fallback = fixes.iter().filter(|f| f.fallback && f.success).count();

    let mut summary = format!(
        "{} issue(s) found initially. {} fixed and {} still present after a fix was applied; \
         {} could not be fixed because every attempted tool failed, and {} were left untouched by policy.",
        entries.len(),
        count(FixAction::Fixed),
        count(FixAction::Remaining),
        count(FixAction::Failed),
        count(FixAction::Skipped),
    );
    summary.push_str(&format!(" {applied} tool invocation(s) succeeded"));
    if fallback > 0 {
        summary.push_str(&format!(", {fallback} of them on the PDF fallback"));
    }
    summary.push('.');
    if !introduced.is_empty() {
        summary.push_str(&format!(" {} new issue(s) appeared during fixing.", introduced.len()));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DocumentFormat, Issue, IssueSource, IssueType, Severity, ToolInvocation, ToolParams};
    use uuid::Uuid;

    fn issue(issue_type: IssueType, page: u32) -> Issue {
        Issue::new(issue_type, Severity::Warning, IssueSource::Structural, "x").on_page(page)
    }

    fn fix(tool: &str, keys: Vec<IssueKey>, success: bool) -> Fix {
        let invocation = ToolInvocation {
            tool: tool.to_string(),
            target_format: DocumentFormat::Docx,
            params: ToolParams::new(),
            issues: keys,
            fallback: false,
            rationale: "r".into(),
        };
        Fix::record(Uuid::new_v4(), 0, &invocation, success, None)
    }

    #[test]
    fn test_actions() {
        let margin = issue(IssueType::MarginViolation, 1);
        let font = issue(IssueType::SmallFont, 2);
        let table = issue(IssueType::TableOverflow, 3);
        let blank = issue(IssueType::BlankPage, 4);
        let initial = Diagnosis::new(vec![margin.clone(), font.clone(), table.clone(), blank.clone()], vec![]);
        let last = Diagnosis::new(
            vec![font.clone(), table.clone(), blank.clone(), issue(IssueType::OrphanWidow, 2)],
            vec![],
        );
        let fixes = vec![
            fix("set_margins", vec![margin.key()], true),
            fix("adjust_font_size", vec![font.key()], true),
            fix("auto_fit_tables", vec![table.key()], false),
        ];

        let report = build(&initial, &last, &fixes);
        let actions: Vec<FixAction> = report.entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![FixAction::Fixed, FixAction::Remaining, FixAction::Failed, FixAction::Skipped]
        );
        assert_eq!(report.entries[0].tools, vec!["set_margins".to_string()]);
        assert_eq!(report.introduced.len(), 1);
        assert!(report.summary.contains("4 issue(s) found"));
        assert!(report.summary.contains("1 new issue(s)"));
    }

    #[test]
    fn test_clean_document_summary() {
        let clean = Diagnosis::new(vec![], vec![]);
        let report = build(&clean, &clean, &[]);
        assert!(report.entries.is_empty());
        assert!(report.summary.contains("already print-ready"));
    }
}
