//! Turns a diagnosis into an ordered list of tool invocations.
//!
//! Pure and deterministic: the same diagnosis, policy and context always
//! produce the same plan, including every rationale string.

use std::collections::HashSet;

use crate::domain::models::{
    Aggressiveness, Diagnosis, DocumentFormat, FixImpact, FixPlan, Issue, IssueKey, PlanDecision, PlanOutcome,
    Severity, ToolInvocation,
};
use crate::services::tool_registry::{ParamContext, ToolRegistry};

/// Everything besides the diagnosis the planner needs.
#[derive(Debug, Clone)]
pub struct PlanningContext {
    /// Format the plan targets
    pub format: DocumentFormat,
    pub aggressiveness: Aggressiveness,
    pub params: ParamContext,
    /// Smart-auto skips issues below this severity
    pub severity_floor: Severity,
    /// `(issue, tool)` pairs that already failed twice
    pub exhausted: HashSet<(IssueKey, String)>,
}

impl PlanningContext {
    pub fn new(format: DocumentFormat, aggressiveness: Aggressiveness) -> Self {
        Self {
            format,
            aggressiveness,
            params: ParamContext::default(),
            severity_floor: Severity::Warning,
            exhausted: HashSet::new(),
        }
    }

    pub fn is_exhausted(&self, issue: IssueKey, tool: &str) -> bool {
        self.exhausted.contains(&(issue, tool.to_string()))
    }
}

/// Policy verdict for one issue before any tool lookup.
struct Verdict {
    accept: bool,
    rationale: String,
}

fn policy(issue: &Issue, ctx: &PlanningContext) -> Verdict {
    let impact = issue.issue_type.impact();
    let kind = match impact {
        FixImpact::Structural => "layout-only",
        FixImpact::ContentAffecting => "content-affecting",
    };

    let (accept, rationale) = match ctx.aggressiveness {
        Aggressiveness::Conservative => match impact {
            FixImpact::Structural => (true, format!("conservative: {} is a {kind} fix", issue.issue_type)),
            FixImpact::ContentAffecting => (
                false,
                format!("conservative: {} would change content, left for review", issue.issue_type),
            ),
        },
        Aggressiveness::Moderate => match (impact, issue.severity) {
            (FixImpact::Structural, _) => (true, format!("moderate: {} is a {kind} fix", issue.issue_type)),
            (FixImpact::ContentAffecting, Severity::Critical) => (
                true,
                format!("moderate: {} is critical, content change accepted", issue.issue_type),
            ),
            (FixImpact::ContentAffecting, severity) => (
                false,
                format!("moderate: {} is {severity}, content changes need critical severity", issue.issue_type),
            ),
        },
        Aggressiveness::Aggressive => (true, format!("aggressive: fixing {kind} issue {}", issue.issue_type)),
        Aggressiveness::SmartAuto => {
            if issue.severity < ctx.severity_floor {
                (
                    false,
                    format!(
                        "smart_auto: {} severity {} is below the {} floor",
                        issue.issue_type, issue.severity, ctx.severity_floor
                    ),
                )
            } else {
                match impact {
                    FixImpact::Structural => (
                        true,
                        format!("smart_auto: {} is structural, safe to fix automatically", issue.issue_type),
                    ),
                    FixImpact::ContentAffecting => (
                        false,
                        format!("smart_auto: {} is content-affecting, left for review", issue.issue_type),
                    ),
                }
            }
        }
    };

    Verdict { accept, rationale }
}

/// Plan fixes for `diagnosis`.
pub fn plan(diagnosis: &Diagnosis, registry: &ToolRegistry, ctx: &PlanningContext) -> FixPlan {
    let mut fix_plan = FixPlan::default();

    for issue in &diagnosis.issues {
        let key = issue.key();
        let verdict = policy(issue, ctx);

        if !verdict.accept {
            fix_plan.decisions.push(PlanDecision {
                issue: key,
                outcome: PlanOutcome::Skipped,
                tool: None,
                rationale: verdict.rationale,
            });
            continue;
        }

        let Some(choice) = registry.choose(issue, ctx.format) else {
            fix_plan.decisions.push(PlanDecision {
                issue: key,
                outcome: PlanOutcome::UnfixableInCurrentFormat,
                tool: None,
                rationale: format!("{}; no {} tool addresses it", verdict.rationale, ctx.format),
            });
            continue;
        };

        if ctx.is_exhausted(key, choice.spec.name) {
            fix_plan.decisions.push(PlanDecision {
                issue: key,
                outcome: PlanOutcome::Exhausted,
                tool: Some(choice.spec.name.to_string()),
                rationale: format!("{} already failed twice for {key}", choice.spec.name),
            });
            continue;
        }

        let params = match registry.resolve_params(&choice, issue, &ctx.params) {
            Ok(params) => params,
            Err(reason) => {
                fix_plan.decisions.push(PlanDecision {
                    issue: key,
                    outcome: PlanOutcome::UnfixableInCurrentFormat,
                    tool: Some(choice.spec.name.to_string()),
                    rationale: format!("{}; {reason}", verdict.rationale),
                });
                continue;
            }
        };

        let rationale = if choice.suggested {
            format!("{}; using suggested {}", verdict.rationale, choice.spec.name)
        } else {
            format!("{}; routed to {}", verdict.rationale, choice.spec.name)
        };

        // Same tool with the same parameters fixes every issue it addresses at once.
        let shared = fix_plan
            .invocations
            .iter_mut()
            .find(|inv| inv.tool == choice.spec.name && inv.params == params);
        match shared {
            Some(invocation) => invocation.issues.push(key),
            None => fix_plan.invocations.push(ToolInvocation {
                tool: choice.spec.name.to_string(),
                target_format: ctx.format,
                params,
                issues: vec![key],
                fallback: false,
                rationale: rationale.clone(),
            }),
        }

        fix_plan.decisions.push(PlanDecision {
            issue: key,
            outcome: PlanOutcome::Accepted,
            tool: Some(choice.spec.name.to_string()),
            rationale,
        });
    }

    fix_plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{IssueSource, IssueType};

    fn registry() -> ToolRegistry {
        ToolRegistry::builtin().unwrap()
    }

    fn diagnosis(issues: Vec<Issue>) -> Diagnosis {
        Diagnosis::new(crate::services::diagnosis_merger::merge_issues(issues), vec![])
    }

    fn font_issue(severity: Severity) -> Issue {
        Issue::new(IssueType::NonEmbeddedFont, severity, IssueSource::Structural, "Calibri not embedded").at("Calibri")
    }

    fn margin_issue(severity: Severity) -> Issue {
        Issue::new(IssueType::MarginViolation, severity, IssueSource::Structural, "0.1in left margin").on_page(1)
    }

    #[test]
    fn test_conservative_keeps_only_margin_fix() {
        let d = diagnosis(vec![font_issue(Severity::Critical), margin_issue(Severity::Warning)]);
        let ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::Conservative);
        let plan = plan(&d, &registry(), &ctx);

        assert_eq!(plan.invocations.len(), 1);
        assert_eq!(plan.invocations[0].tool, "set_margins");
        let font = plan.decisions.iter().find(|d| d.issue.issue_type == IssueType::NonEmbeddedFont).unwrap();
        assert_eq!(font.outcome, PlanOutcome::Skipped);
    }

    #[test]
    fn test_aggressive_includes_font_substitution() {
        let d = diagnosis(vec![font_issue(Severity::Warning), margin_issue(Severity::Warning)]);
        let ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::Aggressive);
        let plan = plan(&d, &registry(), &ctx);

        let tools: Vec<&str> = plan.invocations.iter().map(|i| i.tool.as_str()).collect();
        assert!(tools.contains(&"replace_font"));
        assert!(tools.contains(&"set_margins"));
    }

    #[test]
    fn test_moderate_content_fixes_need_critical() {
        let ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::Moderate);
        let warning = plan(&diagnosis(vec![font_issue(Severity::Warning)]), &registry(), &ctx);
        assert!(warning.is_empty());

        let critical = plan(&diagnosis(vec![font_issue(Severity::Critical)]), &registry(), &ctx);
        assert_eq!(critical.invocations[0].tool, "replace_font");
        assert_eq!(critical.invocations[0].params["from_font"], "Calibri");
    }

    #[test]
    fn test_smart_auto_policy_table() {
        let d = diagnosis(vec![
            font_issue(Severity::Critical),
            margin_issue(Severity::Warning),
            Issue::new(IssueType::BlankPage, Severity::Info, IssueSource::Structural, "blank").on_page(9),
        ]);
        let ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::SmartAuto);
        let plan = plan(&d, &registry(), &ctx);

        assert_eq!(plan.invocations.len(), 1);
        assert_eq!(plan.invocations[0].tool, "set_margins");
        assert_eq!(plan.decisions.len(), 3);
        assert!(plan.decisions.iter().all(|d| !d.rationale.is_empty()));

        let blank = plan.decisions.iter().find(|d| d.issue.issue_type == IssueType::BlankPage).unwrap();
        assert_eq!(blank.outcome, PlanOutcome::Skipped);
        assert!(blank.rationale.contains("floor"));
    }

    #[test]
    fn test_smart_auto_floor_is_configurable() {
        let d = diagnosis(vec![
            Issue::new(IssueType::BlankPage, Severity::Info, IssueSource::Structural, "blank").on_page(9),
        ]);
        let mut ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::SmartAuto);
        ctx.severity_floor = Severity::Info;
        assert_eq!(plan(&d, &registry(), &ctx).invocations[0].tool, "remove_blank_pages");
    }

    #[test]
    fn test_unfixable_in_current_format() {
        let d = diagnosis(vec![Issue::new(
            IssueType::RgbColorspace,
            Severity::Warning,
            IssueSource::Structural,
            "RGB images",
        )]);
        let ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::Aggressive);
        let plan = plan(&d, &registry(), &ctx);

        assert!(plan.is_empty());
        assert_eq!(plan.unfixable().count(), 1);
    }

    #[test]
    fn test_exhausted_tool_not_replanned() {
        let margin = margin_issue(Severity::Warning);
        let mut ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::Aggressive);
        ctx.exhausted.insert((margin.key(), "set_margins".to_string()));

        let plan = plan(&diagnosis(vec![margin]), &registry(), &ctx);
        assert!(plan.is_empty());
        assert_eq!(plan.decisions[0].outcome, PlanOutcome::Exhausted);
    }

    #[test]
    fn test_identical_invocations_collapse() {
        let d = diagnosis(vec![
            margin_issue(Severity::Warning),
            Issue::new(IssueType::InconsistentMargins, Severity::Warning, IssueSource::Visual, "varies").on_page(2),
        ]);
        let ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::Aggressive);
        let plan = plan(&d, &registry(), &ctx);

        assert_eq!(plan.invocations.len(), 1);
        assert_eq!(plan.invocations[0].issues.len(), 2);
    }

    #[test]
    fn test_plan_follows_priority_order() {
        let d = diagnosis(vec![
            Issue::new(IssueType::BlankPage, Severity::Warning, IssueSource::Structural, "blank").on_page(4),
            Issue::new(IssueType::TrackedChanges, Severity::Critical, IssueSource::Structural, "revisions"),
        ]);
        let ctx = PlanningContext::new(DocumentFormat::Docx, Aggressiveness::Aggressive);
        let plan = plan(&d, &registry(), &ctx);
        let tools: Vec<&str> = plan.invocations.iter().map(|i| i.tool.as_str()).collect();
        assert_eq!(tools, vec!["accept_tracked_changes", "remove_blank_pages"]);
    }
}
