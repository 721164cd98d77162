//! Text rendered into the case record and outbound messages.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::domain::{CaseContext, Classification, ClassificationResult, Issue};

const SUMMARY_BLOCKING_LIMIT: usize = 5;
const SUMMARY_NON_BLOCKING_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Follow-up guidance attached to every orchestration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendations {
    pub priority: Priority,
    pub estimated_resolution: String,
    pub required_actions: Vec<String>,
    pub automated_actions: Vec<String>,
    pub manual_actions: Vec<String>,
}

pub fn recommendations(result: &ClassificationResult) -> Recommendations {
    match result.classification {
        Classification::Approved => Recommendations {
            priority: Priority::Low,
            estimated_resolution: "immediate".to_string(),
            required_actions: vec!["Proceed with onboarding".to_string()],
            automated_actions: Vec::new(),
            manual_actions: Vec::new(),
        },
        Classification::BlockingPending => Recommendations {
            priority: Priority::High,
            estimated_resolution: "3-5 business days".to_string(),
            required_actions: strings(&[
                "Contact the client urgently",
                "Request compliant documents",
                "Track regularization",
            ]),
            automated_actions: Vec::new(),
            manual_actions: strings(&[
                "Send the detailed issue list to the client",
                "Schedule a clarification call if needed",
                "Agree on a regularization deadline",
            ]),
        },
        Classification::NonBlockingPending => Recommendations {
            priority: Priority::Medium,
            estimated_resolution: "1-2 business days".to_string(),
            required_actions: strings(&[
                "Generate pending documents",
                "Verify automatic actions",
                "Finalize documentation",
            ]),
            automated_actions: result.auto_actions.iter().map(|action| action.label()).collect(),
            manual_actions: Vec::new(),
        },
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Short plain-text digest; long issue lists are truncated.
pub fn summary(result: &ClassificationResult) -> String {
    let total = result.document_analyses.len();
    let valid = result.valid_documents();
    let compliance = if total == 0 {
        0.0
    } else {
        valid as f32 / total as f32 * 100.0
    };

    let mut out = format!(
        "Classification: {} (confidence {:.0}%)\nDocuments: {valid}/{total} valid ({compliance:.1}% compliance)\n",
        result.classification,
        result.confidence * 100.0,
    );
    push_issue_list(
        &mut out,
        "Blocking issues",
        &result.blocking_issues,
        SUMMARY_BLOCKING_LIMIT,
    );
    push_issue_list(
        &mut out,
        "Non-blocking issues",
        &result.non_blocking_issues,
        SUMMARY_NON_BLOCKING_LIMIT,
    );
    if !result.auto_actions.is_empty() {
        let labels: Vec<String> = result.auto_actions.iter().map(|action| action.label()).collect();
        let _ = writeln!(out, "Automatic actions: {}", labels.join(", "));
    }
    out
}

fn push_issue_list(out: &mut String, title: &str, issues: &[Issue], limit: usize) {
    if issues.is_empty() {
        return;
    }
    let _ = writeln!(out, "{title} ({}):", issues.len());
    for issue in issues.iter().take(limit) {
        let _ = writeln!(out, "- {issue}");
    }
    if issues.len() > limit {
        let _ = writeln!(out, "- ... and {} more", issues.len() - limit);
    }
}

/// Full finding written to the case's report field.
pub fn render_report(
    result: &ClassificationResult,
    context: &CaseContext,
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Document triage report\n");
    let _ = writeln!(out, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "Case: {} ({})", context.display_name, context.case_id);
    if let Some(tax_id) = &context.tax_id {
        let _ = writeln!(out, "Tax id: {tax_id}");
    }
    if let Some(responsible) = &context.responsible {
        let _ = writeln!(out, "Responsible: {}", responsible.name);
    }

    let _ = writeln!(out, "\n## Summary\n");
    out.push_str(&summary(result));

    let _ = writeln!(out, "\n## Documents\n");
    for analysis in &result.document_analyses {
        let mark = if analysis.valid { "[ok]" } else { "[!!]" };
        let presence = if analysis.present { "present" } else { "absent" };
        let _ = writeln!(
            out,
            "{mark} {} ({presence})",
            analysis.document_type.display_name()
        );
        if let Some(age) = analysis.age_days {
            let _ = writeln!(out, "    age: {age} days");
        }
        if analysis.can_auto_generate {
            let _ = writeln!(out, "    can be generated automatically");
        }
        for issue in &analysis.issues {
            let _ = writeln!(out, "    - {issue}");
        }
    }

    let _ = writeln!(out, "\n## Next steps\n");
    out.push_str(next_steps(result.classification));
    out
}

pub fn next_steps(classification: Classification) -> &'static str {
    match classification {
        Classification::Approved => {
            "Documentation approved. The case moves to the approved phase and waits for the onboarding team.\n"
        }
        Classification::BlockingPending => {
            "Blocking issues found. The case moves to pending documents and the responsible party is notified; \
the client must resubmit compliant documents.\n"
        }
        Classification::NonBlockingPending => {
            "Non-blocking issues found. Missing artifacts are generated automatically and the case moves to \
emit documents for internal completion.\n"
        }
    }
}

pub fn approval_message(context: &CaseContext, at: DateTime<Utc>) -> String {
    format!(
        "Documentation for {} approved on {}. All checklist documents are present and valid.",
        context.display_name,
        at.format("%Y-%m-%d"),
    )
}

/// Urgent notice sent to the responsible party for blocking cases.
pub fn blocking_notification(context: &CaseContext, result: &ClassificationResult) -> String {
    let mut out = format!(
        "URGENT: case {} ({}) has {} blocking document issue(s).\n",
        context.display_name,
        context.case_id,
        result.blocking_issues.len()
    );
    for issue in result.blocking_issues.iter().take(SUMMARY_BLOCKING_LIMIT) {
        let _ = writeln!(out, "- {issue}");
    }
    if result.blocking_issues.len() > SUMMARY_BLOCKING_LIMIT {
        let _ = writeln!(
            out,
            "- ... and {} more",
            result.blocking_issues.len() - SUMMARY_BLOCKING_LIMIT
        );
    }
    out.push_str("Please contact the client to regularize the documents.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::triage::domain::{AutoAction, DocumentType};

    fn issue(n: usize) -> Issue {
        Issue {
            subject: format!("doc_{n}"),
            message: format!("problem {n}"),
        }
    }

    fn result(classification: Classification) -> ClassificationResult {
        ClassificationResult {
            classification,
            confidence: 0.3,
            document_analyses: Vec::new(),
            blocking_issues: (0..7).map(issue).collect(),
            non_blocking_issues: vec![issue(10)],
            auto_actions: vec![AutoAction {
                document_type: DocumentType::TaxCard,
            }],
        }
    }

    #[test]
    fn summary_truncates_long_blocking_lists() {
        let text = summary(&result(Classification::BlockingPending));
        assert!(text.contains("Blocking issues (7):"));
        assert!(text.contains("- doc_4: problem 4"));
        assert!(!text.contains("doc_5: problem 5"));
        assert!(text.contains("... and 2 more"));
        assert!(text.contains("Automatic actions: generate tax-card"));
    }

    #[test]
    fn recommendations_follow_classification() {
        let blocking = recommendations(&result(Classification::BlockingPending));
        assert_eq!(blocking.priority, Priority::High);
        assert!(blocking.automated_actions.is_empty());

        let non_blocking = recommendations(&result(Classification::NonBlockingPending));
        assert_eq!(non_blocking.priority, Priority::Medium);
        assert_eq!(non_blocking.automated_actions, vec!["generate tax-card".to_string()]);
    }

    #[test]
    fn report_names_case_and_next_steps() {
        let mut context = CaseContext::new("case-9", "Acme Ltda");
        context.tax_id = Some("12.345.678/0001-95".to_string());
        let report = render_report(
            &result(Classification::BlockingPending),
            &context,
            Utc::now(),
        );
        assert!(report.contains("Case: Acme Ltda (case-9)"));
        assert!(report.contains("Tax id: 12.345.678/0001-95"));
        assert!(report.contains("Blocking issues found."));
    }
}
