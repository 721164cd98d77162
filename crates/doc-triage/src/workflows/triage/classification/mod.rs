mod requirements;
mod rules;
mod scoring;

pub use requirements::{AlternativeGroup, RequirementCatalog};
pub use rules::UNKNOWN_AGE_DAYS;
pub use scoring::ConfidenceBand;

use chrono::{Local, NaiveDate};
use tracing::debug;

use super::domain::{
    AutoAction, Classification, ClassificationResult, DocumentAnalysis, DocumentRequirement,
    DocumentType, Evidence, Issue,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Weight {
    Blocking,
    NonBlocking,
}

#[derive(Debug, Clone)]
struct Finding {
    issue: Issue,
    weight: Weight,
    auto_action: Option<DocumentType>,
}

/// Per-document evaluation before group rules are applied.
struct Evaluation {
    analysis: DocumentAnalysis,
    findings: Vec<Finding>,
}

/// Deterministic classifier over a fixed requirement catalog.
#[derive(Debug, Clone, Default)]
pub struct ClassificationEngine {
    catalog: RequirementCatalog,
}

impl ClassificationEngine {
    pub fn new(catalog: RequirementCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &RequirementCatalog {
        &self.catalog
    }

    /// Classify against the local calendar date.
    pub fn classify(&self, evidence: &Evidence) -> ClassificationResult {
        self.classify_on(evidence, Local::now().date_naive())
    }

    /// Classify as of `today`; identical inputs always yield identical results.
    pub fn classify_on(&self, evidence: &Evidence, today: NaiveDate) -> ClassificationResult {
        let mut evaluations: Vec<Evaluation> = self
            .catalog
            .requirements()
            .iter()
            .map(|requirement| evaluate(requirement, evidence, today))
            .collect();

        let mut group_findings = Vec::new();
        for group in self.catalog.groups() {
            if let Some(finding) = self.apply_group(group, &mut evaluations) {
                group_findings.push(finding);
            }
        }

        let mut blocking_issues = Vec::new();
        let mut non_blocking_issues = Vec::new();
        let mut auto_actions: Vec<AutoAction> = Vec::new();

        let findings = evaluations
            .iter()
            .flat_map(|evaluation| evaluation.findings.iter())
            .chain(group_findings.iter());
        for finding in findings {
            match finding.weight {
                Weight::Blocking => blocking_issues.push(finding.issue.clone()),
                Weight::NonBlocking => non_blocking_issues.push(finding.issue.clone()),
            }
            if let Some(document_type) = finding.auto_action {
                if !auto_actions
                    .iter()
                    .any(|action| action.document_type == document_type)
                {
                    auto_actions.push(AutoAction { document_type });
                }
            }
        }

        let classification = if !blocking_issues.is_empty() {
            Classification::BlockingPending
        } else if !non_blocking_issues.is_empty() {
            Classification::NonBlockingPending
        } else {
            Classification::Approved
        };

        let document_analyses: Vec<DocumentAnalysis> = evaluations
            .into_iter()
            .map(|evaluation| evaluation.analysis)
            .collect();
        let valid = document_analyses
            .iter()
            .filter(|analysis| analysis.valid)
            .count();
        let confidence = scoring::confidence(valid, document_analyses.len(), classification);

        debug!(
            %classification,
            confidence,
            blocking = blocking_issues.len(),
            non_blocking = non_blocking_issues.len(),
            auto_actions = auto_actions.len(),
            "classified evidence"
        );

        ClassificationResult {
            classification,
            confidence,
            document_analyses,
            blocking_issues,
            non_blocking_issues,
            auto_actions,
        }
    }

    fn apply_group(
        &self,
        group: &AlternativeGroup,
        evaluations: &mut [Evaluation],
    ) -> Option<Finding> {
        let members = |evaluation: &&mut Evaluation| {
            group.contains(evaluation.analysis.document_type)
        };

        let satisfied = evaluations
            .iter()
            .filter(|evaluation| group.contains(evaluation.analysis.document_type))
            .any(|evaluation| evaluation.analysis.present && evaluation.analysis.valid);
        let any_present = evaluations
            .iter()
            .filter(|evaluation| group.contains(evaluation.analysis.document_type))
            .any(|evaluation| evaluation.analysis.present);

        if satisfied {
            // Surplus members keep their defects on the analysis only.
            for evaluation in evaluations.iter_mut().filter(members) {
                evaluation.findings.clear();
            }
            return None;
        }

        if any_present {
            return None;
        }

        let generatable = group.members.iter().copied().find(|member| {
            self.catalog
                .requirement(*member)
                .map(|requirement| {
                    requirement.can_auto_generate && !requirement.blocking_if_missing
                })
                .unwrap_or(false)
        });

        let message = format!("Required document group missing: {}", group.description);
        for evaluation in evaluations.iter_mut().filter(members) {
            evaluation.analysis.valid = false;
            evaluation.analysis.issues.push(message.clone());
            evaluation.analysis.can_auto_generate = generatable.is_some();
        }

        Some(Finding {
            issue: Issue {
                subject: group.key.to_string(),
                message,
            },
            weight: if generatable.is_some() {
                Weight::NonBlocking
            } else {
                Weight::Blocking
            },
            auto_action: generatable,
        })
    }
}

fn evaluate(requirement: &DocumentRequirement, evidence: &Evidence, today: NaiveDate) -> Evaluation {
    let document_type = requirement.document_type;
    let subject = document_type.key().to_string();
    let submitted = evidence.get(document_type).filter(|doc| doc.present);

    let Some(submitted) = submitted else {
        let mut analysis = DocumentAnalysis {
            document_type,
            present: false,
            valid: true,
            issues: Vec::new(),
            age_days: None,
            can_auto_generate: requirement.can_auto_generate,
        };
        let mut findings = Vec::new();

        if requirement.required {
            let message = format!("Required document missing: {}", document_type.display_name());
            let generatable = requirement.can_auto_generate && !requirement.blocking_if_missing;
            analysis.valid = false;
            analysis.can_auto_generate = generatable;
            analysis.issues.push(message.clone());
            findings.push(Finding {
                issue: Issue { subject, message },
                weight: if generatable {
                    Weight::NonBlocking
                } else {
                    Weight::Blocking
                },
                auto_action: generatable.then_some(document_type),
            });
        }

        return Evaluation { analysis, findings };
    };

    let outcome = rules::validate_present(requirement, submitted, today);
    let valid = outcome.failures.is_empty();
    let weight = if requirement.blocking_if_invalid {
        Weight::Blocking
    } else {
        Weight::NonBlocking
    };
    let remediable = weight == Weight::NonBlocking && requirement.can_auto_generate;

    let findings = outcome
        .failures
        .iter()
        .map(|message| Finding {
            issue: Issue {
                subject: subject.clone(),
                message: message.clone(),
            },
            weight,
            auto_action: remediable.then_some(document_type),
        })
        .collect();

    Evaluation {
        analysis: DocumentAnalysis {
            document_type,
            present: true,
            valid,
            issues: outcome.failures,
            age_days: outcome.age_days,
            can_auto_generate: remediable && !valid,
        },
        findings,
    }
}
