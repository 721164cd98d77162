//! Auto-action execution shared by the blocking and non-blocking branches.

use tracing::{debug, info, warn};

use super::super::adapters::{
    DocumentRecord, ARTIFACT_GENERATOR, CASE_MANAGEMENT, OBJECT_STORAGE, RECORD_STORE,
};
use super::super::domain::{AutoAction, CaseContext, Classification, ClassificationResult, Evidence};
use super::super::identifier::{self, ResolvedIdentifier};
use super::{ActionKind, ActionOutcome, OrchestrationError, Orchestrator, Run};

/// How auto-action failures count toward the case outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Strictness {
    /// Failures are orchestration errors.
    Required,
    /// Failures are warnings only.
    BestEffort,
}

impl Strictness {
    pub(super) fn for_classification(classification: Classification) -> Self {
        match classification {
            Classification::NonBlockingPending => Strictness::BestEffort,
            Classification::BlockingPending | Classification::Approved => Strictness::Required,
        }
    }
}

/// Inputs shared by every auto-action of one case.
struct Subject<'a> {
    case: &'a CaseContext,
    evidence: &'a Evidence,
    finding: &'a ClassificationResult,
    report_text: &'a str,
    required: bool,
}

impl Orchestrator {
    pub(super) async fn remediate(
        &self,
        run: &mut Run,
        case: &CaseContext,
        evidence: &Evidence,
        finding: &ClassificationResult,
        report_text: &str,
        classification: Classification,
    ) {
        let required = Strictness::for_classification(classification) == Strictness::Required;
        let subject = Subject {
            case,
            evidence,
            finding,
            report_text,
            required,
        };
        for action in &finding.auto_actions {
            let outcome = self.apply_auto_action(run, &subject, action).await;
            run.record(
                ActionKind::AutoGenerate {
                    document_type: action.document_type,
                },
                required,
                outcome,
            );
        }
    }

    async fn apply_auto_action(
        &self,
        run: &mut Run,
        subject: &Subject<'_>,
        action: &AutoAction,
    ) -> Result<ActionOutcome, OrchestrationError> {
        let case_id = &subject.case.case_id;
        let name = action.artifact_name();
        let records = &self.adapters.records;

        match self
            .call(RECORD_STORE, || records.documents_for_case(case_id))
            .await
        {
            Ok(existing) if existing.iter().any(|record| record.name == name) => {
                debug!(%case_id, artifact = %name, "artifact already recorded");
                return Ok(ActionOutcome::AlreadyApplied);
            }
            Ok(_) => {}
            Err(OrchestrationError::Resilience(failure)) => {
                run.lookup_failed(subject.required, "look up recorded documents", failure);
            }
            Err(other) => return Err(other),
        }

        let identifier = self
            .resolve_identifier(run, subject)
            .await
            .ok_or(OrchestrationError::IdentifierUnavailable {
                document: action.document_type,
            })?;

        let artifacts = &self.adapters.artifacts;
        let bytes = self
            .call(ARTIFACT_GENERATOR, || artifacts.generate(&identifier.value))
            .await?;

        let storage = &self.adapters.storage;
        let url = self
            .call(OBJECT_STORAGE, || storage.store(case_id, &name, bytes.clone()))
            .await?;

        let record = DocumentRecord {
            case_id: case_id.clone(),
            name: name.clone(),
            tag: action.document_type.key().to_string(),
            url,
        };
        self.call(RECORD_STORE, || records.upsert_document(record.clone()))
            .await?;

        info!(%case_id, artifact = %name, "artifact generated and recorded");
        Ok(ActionOutcome::Succeeded)
    }

    /// Case context, then structured evidence, then report text, then the case record.
    async fn resolve_identifier(
        &self,
        run: &mut Run,
        subject: &Subject<'_>,
    ) -> Option<ResolvedIdentifier> {
        let Subject {
            case,
            evidence,
            finding,
            report_text,
            required,
        } = *subject;
        let local = identifier::from_context(case)
            .or_else(|| identifier::from_evidence(evidence))
            .or_else(|| {
                let issue_texts = finding
                    .blocking_issues
                    .iter()
                    .chain(&finding.non_blocking_issues)
                    .map(|issue| issue.message.as_str());
                identifier::scan_texts(std::iter::once(report_text).chain(issue_texts))
            });
        if let Some(found) = local {
            log_resolution(case, &found);
            return Some(found);
        }

        let cases = &self.adapters.cases;
        let case_id = &case.case_id;
        match self.call(CASE_MANAGEMENT, || cases.get_case(case_id)).await {
            Ok(record) => {
                let found = identifier::from_case_record(&record);
                match &found {
                    Some(found) => log_resolution(case, found),
                    None => warn!(%case_id, "no tax identifier found in any source"),
                }
                found
            }
            Err(OrchestrationError::Resilience(failure)) => {
                run.lookup_failed(required, "read case record for identifier", failure);
                None
            }
            Err(_) => None,
        }
    }
}

fn log_resolution(case: &CaseContext, found: &ResolvedIdentifier) {
    info!(
        case_id = %case.case_id,
        identifier_source = found.source.label(),
        "tax identifier resolved"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_non_blocking_cases_treat_auto_actions_as_best_effort() {
        assert_eq!(
            Strictness::for_classification(Classification::NonBlockingPending),
            Strictness::BestEffort
        );
        assert_eq!(
            Strictness::for_classification(Classification::BlockingPending),
            Strictness::Required
        );
    }
}
