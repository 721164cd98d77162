//! Drives one case from evidence to its next pipeline phase.
//!
//! Actions run strictly in order for a case. Failures are collected on the
//! [`OrchestrationResult`]; nothing here panics or returns an error to the
//! caller.

mod actions;
mod remediation;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, error, info, warn};

use super::adapters::{AdapterError, Adapters};
use super::classification::ClassificationEngine;
use super::domain::{
    CaseContext, CaseId, Classification, ClassificationResult, DocumentType, Evidence, Recipient,
    UnrecognizedClassification,
};
use super::report::{self, Recommendations};
use super::resilience::{ResilienceContext, ResilienceError};

pub const DEFAULT_PENDING_DOCUMENTS_PHASE: &str = "338000017";
pub const DEFAULT_APPROVED_PHASE: &str = "338000018";
pub const DEFAULT_EMIT_DOCUMENTS_PHASE: &str = "338000019";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseIds {
    pub pending_documents: String,
    pub emit_documents: String,
    pub approved: String,
}

impl Default for PhaseIds {
    fn default() -> Self {
        Self {
            pending_documents: DEFAULT_PENDING_DOCUMENTS_PHASE.to_string(),
            emit_documents: DEFAULT_EMIT_DOCUMENTS_PHASE.to_string(),
            approved: DEFAULT_APPROVED_PHASE.to_string(),
        }
    }
}

impl PhaseIds {
    pub fn target_for(&self, classification: Classification) -> &str {
        match classification {
            Classification::Approved => &self.approved,
            Classification::BlockingPending => &self.pending_documents,
            Classification::NonBlockingPending => &self.emit_documents,
        }
    }
}

/// Pipeline identifiers and fields the orchestrator writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSettings {
    pub phases: PhaseIds,
    pub report_field: String,
    pub approval_field: String,
    pub fallback_recipient: Option<Recipient>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            phases: PhaseIds::default(),
            report_field: "triage_report".to_string(),
            approval_field: "triage_approval".to_string(),
            fallback_recipient: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    Received,
    Classified,
    ActionsExecuting,
    Completed,
    /// Some required action failed; the others still ran.
    Failed,
}

impl OrchestrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrchestrationState::Completed | OrchestrationState::Failed)
    }

    pub fn can_advance_to(self, next: OrchestrationState) -> bool {
        use OrchestrationState::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Received, Failed)
                | (Classified, ActionsExecuting)
                | (ActionsExecuting, Completed)
                | (ActionsExecuting, Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    WriteReport { field: String },
    AutoGenerate { document_type: DocumentType },
    MovePhase { phase_id: String },
    Notify { phase_id: String },
    WriteApproval { field: String },
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::WriteReport { field } => write!(f, "write report to {field}"),
            ActionKind::AutoGenerate { document_type } => {
                write!(f, "generate {}", document_type.slug())
            }
            ActionKind::MovePhase { phase_id } => write!(f, "move to phase {phase_id}"),
            ActionKind::Notify { phase_id } => write!(f, "notify responsible ({phase_id})"),
            ActionKind::WriteApproval { field } => write!(f, "write approval to {field}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    /// Effect was already in place from an earlier run.
    AlreadyApplied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub action: ActionKind,
    pub required: bool,
    pub outcome: ActionOutcome,
    pub detail: Option<String>,
}

impl ActionRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome != ActionOutcome::Failed
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
    #[error(transparent)]
    UnrecognizedClassification(#[from] UnrecognizedClassification),
    #[error("{service} rejected '{action}'")]
    Rejected { service: &'static str, action: String },
    #[error("no tax identifier available to generate {document}")]
    IdentifierUnavailable { document: DocumentType },
    #[error("no notification recipient for case {case_id}")]
    RecipientMissing { case_id: CaseId },
    #[error("message to {recipient} was not delivered")]
    NotDelivered { recipient: String },
    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: OrchestrationState,
        to: OrchestrationState,
    },
    /// A read or bookkeeping call the action carried on without.
    #[error("{step} failed: {source}")]
    LookupFailed {
        step: &'static str,
        source: ResilienceError,
    },
}

impl OrchestrationError {
    /// Lookup failures are reported but do not fail the case.
    pub fn is_lookup(&self) -> bool {
        matches!(self, OrchestrationError::LookupFailed { .. })
    }
}

fn serialize_errors<S>(errors: &[OrchestrationError], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(errors.iter().map(|error| error.to_string()))
}

/// Everything that happened while processing one case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestrationResult {
    pub case_id: CaseId,
    pub classification: Option<Classification>,
    pub state: OrchestrationState,
    pub success: bool,
    pub actions: Vec<ActionRecord>,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<OrchestrationError>,
    pub warnings: Vec<String>,
    pub finding: Option<ClassificationResult>,
    pub recommendations: Option<Recommendations>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OrchestrationResult {
    pub fn actions_of<'a>(
        &'a self,
        predicate: impl Fn(&ActionKind) -> bool + 'a,
    ) -> impl Iterator<Item = &'a ActionRecord> + 'a {
        self.actions
            .iter()
            .filter(move |record| predicate(&record.action))
    }
}

/// Mutable bookkeeping for one orchestration run.
struct Run {
    case_id: CaseId,
    state: OrchestrationState,
    actions: Vec<ActionRecord>,
    errors: Vec<OrchestrationError>,
    warnings: Vec<String>,
    started_at: DateTime<Utc>,
}

impl Run {
    fn new(case_id: CaseId) -> Self {
        Self {
            case_id,
            state: OrchestrationState::Received,
            actions: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
        }
    }

    fn advance(&mut self, next: OrchestrationState) {
        if self.state.can_advance_to(next) {
            debug!(case_id = %self.case_id, from = ?self.state, to = ?next, "state transition");
            self.state = next;
        } else {
            error!(case_id = %self.case_id, from = ?self.state, to = ?next, "invalid state transition");
            self.errors.push(OrchestrationError::InvalidTransition {
                from: self.state,
                to: next,
            });
            self.state = OrchestrationState::Failed;
        }
    }

    fn record(
        &mut self,
        action: ActionKind,
        required: bool,
        outcome: Result<ActionOutcome, OrchestrationError>,
    ) {
        let record = match outcome {
            Ok(outcome) => ActionRecord {
                action,
                required,
                outcome,
                detail: None,
            },
            Err(failure) => {
                let detail = failure.to_string();
                if required {
                    error!(case_id = %self.case_id, action = %action, error = %detail, "required action failed");
                    self.errors.push(failure);
                } else {
                    warn!(case_id = %self.case_id, action = %action, error = %detail, "optional action failed");
                    self.warnings.push(format!("{action}: {detail}"));
                }
                ActionRecord {
                    action,
                    required,
                    outcome: ActionOutcome::Failed,
                    detail: Some(detail),
                }
            }
        };
        self.actions.push(record);
    }

    /// Record a failed lookup; `required` picks errors over warnings.
    fn lookup_failed(&mut self, required: bool, step: &'static str, source: ResilienceError) {
        warn!(case_id = %self.case_id, step, error = %source, "lookup failed; continuing");
        let failure = OrchestrationError::LookupFailed { step, source };
        if required {
            self.errors.push(failure);
        } else {
            self.warnings.push(failure.to_string());
        }
    }

    fn required_failures(&self) -> usize {
        self.actions
            .iter()
            .filter(|record| record.required && !record.succeeded())
            .count()
    }

    fn finish(
        mut self,
        classification: Option<Classification>,
        finding: Option<ClassificationResult>,
    ) -> OrchestrationResult {
        if !self.state.is_terminal() {
            let clean = self.errors.iter().all(OrchestrationError::is_lookup);
            let next = if self.required_failures() == 0 && clean {
                OrchestrationState::Completed
            } else {
                OrchestrationState::Failed
            };
            self.advance(next);
        }

        let success = self.state == OrchestrationState::Completed;
        let recommendations = finding.as_ref().map(report::recommendations);
        info!(
            case_id = %self.case_id,
            classification = classification.map(Classification::label),
            state = ?self.state,
            actions = self.actions.len(),
            errors = self.errors.len(),
            success,
            "orchestration finished"
        );

        OrchestrationResult {
            case_id: self.case_id,
            classification,
            state: self.state,
            success,
            actions: self.actions,
            errors: self.errors,
            warnings: self.warnings,
            finding,
            recommendations,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Classification plus ordered, idempotent remediation for one case at a time.
#[derive(Clone)]
pub struct Orchestrator {
    engine: ClassificationEngine,
    adapters: Adapters,
    resilience: Arc<ResilienceContext>,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        engine: ClassificationEngine,
        adapters: Adapters,
        resilience: Arc<ResilienceContext>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engine,
            adapters,
            resilience,
            settings,
        }
    }

    pub fn engine(&self) -> &ClassificationEngine {
        &self.engine
    }

    pub fn adapters(&self) -> &Adapters {
        &self.adapters
    }

    pub fn resilience(&self) -> &Arc<ResilienceContext> {
        &self.resilience
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn process(&self, case: &CaseContext, evidence: &Evidence) -> OrchestrationResult {
        self.process_on(case, evidence, Local::now().date_naive())
            .await
    }

    /// Same as [`Orchestrator::process`] with document ages measured from `today`.
    pub async fn process_on(
        &self,
        case: &CaseContext,
        evidence: &Evidence,
        today: NaiveDate,
    ) -> OrchestrationResult {
        let mut run = Run::new(case.case_id.clone());
        let finding = self.engine.classify_on(evidence, today);
        run.advance(OrchestrationState::Classified);

        let classification = finding.classification;
        self.dispatch(&mut run, case, evidence, classification, &finding)
            .await;
        run.finish(Some(classification), Some(finding))
    }

    /// Dispatch on a classification tag produced upstream.
    ///
    /// The engine still derives issues and auto-actions from `evidence`; the
    /// tag decides which branch runs. An unknown tag fails the case.
    pub async fn process_verdict(
        &self,
        case: &CaseContext,
        verdict: &str,
        evidence: &Evidence,
    ) -> OrchestrationResult {
        self.process_verdict_on(case, verdict, evidence, Local::now().date_naive())
            .await
    }

    pub async fn process_verdict_on(
        &self,
        case: &CaseContext,
        verdict: &str,
        evidence: &Evidence,
        today: NaiveDate,
    ) -> OrchestrationResult {
        let mut run = Run::new(case.case_id.clone());

        let classification = match verdict.parse::<Classification>() {
            Ok(classification) => classification,
            Err(unrecognized) => {
                error!(case_id = %case.case_id, verdict, "unrecognized classification verdict");
                run.errors.push(unrecognized.into());
                run.advance(OrchestrationState::Failed);
                return run.finish(None, None);
            }
        };

        let finding = self.engine.classify_on(evidence, today);
        if finding.classification != classification {
            warn!(
                case_id = %case.case_id,
                verdict = classification.label(),
                derived = finding.classification.label(),
                "upstream verdict differs from evidence classification"
            );
        }
        run.advance(OrchestrationState::Classified);

        self.dispatch(&mut run, case, evidence, classification, &finding)
            .await;
        run.finish(Some(classification), Some(finding))
    }

    async fn dispatch(
        &self,
        run: &mut Run,
        case: &CaseContext,
        evidence: &Evidence,
        classification: Classification,
        finding: &ClassificationResult,
    ) {
        run.advance(OrchestrationState::ActionsExecuting);

        let report_text = report::render_report(finding, case, Utc::now());
        let field = self.settings.report_field.clone();
        let outcome = self.write_field(&case.case_id, &field, &report_text).await;
        run.record(ActionKind::WriteReport { field }, true, outcome);

        let target = self.settings.phases.target_for(classification).to_string();
        match classification {
            Classification::BlockingPending => {
                self.remediate(run, case, evidence, finding, &report_text, classification)
                    .await;
                self.transition(run, &case.case_id, &target).await;
                let outcome = self.notify(run, case, finding, &target).await;
                run.record(ActionKind::Notify { phase_id: target }, true, outcome);
            }
            Classification::NonBlockingPending => {
                self.remediate(run, case, evidence, finding, &report_text, classification)
                    .await;
                self.transition(run, &case.case_id, &target).await;
            }
            Classification::Approved => {
                let field = self.settings.approval_field.clone();
                let message = report::approval_message(case, Utc::now());
                let outcome = self.write_field(&case.case_id, &field, &message).await;
                run.record(ActionKind::WriteApproval { field }, true, outcome);
                self.transition(run, &case.case_id, &target).await;
            }
        }
    }

    async fn transition(&self, run: &mut Run, case_id: &CaseId, phase_id: &str) {
        let outcome = self.move_to_phase(run, case_id, phase_id).await;
        run.record(
            ActionKind::MovePhase {
                phase_id: phase_id.to_string(),
            },
            true,
            outcome,
        );
    }

    /// Funnel one adapter call through the shared resilience context.
    async fn call<T, F, Fut>(&self, service: &'static str, operation: F) -> Result<T, OrchestrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let retry = &self.resilience.policy().retry;
        Ok(self.resilience.wrap(service, retry, operation).await?)
    }
}
