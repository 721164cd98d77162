use tracing::{debug, info};

use super::super::adapters::{NotificationRecord, CASE_MANAGEMENT, MESSAGING, RECORD_STORE};
use super::super::domain::{CaseContext, CaseId, ClassificationResult};
use super::super::report;
use super::{ActionOutcome, OrchestrationError, Orchestrator, Run};

impl Orchestrator {
    pub(super) async fn write_field(
        &self,
        case_id: &CaseId,
        field: &str,
        text: &str,
    ) -> Result<ActionOutcome, OrchestrationError> {
        let cases = &self.adapters.cases;
        let written = self
            .call(CASE_MANAGEMENT, || cases.update_field(case_id, field, text))
            .await?;
        if written {
            Ok(ActionOutcome::Succeeded)
        } else {
            Err(OrchestrationError::Rejected {
                service: CASE_MANAGEMENT,
                action: format!("update field {field}"),
            })
        }
    }

    /// Reads the current phase first; a case already at `phase_id` is left alone.
    pub(super) async fn move_to_phase(
        &self,
        run: &mut Run,
        case_id: &CaseId,
        phase_id: &str,
    ) -> Result<ActionOutcome, OrchestrationError> {
        let cases = &self.adapters.cases;
        match self.call(CASE_MANAGEMENT, || cases.get_case(case_id)).await {
            Ok(record) if record.phase_id == phase_id => {
                debug!(%case_id, phase_id, "case already in target phase");
                return Ok(ActionOutcome::AlreadyApplied);
            }
            Ok(_) => {}
            Err(OrchestrationError::Resilience(failure)) => {
                run.lookup_failed(true, "read current phase", failure);
            }
            Err(other) => return Err(other),
        }

        let moved = self
            .call(CASE_MANAGEMENT, || cases.move_case(case_id, phase_id))
            .await?;
        if !moved {
            return Err(OrchestrationError::Rejected {
                service: CASE_MANAGEMENT,
                action: format!("move to phase {phase_id}"),
            });
        }
        info!(%case_id, phase_id, "case moved");
        Ok(ActionOutcome::Succeeded)
    }

    /// Sends at most one notification per `(case, phase)` using the record-store ledger.
    pub(super) async fn notify(
        &self,
        run: &mut Run,
        case: &CaseContext,
        finding: &ClassificationResult,
        phase_id: &str,
    ) -> Result<ActionOutcome, OrchestrationError> {
        let case_id = &case.case_id;
        let records = &self.adapters.records;

        match self
            .call(RECORD_STORE, || records.notification_for(case_id, phase_id))
            .await
        {
            Ok(Some(previous)) => {
                debug!(
                    %case_id,
                    phase_id,
                    message_id = previous.message_id.as_deref(),
                    "notification already sent"
                );
                return Ok(ActionOutcome::AlreadyApplied);
            }
            Ok(None) => {}
            Err(OrchestrationError::Resilience(failure)) => {
                run.lookup_failed(true, "read notification ledger", failure);
            }
            Err(other) => return Err(other),
        }

        let recipient = case
            .responsible
            .as_ref()
            .or(self.settings.fallback_recipient.as_ref())
            .ok_or_else(|| OrchestrationError::RecipientMissing {
                case_id: case_id.clone(),
            })?;
        let text = report::blocking_notification(case, finding);

        let messaging = &self.adapters.messaging;
        let receipt = self
            .call(MESSAGING, || messaging.send(recipient, &text))
            .await?;
        if !receipt.success {
            return Err(OrchestrationError::NotDelivered {
                recipient: recipient.address.clone(),
            });
        }
        info!(%case_id, recipient = %recipient.address, message_id = receipt.message_id.as_deref(), "notification sent");

        let entry = NotificationRecord {
            case_id: case_id.clone(),
            phase_id: phase_id.to_string(),
            recipient: recipient.address.clone(),
            message_id: receipt.message_id,
        };
        match self
            .call(RECORD_STORE, || records.record_notification(entry.clone()))
            .await
        {
            Ok(()) => {}
            // Delivered already; a missing ledger row only risks a repeat send.
            Err(OrchestrationError::Resilience(failure)) => {
                run.lookup_failed(true, "record notification", failure);
            }
            Err(other) => return Err(other),
        }

        Ok(ActionOutcome::Succeeded)
    }
}
