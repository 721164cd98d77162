use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::adapters::{DocumentRecord, RECORD_STORE};
use super::domain::{CaseContext, CaseId, ClassificationResult, Evidence};
use super::orchestrator::{OrchestrationResult, Orchestrator};
use super::report::{self, Recommendations};
use super::resilience::{ResilienceError, ResilienceReport, MAX_WINDOW_MINUTES};

/// Payload accepted by the triage endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TriageRequest {
    pub case: CaseContext,
    #[serde(default)]
    pub evidence: Evidence,
    /// Classification tag produced upstream; when absent the engine decides.
    #[serde(default)]
    pub verdict: Option<String>,
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationView {
    pub result: ClassificationResult,
    pub recommendations: Recommendations,
    pub summary: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TriageServiceError {
    #[error("case {0} is already being processed")]
    InFlight(CaseId),
    #[error(transparent)]
    Resilience(#[from] ResilienceError),
}

/// Runs orchestrations and remembers the latest outcome per case.
///
/// At most one run per case is in flight at a time.
pub struct TriageService {
    orchestrator: Orchestrator,
    results: Mutex<HashMap<CaseId, OrchestrationResult>>,
    in_flight: Mutex<HashSet<CaseId>>,
}

impl TriageService {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            results: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Claim the case and run it on a background task.
    pub fn accept(self: &Arc<Self>, request: TriageRequest) -> Result<CaseId, TriageServiceError> {
        let case_id = request.case.case_id.clone();
        self.claim(&case_id)?;

        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.execute(request).await;
        });
        info!(case_id = %case_id, "triage accepted");
        Ok(case_id)
    }

    /// Claim the case and run it to completion on the current task.
    pub async fn run(&self, request: TriageRequest) -> Result<OrchestrationResult, TriageServiceError> {
        self.claim(&request.case.case_id)?;
        Ok(self.execute(request).await)
    }

    pub fn latest(&self, case_id: &CaseId) -> Option<OrchestrationResult> {
        self.results
            .lock()
            .expect("results mutex poisoned")
            .get(case_id)
            .cloned()
    }

    pub async fn documents(&self, case_id: &CaseId) -> Result<Vec<DocumentRecord>, TriageServiceError> {
        let records = Arc::clone(&self.orchestrator.adapters().records);
        let resilience = self.orchestrator.resilience();
        let documents = resilience
            .wrap(RECORD_STORE, &resilience.policy().retry, || {
                let records = Arc::clone(&records);
                let case_id = case_id.clone();
                async move { records.documents_for_case(&case_id).await }
            })
            .await?;
        Ok(documents)
    }

    pub fn classify(&self, evidence: &Evidence, today: Option<NaiveDate>) -> ClassificationView {
        let today = today.unwrap_or_else(|| Local::now().date_naive());
        let result = self.orchestrator.engine().classify_on(evidence, today);
        ClassificationView {
            recommendations: report::recommendations(&result),
            summary: report::summary(&result),
            result,
        }
    }

    /// `window_minutes` is clamped to `1..=MAX_WINDOW_MINUTES`.
    pub fn resilience_report(&self, service: Option<&str>, window_minutes: i64) -> ResilienceReport {
        let minutes = window_minutes.clamp(1, MAX_WINDOW_MINUTES);
        self.orchestrator
            .resilience()
            .report(service, chrono::Duration::minutes(minutes))
    }

    fn claim(&self, case_id: &CaseId) -> Result<(), TriageServiceError> {
        let mut guard = self.in_flight.lock().expect("in-flight mutex poisoned");
        if !guard.insert(case_id.clone()) {
            warn!(case_id = %case_id, "triage already running for case");
            return Err(TriageServiceError::InFlight(case_id.clone()));
        }
        Ok(())
    }

    async fn execute(&self, request: TriageRequest) -> OrchestrationResult {
        let TriageRequest {
            case,
            evidence,
            verdict,
            today,
        } = request;
        let today = today.unwrap_or_else(|| Local::now().date_naive());

        let result = match verdict {
            Some(verdict) => {
                self.orchestrator
                    .process_verdict_on(&case, &verdict, &evidence, today)
                    .await
            }
            None => self.orchestrator.process_on(&case, &evidence, today).await,
        };

        self.results
            .lock()
            .expect("results mutex poisoned")
            .insert(case.case_id.clone(), result.clone());
        self.in_flight
            .lock()
            .expect("in-flight mutex poisoned")
            .remove(&case.case_id);
        result
    }
}
