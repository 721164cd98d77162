use chrono::NaiveDate;
use doc_triage::config::AppConfig;
use doc_triage::workflows::triage::adapters::memory::MemoryAdapters;
use doc_triage::workflows::triage::{
    ClassificationEngine, OpsAlerter, Orchestrator, ResilienceContext, TriageService,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Wire the triage service to in-process adapters.
///
/// Operations alerts share the messaging adapter with case notifications.
pub(crate) fn memory_triage_service(config: &AppConfig) -> (Arc<TriageService>, MemoryAdapters) {
    let memory = MemoryAdapters::default();
    let adapters = memory.adapters();
    let alerter = OpsAlerter::new(config.alerts.clone(), Arc::clone(&adapters.messaging));
    let resilience = ResilienceContext::new(config.resilience.clone()).with_alerter(alerter);
    let orchestrator = Orchestrator::new(
        ClassificationEngine::default(),
        adapters,
        Arc::new(resilience),
        config.pipeline.clone(),
    );
    (Arc::new(TriageService::new(orchestrator)), memory)
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_accepts_iso_dates_only() {
        assert_eq!(
            parse_date(" 2025-06-30 "),
            Ok(NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date"))
        );
        assert!(parse_date("30/06/2025").is_err());
    }
}
