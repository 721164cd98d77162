//! Retry, backoff and circuit breaking around adapter calls.
//!
//! A [`ResilienceContext`] is shared by every case processed in one
//! deployment: breaker state is keyed by service name, so a messaging outage
//! observed on one case fails fast for the next.

mod alerts;
mod breaker;
mod calls;
mod error;
mod history;
mod retry;

pub use alerts::{AlertConfig, AlertKind, OpsAlerter};

pub use breaker::{
    Admission, BreakerConfig, BreakerSnapshot, BreakerStatus, CircuitBreakerRegistry, TrialGuard,
};
pub use calls::{CallMetrics, CallOutcome, ServiceCallStats};
pub use error::{ErrorClassifier, ErrorKind, ServiceError, Severity};
pub use history::{ErrorHistory, ErrorStats, DEFAULT_HISTORY_CAPACITY, MAX_WINDOW_MINUTES};
pub use retry::{backoff, RetryConfig};

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::adapters::AdapterError;

/// Knobs for the whole resilience layer, usually built from configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResiliencePolicy {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub call_timeout: Duration,
    pub cold_start_timeout: Duration,
    pub critical_services: Vec<String>,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            call_timeout: Duration::from_secs(30),
            cold_start_timeout: Duration::from_secs(120),
            critical_services: vec!["record_store".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResilienceError {
    #[error("circuit open for {service}; retry after {retry_after:?}")]
    CircuitOpen {
        service: String,
        retry_after: Duration,
    },
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl ResilienceError {
    pub fn service(&self) -> &str {
        match self {
            ResilienceError::CircuitOpen { service, .. } => service,
            ResilienceError::Service(error) => &error.service,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ResilienceError::CircuitOpen { .. } => Severity::High,
            ResilienceError::Service(error) => error.severity,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResilienceReport {
    pub errors: ErrorStats,
    pub breakers: BTreeMap<String, BreakerSnapshot>,
    pub calls: BTreeMap<String, ServiceCallStats>,
}

/// Shared resilience state: classifier, breakers, call metrics, error
/// history and the optional operations alerter.
#[derive(Debug)]
pub struct ResilienceContext {
    policy: ResiliencePolicy,
    classifier: ErrorClassifier,
    breakers: CircuitBreakerRegistry,
    history: ErrorHistory,
    calls: CallMetrics,
    alerter: Option<OpsAlerter>,
}

impl Default for ResilienceContext {
    fn default() -> Self {
        Self::new(ResiliencePolicy::default())
    }
}

impl ResilienceContext {
    pub fn new(policy: ResiliencePolicy) -> Self {
        Self {
            classifier: ErrorClassifier::new(&policy.critical_services),
            breakers: CircuitBreakerRegistry::new(policy.breaker.clone()),
            history: ErrorHistory::default(),
            calls: CallMetrics::default(),
            alerter: None,
            policy,
        }
    }

    pub fn with_alerter(mut self, alerter: OpsAlerter) -> Self {
        self.alerter = Some(alerter);
        self
    }

    pub fn alerter(&self) -> Option<&OpsAlerter> {
        self.alerter.as_ref()
    }

    pub fn calls(&self) -> &CallMetrics {
        &self.calls
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn history(&self) -> &ErrorHistory {
        &self.history
    }

    pub fn classify_error(
        &self,
        failure: &AdapterError,
        service: &str,
        status_code: Option<u16>,
    ) -> ServiceError {
        self.classifier.classify(failure, service, status_code)
    }

    /// Decision under the default retry ceiling.
    pub fn should_retry(&self, error: &ServiceError) -> bool {
        self.should_retry_with(error, &self.policy.retry)
    }

    pub fn should_retry_with(&self, error: &ServiceError, config: &RetryConfig) -> bool {
        if matches!(error.kind, ErrorKind::Auth | ErrorKind::Validation) {
            return false;
        }
        if error.retry_count >= config.max_retries {
            return false;
        }
        !self.breakers.is_open(&error.service)
    }

    /// Drop breaker state, call metrics and history; used between test runs and by operators.
    pub fn reset(&self) {
        self.breakers.reset();
        self.calls.clear();
        self.history.clear();
    }

    pub fn report(&self, service: Option<&str>, window: chrono::Duration) -> ResilienceReport {
        ResilienceReport {
            errors: self.history.stats(service, window),
            breakers: self.breakers.snapshot(),
            calls: self.calls.snapshot(),
        }
    }

    /// Run `operation` under the breaker for `service`, retrying with backoff.
    ///
    /// Each attempt is bounded by the call timeout. A final "not ready"
    /// failure earns one more attempt under the cold-start timeout.
    pub async fn wrap<T, F, Fut>(
        &self,
        service: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut cold_start = false;

        loop {
            let trial = match self.breakers.admit(service) {
                Admission::Allowed => None,
                Admission::Trial => Some(TrialGuard::new(&self.breakers, service)),
                Admission::Rejected { retry_after } => {
                    self.calls.record(service, CallOutcome::Rejected, Duration::ZERO);
                    error!(
                        service,
                        retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                        "circuit open; call rejected"
                    );
                    return Err(ResilienceError::CircuitOpen {
                        service: service.to_string(),
                        retry_after,
                    });
                }
            };

            let limit = if cold_start {
                self.policy.cold_start_timeout
            } else {
                self.policy.call_timeout
            };
            let attempt_started = Instant::now();
            let outcome = match tokio::time::timeout(limit, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AdapterError::Timeout(limit)),
            };
            if let Some(trial) = trial {
                trial.disarm();
            }
            let elapsed = attempt_started.elapsed();

            let failure = match outcome {
                Ok(value) => {
                    self.calls.record(service, CallOutcome::Success, elapsed);
                    self.breakers.record_success(service);
                    if attempt > 0 || cold_start {
                        info!(
                            service,
                            attempt,
                            elapsed_ms = elapsed_ms(started),
                            "call recovered"
                        );
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            let call_outcome = if matches!(failure, AdapterError::Timeout(_)) {
                CallOutcome::Timeout
            } else {
                CallOutcome::Failure
            };
            self.calls.record(service, call_outcome, elapsed);

            let mut classified = self.classifier.classify(&failure, service, None);
            classified.retry_count = attempt;
            let opened = self.breakers.record_failure(service);
            log_failure(&classified, attempt, started);
            self.history.record(classified.clone());
            if opened {
                self.alert_circuit_open(service).await;
            }

            if !cold_start && self.should_retry_with(&classified, config) {
                let delay = backoff(attempt, config);
                debug!(
                    service,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if failure.is_not_ready() && !cold_start && !self.breakers.is_open(service) {
                cold_start = true;
                info!(
                    service,
                    timeout_secs = self.policy.cold_start_timeout.as_secs(),
                    "service not ready; waiting out cold start"
                );
                continue;
            }

            self.alert_failure(&classified).await;
            return Err(ResilienceError::Service(classified));
        }
    }

    async fn alert_circuit_open(&self, service: &str) {
        let Some(alerter) = &self.alerter else {
            return;
        };
        let failures = self
            .breakers
            .snapshot()
            .get(service)
            .map_or(0, |snapshot| snapshot.consecutive_failures);
        alerter
            .on_circuit_open(service, failures, self.breakers.config().cooldown)
            .await;
    }

    async fn alert_failure(&self, error: &ServiceError) {
        let Some(alerter) = &self.alerter else {
            return;
        };
        alerter
            .on_error(error, self.classifier.is_critical(&error.service))
            .await;

        let window = chrono::Duration::from_std(alerter.config().window)
            .unwrap_or_else(|_| chrono::Duration::minutes(MAX_WINDOW_MINUTES));
        alerter.on_error_stats(&self.history.stats(None, window)).await;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn log_failure(error: &ServiceError, attempt: u32, started: Instant) {
    let elapsed_ms = elapsed_ms(started);
    let kind = error.kind.label();
    let severity = error.severity.label();
    match error.severity {
        Severity::Critical | Severity::High => error!(
            service = %error.service,
            kind,
            severity,
            attempt,
            elapsed_ms,
            status_code = error.status_code,
            message = %error.message,
            "service call failed"
        ),
        Severity::Medium => warn!(
            service = %error.service,
            kind,
            severity,
            attempt,
            elapsed_ms,
            status_code = error.status_code,
            message = %error.message,
            "service call failed"
        ),
        Severity::Low => info!(
            service = %error.service,
            kind,
            severity,
            attempt,
            elapsed_ms,
            status_code = error.status_code,
            message = %error.message,
            "service call failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> ResiliencePolicy {
        ResiliencePolicy {
            retry: RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
                exponential_base: 2.0,
                jitter: false,
            },
            breaker: BreakerConfig {
                failure_threshold: 3,
                cooldown: Duration::from_secs(60),
            },
            call_timeout: Duration::from_secs(5),
            cold_start_timeout: Duration::from_secs(20),
            critical_services: vec!["record_store".to_string()],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let context = ResilienceContext::new(policy());
        let calls = AtomicU32::new(0);

        let value = context
            .wrap("messaging", &context.policy().retry.clone(), || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(AdapterError::Connection("reset".into()))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(context.breakers().status("messaging"), BreakerStatus::Closed);
        assert_eq!(context.history().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failures_are_not_retried() {
        let context = ResilienceContext::new(policy());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = context
            .wrap("case_management", &policy().retry, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(AdapterError::Http {
                        status: 401,
                        message: "token expired".into(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(ResilienceError::Service(error)) => assert_eq!(error.kind, ErrorKind::Auth),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_ceiling_counts_total_attempts() {
        let context = ResilienceContext::new(policy());
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 1,
            ..policy().retry
        };

        let result: Result<(), _> = context
            .wrap("object_storage", &config, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::Http { status: 502, message: "bad gateway".into() }) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(ResilienceError::Service(error)) => {
                assert_eq!(error.retry_count, 1);
                assert_eq!(error.kind, ErrorKind::Server);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_fails_fast_without_calling() {
        let context = ResilienceContext::new(policy());
        let calls = AtomicU32::new(0);

        let first: Result<(), _> = context
            .wrap("messaging", &policy().retry, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AdapterError::Connection("down".into())) }
            })
            .await;
        assert!(matches!(first, Err(ResilienceError::Service(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(context.breakers().is_open("messaging"));

        let second: Result<(), _> = context
            .wrap("messaging", &policy().retry, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(second, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let context = ResilienceContext::new(policy());
        let config = RetryConfig {
            max_retries: 0,
            ..policy().retry
        };

        let result: Result<(), _> = context
            .wrap("artifact_generator", &config, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;

        match result {
            Err(ResilienceError::Service(error)) => assert_eq!(error.kind, ErrorKind::Timeout),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_gets_one_extended_attempt() {
        let context = ResilienceContext::new(policy());
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_retries: 0,
            ..policy().retry
        };

        let value = context
            .wrap("artifact_generator", &config, || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(AdapterError::NotReady("warming up".into()))
                    } else {
                        // Longer than the call timeout, inside the cold-start one.
                        tokio::time::sleep(Duration::from_secs(12)).await;
                        Ok(vec![1_u8, 2, 3])
                    }
                }
            })
            .await
            .expect("cold start attempt succeeds");

        assert_eq!(value, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn should_retry_respects_kind_ceiling_and_breaker() {
        let context = ResilienceContext::new(policy());
        let mut error = context.classify_error(
            &AdapterError::Http {
                status: 404,
                message: "missing".into(),
            },
            "messaging",
            None,
        );
        assert!(context.should_retry(&error));

        error.retry_count = 2;
        assert!(!context.should_retry(&error));

        let validation =
            context.classify_error(&AdapterError::Validation("bad".into()), "messaging", None);
        assert!(!context.should_retry(&validation));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_breakers_and_history() {
        let context = ResilienceContext::new(policy());
        for _ in 0..3 {
            context.breakers().record_failure("messaging");
        }
        context.history().record(context.classify_error(
            &AdapterError::Other("x".into()),
            "messaging",
            None,
        ));

        context.reset();
        assert!(!context.breakers().is_open("messaging"));
        assert!(context.history().is_empty());
        let report = context.report(None, chrono::Duration::hours(1));
        assert_eq!(report.errors.total_errors, 0);
        assert!(report.breakers.is_empty());
    }
    #[tokio::test(start_paused = true)]
    async fn abandoned_half_open_call_does_not_wedge_the_breaker() {
        let context = ResilienceContext::new(policy());
        for _ in 0..3 {
            context.breakers().record_failure("messaging");
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            context.wrap("messaging", &policy().retry, || {
                std::future::pending::<Result<(), AdapterError>>()
            }),
        )
        .await;
        assert!(abandoned.is_err(), "half-open call should still be pending");
        assert_eq!(context.breakers().status("messaging"), BreakerStatus::HalfOpen);

        let recovered: Result<u8, _> = context
            .wrap("messaging", &policy().retry, || async { Ok(7) })
            .await;
        assert_eq!(recovered, Ok(7));
        assert_eq!(context.breakers().status("messaging"), BreakerStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn report_carries_per_service_call_stats() {
        let context = ResilienceContext::new(policy());
        let calls = AtomicU32::new(0);

        let _: Result<(), _> = context
            .wrap("object_storage", &policy().retry, || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(AdapterError::Timeout(Duration::from_secs(5)))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        let report = context.report(None, chrono::Duration::minutes(60));
        let storage = report.calls.get("object_storage").expect("storage tracked");
        assert_eq!(storage.requests, 2);
        assert_eq!(storage.successes, 1);
        assert_eq!(storage.timeouts, 1);
        assert_eq!(storage.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trip_and_auth_failure_alert_operations() {
        use crate::workflows::triage::adapters::memory::MemoryMessaging;
        use crate::workflows::triage::domain::Recipient;
        use std::sync::Arc;

        let ops = Arc::new(MemoryMessaging::default());
        let alerter = OpsAlerter::new(
            AlertConfig {
                recipients: vec![Recipient {
                    name: "On call".to_string(),
                    address: "+5511900000000".to_string(),
                }],
                ..AlertConfig::default()
            },
            ops.clone(),
        );
        let context = ResilienceContext::new(policy()).with_alerter(alerter);

        let _: Result<(), _> = context
            .wrap("object_storage", &policy().retry, || async {
                Err(AdapterError::Connection("down".into()))
            })
            .await;
        let _: Result<(), _> = context
            .wrap("case_management", &policy().retry, || async {
                Err(AdapterError::Http {
                    status: 401,
                    message: "token expired".into(),
                })
            })
            .await;

        let sent: Vec<String> = ops.sent().into_iter().map(|(_, text)| text).collect();
        assert_eq!(sent.len(), 2, "{sent:?}");
        assert!(sent[0].starts_with("CIRCUIT OPEN - OBJECT_STORAGE"));
        assert!(sent[1].starts_with("AUTHENTICATION FAILURE - CASE_MANAGEMENT"));
        assert!(context
            .alerter()
            .is_some_and(|alerter| alerter.cooling_down(AlertKind::CircuitOpen, "object_storage")));
    }
}
