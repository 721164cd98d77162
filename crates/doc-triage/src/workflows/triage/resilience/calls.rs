use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latency samples kept per service for the running average.
const LATENCY_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// Short-circuited by an open breaker; no attempt was made.
    Rejected,
}

impl CallOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::Failure => "failure",
            CallOutcome::Timeout => "timeout",
            CallOutcome::Rejected => "rejected",
        }
    }
}

/// Per-service view of every attempt made through the resilience layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceCallStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub rejected: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub avg_response_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ServiceCalls {
    stats: ServiceCallStats,
    latencies_ms: VecDeque<f64>,
}

impl ServiceCalls {
    fn record(&mut self, outcome: CallOutcome, elapsed: Duration) {
        let now = Utc::now();
        let stats = &mut self.stats;

        if outcome == CallOutcome::Rejected {
            stats.rejected += 1;
            return;
        }

        stats.requests += 1;
        match outcome {
            CallOutcome::Success => {
                stats.successes += 1;
                stats.consecutive_failures = 0;
                stats.last_success = Some(now);
            }
            CallOutcome::Failure | CallOutcome::Timeout => {
                stats.failures += 1;
                if outcome == CallOutcome::Timeout {
                    stats.timeouts += 1;
                }
                stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
                stats.last_failure = Some(now);
            }
            CallOutcome::Rejected => {}
        }
        stats.success_rate = stats.successes as f64 / stats.requests as f64;

        if self.latencies_ms.len() == LATENCY_SAMPLES {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(elapsed.as_secs_f64() * 1000.0);
        stats.avg_response_ms =
            self.latencies_ms.iter().sum::<f64>() / self.latencies_ms.len() as f64;
    }
}

/// Call counters kept in process and mirrored to the `metrics` recorder.
#[derive(Debug, Default)]
pub struct CallMetrics {
    services: Mutex<BTreeMap<String, ServiceCalls>>,
}

impl CallMetrics {
    pub fn record(&self, service: &str, outcome: CallOutcome, elapsed: Duration) {
        metrics::counter!(
            "triage_adapter_calls_total",
            "service" => service.to_string(),
            "outcome" => outcome.label()
        )
        .increment(1);
        if outcome != CallOutcome::Rejected {
            metrics::histogram!(
                "triage_adapter_call_duration_seconds",
                "service" => service.to_string()
            )
            .record(elapsed.as_secs_f64());
        }

        self.services
            .lock()
            .expect("call metrics poisoned")
            .entry(service.to_string())
            .or_default()
            .record(outcome, elapsed);
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceCallStats> {
        self.services
            .lock()
            .expect("call metrics poisoned")
            .iter()
            .map(|(service, calls)| (service.clone(), calls.stats.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.services.lock().expect("call metrics poisoned").clear();
    }
}
