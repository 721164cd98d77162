use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default)]
struct BreakerState {
    consecutive_failures: u32,
    reopen_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn status(&self, now: Instant) -> BreakerStatus {
        match self.reopen_at {
            None => BreakerStatus::Closed,
            Some(at) if now < at => BreakerStatus::Open,
            Some(_) => BreakerStatus::HalfOpen,
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Cooldown elapsed; this call decides whether the breaker closes.
    Trial,
    Rejected { retry_after: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
    pub retry_after_ms: Option<u64>,
}

/// Per-service circuit breakers, created lazily on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<Mutex<BreakerState>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    fn entry(&self, service: &str) -> Arc<Mutex<BreakerState>> {
        if let Some(state) = self
            .breakers
            .read()
            .expect("breaker registry poisoned")
            .get(service)
        {
            return Arc::clone(state);
        }

        let mut guard = self.breakers.write().expect("breaker registry poisoned");
        Arc::clone(guard.entry(service.to_string()).or_default())
    }

    pub fn admit(&self, service: &str) -> Admission {
        let entry = self.entry(service);
        let mut state = entry.lock().expect("breaker state poisoned");
        let now = Instant::now();

        match state.status(now) {
            BreakerStatus::Closed => Admission::Allowed,
            BreakerStatus::Open => Admission::Rejected {
                retry_after: state
                    .reopen_at
                    .map(|at| at.saturating_duration_since(now))
                    .unwrap_or_default(),
            },
            BreakerStatus::HalfOpen if state.trial_in_flight => Admission::Rejected {
                retry_after: Duration::ZERO,
            },
            BreakerStatus::HalfOpen => {
                state.trial_in_flight = true;
                info!(service, "circuit half-open; admitting a trial call");
                Admission::Trial
            }
        }
    }

    pub fn record_success(&self, service: &str) {
        let entry = self.entry(service);
        let mut state = entry.lock().expect("breaker state poisoned");
        if state.reopen_at.is_some() {
            info!(service, "circuit closed");
        }
        *state = BreakerState::default();
    }

    /// Returns `true` when this failure opened (or re-opened) the breaker.
    pub fn record_failure(&self, service: &str) -> bool {
        let entry = self.entry(service);
        let mut state = entry.lock().expect("breaker state poisoned");
        let now = Instant::now();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if state.trial_in_flight {
            state.trial_in_flight = false;
            state.reopen_at = Some(now + self.config.cooldown);
            warn!(service, "trial call failed; circuit re-opened");
            return true;
        }

        if state.reopen_at.is_none() && state.consecutive_failures >= self.config.failure_threshold
        {
            state.reopen_at = Some(now + self.config.cooldown);
            warn!(
                service,
                failures = state.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit opened"
            );
            return true;
        }

        false
    }

    /// Give back an admitted trial call that never reported; the next call takes the slot.
    pub fn release_trial(&self, service: &str) {
        let entry = self.entry(service);
        let mut state = entry.lock().expect("breaker state poisoned");
        if state.trial_in_flight {
            state.trial_in_flight = false;
            warn!(service, "trial call abandoned before completion");
        }
    }

    /// Open and still cooling down; never changes state.
    pub fn is_open(&self, service: &str) -> bool {
        self.status(service) == BreakerStatus::Open
    }

    pub fn status(&self, service: &str) -> BreakerStatus {
        let guard = self.breakers.read().expect("breaker registry poisoned");
        match guard.get(service) {
            Some(entry) => entry
                .lock()
                .expect("breaker state poisoned")
                .status(Instant::now()),
            None => BreakerStatus::Closed,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, BreakerSnapshot> {
        let now = Instant::now();
        let guard = self.breakers.read().expect("breaker registry poisoned");
        guard
            .iter()
            .map(|(service, entry)| {
                let state = entry.lock().expect("breaker state poisoned");
                let status = state.status(now);
                let retry_after_ms = match status {
                    BreakerStatus::Open => state.reopen_at.map(|at| {
                        u64::try_from(at.saturating_duration_since(now).as_millis())
                            .unwrap_or(u64::MAX)
                    }),
                    _ => None,
                };
                (
                    service.clone(),
                    BreakerSnapshot {
                        status,
                        consecutive_failures: state.consecutive_failures,
                        retry_after_ms,
                    },
                )
            })
            .collect()
    }

    pub fn reset(&self) {
        self.breakers
            .write()
            .expect("breaker registry poisoned")
            .clear();
    }
}

/// Releases an admitted trial call on drop unless the call reported an outcome.
#[must_use]
pub struct TrialGuard<'a> {
    registry: &'a CircuitBreakerRegistry,
    service: &'a str,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    pub fn new(registry: &'a CircuitBreakerRegistry, service: &'a str) -> Self {
        Self {
            registry,
            service,
            armed: true,
        }
    }

    /// The trial call's outcome was recorded.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release_trial(self.service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(BreakerConfig {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn opens_on_the_threshold_failure() {
        let breakers = registry();
        assert!(!breakers.record_failure("messaging"));
        assert!(!breakers.record_failure("messaging"));
        assert_eq!(breakers.admit("messaging"), Admission::Allowed);
        assert!(breakers.record_failure("messaging"));

        assert!(breakers.is_open("messaging"));
        assert!(matches!(
            breakers.admit("messaging"),
            Admission::Rejected { .. }
        ));
        assert_eq!(breakers.admit("object_storage"), Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_streak() {
        let breakers = registry();
        breakers.record_failure("messaging");
        breakers.record_failure("messaging");
        breakers.record_success("messaging");
        assert!(!breakers.record_failure("messaging"));
        assert_eq!(breakers.status("messaging"), BreakerStatus::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_a_single_trial_call_after_cooldown() {
        let breakers = registry();
        for _ in 0..3 {
            breakers.record_failure("messaging");
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breakers.status("messaging"), BreakerStatus::HalfOpen);
        assert_eq!(breakers.admit("messaging"), Admission::Trial);
        assert!(matches!(
            breakers.admit("messaging"),
            Admission::Rejected { .. }
        ));

        breakers.record_success("messaging");
        assert_eq!(breakers.admit("messaging"), Admission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_guard_frees_the_half_open_slot() {
        let breakers = registry();
        for _ in 0..3 {
            breakers.record_failure("messaging");
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(breakers.admit("messaging"), Admission::Trial);
        drop(TrialGuard::new(&breakers, "messaging"));
        assert_eq!(breakers.admit("messaging"), Admission::Trial);

        TrialGuard::new(&breakers, "messaging").disarm();
        assert!(matches!(
            breakers.admit("messaging"),
            Admission::Rejected { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_call_restarts_the_cooldown() {
        let breakers = registry();
        for _ in 0..3 {
            breakers.record_failure("messaging");
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breakers.admit("messaging"), Admission::Trial);
        assert!(breakers.record_failure("messaging"));
        assert!(breakers.is_open("messaging"));

        let snapshot = breakers.snapshot();
        let messaging = snapshot.get("messaging").expect("tracked service");
        assert_eq!(messaging.status, BreakerStatus::Open);
        assert_eq!(messaging.retry_after_ms, Some(60_000));
    }
}
