//! Operations-team alerts raised by the resilience layer.
//!
//! Alerts go straight to the messaging adapter, outside [`super::ResilienceContext::wrap`],
//! so an alert about a failing service never feeds back into its own breaker.
//! Each alert key is rate-limited by a cooldown.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::super::adapters::Messaging;
use super::super::domain::Recipient;
use super::error::{ErrorKind, ServiceError, Severity};
use super::history::ErrorStats;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertConfig {
    pub enabled: bool,
    pub recipients: Vec<Recipient>,
    /// Minimum gap between two alerts sharing a key.
    pub cooldown: Duration,
    /// Errors inside `window` that count as a high error rate.
    pub error_count_threshold: usize,
    pub window: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recipients: Vec::new(),
            cooldown: Duration::from_secs(30 * 60),
            error_count_threshold: 10,
            window: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CriticalError,
    AuthenticationFailure,
    ServiceDown,
    CircuitOpen,
    HighErrorRate,
}

impl AlertKind {
    pub const fn label(self) -> &'static str {
        match self {
            AlertKind::CriticalError => "critical_error",
            AlertKind::AuthenticationFailure => "authentication_failure",
            AlertKind::ServiceDown => "service_down",
            AlertKind::CircuitOpen => "circuit_open",
            AlertKind::HighErrorRate => "high_error_rate",
        }
    }
}

/// Sends cooled-down alerts to the configured operations recipients.
pub struct OpsAlerter {
    config: AlertConfig,
    messaging: Arc<dyn Messaging>,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl std::fmt::Debug for OpsAlerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsAlerter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OpsAlerter {
    pub fn new(config: AlertConfig, messaging: Arc<dyn Messaging>) -> Self {
        Self {
            config,
            messaging,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Alert on a terminal failure. Critical severity wins over auth, which
    /// wins over an outage of a critical service.
    pub async fn on_error(&self, error: &ServiceError, critical_service: bool) -> bool {
        let kind = if error.severity == Severity::Critical {
            AlertKind::CriticalError
        } else if error.kind == ErrorKind::Auth {
            AlertKind::AuthenticationFailure
        } else if critical_service
            && matches!(
                error.kind,
                ErrorKind::Connection | ErrorKind::Server | ErrorKind::Timeout
            )
        {
            AlertKind::ServiceDown
        } else {
            return false;
        };

        let text = error_message(kind, error);
        self.raise(kind, &error.service, &text).await
    }

    pub async fn on_circuit_open(&self, service: &str, failures: u32, cooldown: Duration) -> bool {
        let text = format!(
            "CIRCUIT OPEN - {}\nConsecutive failures: {failures}\nCalls suspended for {}s.\nCheck the service before calls resume.",
            service.to_ascii_uppercase(),
            cooldown.as_secs(),
        );
        self.raise(AlertKind::CircuitOpen, service, &text).await
    }

    pub async fn on_error_stats(&self, stats: &ErrorStats) -> bool {
        if stats.total_errors < self.config.error_count_threshold {
            return false;
        }

        let mut text = format!(
            "HIGH ERROR RATE\n{} errors in the last {} minutes\n",
            stats.total_errors, stats.window_minutes
        );
        for (service, count) in &stats.by_service {
            let _ = writeln!(text, "- {service}: {count}");
        }
        self.raise(AlertKind::HighErrorRate, "all", &text).await
    }

    /// Whether `kind` for `scope` would currently be suppressed.
    pub fn cooling_down(&self, kind: AlertKind, scope: &str) -> bool {
        let key = alert_key(kind, scope);
        let last_sent = self.last_sent.lock().expect("alert ledger poisoned");
        last_sent
            .get(&key)
            .is_some_and(|at| at.elapsed() < self.config.cooldown)
    }

    async fn raise(&self, kind: AlertKind, scope: &str, text: &str) -> bool {
        if !self.config.enabled || self.config.recipients.is_empty() {
            return false;
        }
        if self.cooling_down(kind, scope) {
            info!(alert = kind.label(), scope, "alert suppressed by cooldown");
            return false;
        }

        let mut delivered = 0;
        for recipient in &self.config.recipients {
            match self.messaging.send(recipient, text).await {
                Ok(receipt) if receipt.success => delivered += 1,
                Ok(_) => warn!(alert = kind.label(), recipient = %recipient.address, "alert not delivered"),
                Err(err) => {
                    warn!(alert = kind.label(), recipient = %recipient.address, error = %err, "alert send failed")
                }
            }
        }

        if delivered == 0 {
            return false;
        }
        self.last_sent
            .lock()
            .expect("alert ledger poisoned")
            .insert(alert_key(kind, scope), Instant::now());
        warn!(alert = kind.label(), scope, delivered, "operations alert sent");
        true
    }
}

fn alert_key(kind: AlertKind, scope: &str) -> String {
    format!("{}:{scope}", kind.label())
}

fn error_message(kind: AlertKind, error: &ServiceError) -> String {
    let title = match kind {
        AlertKind::CriticalError => "CRITICAL ERROR",
        AlertKind::AuthenticationFailure => "AUTHENTICATION FAILURE",
        _ => "SERVICE DOWN",
    };
    let mut text = format!(
        "{title} - {}\nKind: {}\nSeverity: {}\nMessage: {}\nTime: {}\n",
        error.service.to_ascii_uppercase(),
        error.kind,
        error.severity,
        error.message,
        error.timestamp.format("%H:%M:%S"),
    );
    if let Some(status) = error.status_code {
        let _ = writeln!(text, "Status code: {status}");
    }
    text.push_str(match kind {
        AlertKind::AuthenticationFailure => "Check credentials and API configuration.",
        AlertKind::ServiceDown => "Check the external service status.",
        _ => "Needs immediate attention from operations.",
    });
    text
}
