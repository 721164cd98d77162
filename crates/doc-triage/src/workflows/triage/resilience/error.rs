use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::super::adapters::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Connection,
    Http,
    Auth,
    RateLimit,
    Server,
    Client,
    Validation,
    Unknown,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Http => "http",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Server => "server",
            ErrorKind::Client => "client",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn label(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub const fn escalate(self) -> Self {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classified failure of one call to an external service.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{service} {kind} error ({severity}): {message}")]
pub struct ServiceError {
    pub service: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub status_code: Option<u16>,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Maps adapter failures onto kind and severity.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    critical_services: BTreeSet<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(["record_store", "database"])
    }
}

impl ErrorClassifier {
    pub fn new<I, S>(critical_services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            critical_services: critical_services
                .into_iter()
                .map(|service| service.as_ref().trim().to_ascii_lowercase())
                .filter(|service| !service.is_empty())
                .collect(),
        }
    }

    pub fn is_critical(&self, service: &str) -> bool {
        self.critical_services
            .contains(&service.trim().to_ascii_lowercase())
    }

    /// `status_code` overrides the status carried by the failure itself.
    pub fn classify(
        &self,
        failure: &AdapterError,
        service: &str,
        status_code: Option<u16>,
    ) -> ServiceError {
        let status_code = status_code.or_else(|| failure.status_code());

        let (kind, severity) = match failure {
            AdapterError::Timeout(_) => (ErrorKind::Timeout, Severity::Medium),
            AdapterError::Connection(_) => (ErrorKind::Connection, Severity::High),
            AdapterError::Http { .. } | AdapterError::NotReady(_) => match status_code {
                Some(401) => (ErrorKind::Auth, Severity::High),
                Some(429) => (ErrorKind::RateLimit, Severity::Medium),
                Some(status) if (400..500).contains(&status) => (ErrorKind::Client, Severity::Low),
                Some(status) if (500..600).contains(&status) => (ErrorKind::Server, Severity::High),
                _ => (ErrorKind::Http, Severity::Medium),
            },
            AdapterError::Storage(_) => (ErrorKind::Server, Severity::High),
            AdapterError::Validation(_) => (ErrorKind::Validation, Severity::Low),
            AdapterError::Other(_) => (ErrorKind::Unknown, Severity::Medium),
        };

        let severity = if self.is_critical(service) {
            severity.escalate()
        } else {
            severity
        };

        ServiceError {
            service: service.to_string(),
            kind,
            severity,
            message: failure.to_string(),
            status_code,
            retry_count: 0,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn http(status: u16) -> AdapterError {
        AdapterError::Http {
            status,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn maps_failures_to_kind_and_severity() {
        let classifier = ErrorClassifier::default();
        let cases = [
            (AdapterError::Timeout(Duration::from_secs(30)), ErrorKind::Timeout, Severity::Medium),
            (AdapterError::Connection("refused".into()), ErrorKind::Connection, Severity::High),
            (http(401), ErrorKind::Auth, Severity::High),
            (http(429), ErrorKind::RateLimit, Severity::Medium),
            (http(404), ErrorKind::Client, Severity::Low),
            (http(502), ErrorKind::Server, Severity::High),
            (AdapterError::Validation("bad".into()), ErrorKind::Validation, Severity::Low),
            (AdapterError::Other("??".into()), ErrorKind::Unknown, Severity::Medium),
        ];

        for (failure, kind, severity) in cases {
            let error = classifier.classify(&failure, "messaging", None);
            assert_eq!((error.kind, error.severity), (kind, severity), "{failure}");
        }
    }

    #[test]
    fn explicit_status_code_takes_precedence() {
        let classifier = ErrorClassifier::default();
        let error = classifier.classify(&http(500), "case_management", Some(429));
        assert_eq!(error.kind, ErrorKind::RateLimit);
        assert_eq!(error.status_code, Some(429));
    }

    #[test]
    fn critical_services_escalate_one_level() {
        let classifier = ErrorClassifier::default();
        let timeout = AdapterError::Timeout(Duration::from_secs(1));

        assert_eq!(
            classifier.classify(&timeout, "record_store", None).severity,
            Severity::High
        );
        assert_eq!(
            classifier
                .classify(&AdapterError::Connection("down".into()), "Record_Store", None)
                .severity,
            Severity::Critical
        );
        assert_eq!(
            classifier.classify(&timeout, "messaging", None).severity,
            Severity::Medium
        );
    }
}
