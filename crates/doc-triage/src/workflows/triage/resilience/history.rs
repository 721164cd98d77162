use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::error::{ErrorKind, ServiceError, Severity};

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
/// Widest stats window served; longer requests are clamped to it.
pub const MAX_WINDOW_MINUTES: i64 = 30 * 24 * 60;

/// Aggregate over the errors recorded inside a time window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorStats {
    pub total_errors: usize,
    pub window_minutes: i64,
    pub by_service: BTreeMap<String, usize>,
    pub by_kind: BTreeMap<ErrorKind, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub most_recent: Option<ServiceError>,
}

/// Bounded ring of classified errors; oldest entries fall off first.
#[derive(Debug)]
pub struct ErrorHistory {
    capacity: usize,
    entries: Mutex<VecDeque<ServiceError>>,
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ErrorHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, error: ServiceError) {
        let mut entries = self.entries.lock().expect("error history poisoned");
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(error);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("error history poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("error history poisoned").clear();
    }

    pub fn stats(&self, service: Option<&str>, window: Duration) -> ErrorStats {
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let entries = self.entries.lock().expect("error history poisoned");

        let mut stats = ErrorStats {
            window_minutes: window.num_minutes(),
            ..ErrorStats::default()
        };
        for error in entries
            .iter()
            .filter(|error| error.timestamp >= cutoff)
            .filter(|error| service.map_or(true, |name| error.service == name))
        {
            stats.total_errors += 1;
            *stats.by_service.entry(error.service.clone()).or_default() += 1;
            *stats.by_kind.entry(error.kind).or_default() += 1;
            *stats.by_severity.entry(error.severity).or_default() += 1;
            stats.most_recent = Some(error.clone());
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(service: &str, kind: ErrorKind, minutes_ago: i64) -> ServiceError {
        ServiceError {
            service: service.to_string(),
            kind,
            severity: Severity::Medium,
            message: "failed".to_string(),
            status_code: None,
            retry_count: 0,
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn drops_oldest_entries_past_capacity() {
        let history = ErrorHistory::with_capacity(2);
        history.record(error("a", ErrorKind::Timeout, 0));
        history.record(error("b", ErrorKind::Timeout, 0));
        history.record(error("c", ErrorKind::Timeout, 0));

        assert_eq!(history.len(), 2);
        let stats = history.stats(None, Duration::hours(1));
        assert!(!stats.by_service.contains_key("a"));
        assert_eq!(stats.most_recent.map(|e| e.service), Some("c".to_string()));
    }

    #[test]
    fn stats_respect_window_and_service_filter() {
        let history = ErrorHistory::default();
        history.record(error("messaging", ErrorKind::Timeout, 90));
        history.record(error("messaging", ErrorKind::Server, 5));
        history.record(error("object_storage", ErrorKind::Connection, 5));

        let all = history.stats(None, Duration::hours(1));
        assert_eq!(all.total_errors, 2);
        assert_eq!(all.window_minutes, 60);
        assert_eq!(all.by_kind.get(&ErrorKind::Server), Some(&1));

        let messaging = history.stats(Some("messaging"), Duration::hours(2));
        assert_eq!(messaging.total_errors, 2);
        assert_eq!(messaging.by_service.len(), 1);
    }
}
