use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::workflows::triage::orchestrator::{PhaseIds, PipelineSettings};
use crate::workflows::triage::resilience::{
    AlertConfig, BreakerConfig, ResiliencePolicy, RetryConfig,
};
use crate::workflows::triage::Recipient;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub pipeline: PipelineSettings,
    pub resilience: ResiliencePolicy,
    pub alerts: AlertConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(&var_or("APP_ENV", "development"));

        let host = var_or("APP_HOST", "127.0.0.1");
        let port = var_or("APP_PORT", "3000")
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = var_or("APP_LOG_LEVEL", "info");

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            pipeline: load_pipeline(),
            resilience: load_resilience()?,
            alerts: load_alerts()?,
        })
    }
}

fn load_pipeline() -> PipelineSettings {
    let defaults = PipelineSettings::default();
    PipelineSettings {
        phases: PhaseIds {
            pending_documents: var_or(
                "PHASE_ID_PENDING_DOCUMENTS",
                &defaults.phases.pending_documents,
            ),
            emit_documents: var_or("PHASE_ID_EMIT_DOCUMENTS", &defaults.phases.emit_documents),
            approved: var_or("PHASE_ID_APPROVED", &defaults.phases.approved),
        },
        report_field: var_or("FIELD_ID_REPORT", &defaults.report_field),
        approval_field: var_or("FIELD_ID_APPROVAL", &defaults.approval_field),
        fallback_recipient: env::var("NOTIFY_FALLBACK_RECIPIENT")
            .ok()
            .and_then(|raw| parse_recipient(&raw)),
    }
}

fn load_resilience() -> Result<ResiliencePolicy, ConfigError> {
    let defaults = ResiliencePolicy::default();

    let retry = RetryConfig {
        max_retries: parse_var("RETRY_MAX_RETRIES", defaults.retry.max_retries)?,
        base_delay: Duration::from_millis(parse_var("RETRY_BASE_DELAY_MS", 1000_u64)?),
        max_delay: Duration::from_millis(parse_var("RETRY_MAX_DELAY_MS", 60_000_u64)?),
        exponential_base: parse_var("RETRY_EXPONENTIAL_BASE", defaults.retry.exponential_base)?,
        jitter: parse_flag("RETRY_JITTER", defaults.retry.jitter)?,
    };
    if !(retry.exponential_base.is_finite() && retry.exponential_base >= 1.0) {
        return Err(ConfigError::InvalidValue {
            key: "RETRY_EXPONENTIAL_BASE",
            value: retry.exponential_base.to_string(),
        });
    }

    let breaker = BreakerConfig {
        failure_threshold: parse_var(
            "BREAKER_FAILURE_THRESHOLD",
            defaults.breaker.failure_threshold,
        )?
        .max(1),
        cooldown: Duration::from_secs(parse_var("BREAKER_COOLDOWN_SECS", 300_u64)?),
    };

    let critical_services = match env::var("CRITICAL_SERVICES") {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|service| !service.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => defaults.critical_services,
    };

    Ok(ResiliencePolicy {
        retry,
        breaker,
        call_timeout: Duration::from_secs(parse_var("CALL_TIMEOUT_SECS", 30_u64)?),
        cold_start_timeout: Duration::from_secs(parse_var("COLD_START_TIMEOUT_SECS", 120_u64)?),
        critical_services,
    })
}

fn load_alerts() -> Result<AlertConfig, ConfigError> {
    let defaults = AlertConfig::default();

    let recipients = match env::var("OPS_ALERT_RECIPIENTS") {
        Ok(raw) => raw.split(',').filter_map(parse_recipient).collect(),
        Err(_) => defaults.recipients,
    };

    Ok(AlertConfig {
        enabled: parse_flag("OPS_ALERTS_ENABLED", defaults.enabled)?,
        recipients,
        cooldown: Duration::from_secs(60 * parse_var("OPS_ALERT_COOLDOWN_MINUTES", 30_u64)?),
        error_count_threshold: parse_var(
            "OPS_ALERT_ERROR_THRESHOLD",
            defaults.error_count_threshold,
        )?,
        window: Duration::from_secs(60 * parse_var("OPS_ALERT_WINDOW_MINUTES", 15_u64)?),
    })
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn parse_flag(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { key, value: raw }),
        },
        Err(_) => Ok(default),
    }
}

/// `name:address` or a bare address.
fn parse_recipient(raw: &str) -> Option<Recipient> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (name, address) = match raw.split_once(':') {
        Some((name, address)) if !address.trim().is_empty() => (name.trim(), address.trim()),
        _ => ("fallback", raw),
    };
    Some(Recipient {
        name: name.to_string(),
        address: address.to_string(),
    })
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidValue { key, value } => {
                write!(f, "{key} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidValue { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
