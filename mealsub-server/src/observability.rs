//! Logging bootstrap and health reporting for the `mealsub` CLI.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

use std::io;

use serde::Serialize;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log format configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable output for operators.
    Pretty,
    /// JSON lines for log aggregation.
    Json,
}

impl LogFormat {
    /// Determines log format from environment.
    ///
    /// Checks `LOG_FORMAT` environment variable:
    /// - `json` => JSON format
    /// - `pretty` or unset => Pretty format
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").unwrap_or_default().to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initializes structured logging.
///
/// `RUST_LOG` filters events (default `warn`, so commands print only their
/// result). Audit events use the `audit` target and can be enabled on their
/// own with `RUST_LOG=audit=info`.
pub fn init_observability(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
    }
}

/// Overall health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every check passed.
    Healthy,
    /// Usable with reduced functionality.
    Degraded,
    /// At least one check failed.
    Unhealthy,
}

/// Result of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckStatus {
    /// Check passed.
    Pass,
    /// Check failed.
    Fail,
    /// Degraded but operational.
    Warn,
}

/// Individual health check result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Check name.
    pub name: String,
    /// Check status.
    pub status: HealthCheckStatus,
    /// Optional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    /// Creates a passing check with a message.
    #[must_use]
    pub fn pass_with_message(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), status: HealthCheckStatus::Pass, message: Some(message.into()) }
    }

    /// Creates a failing check.
    #[must_use]
    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), status: HealthCheckStatus::Fail, message: Some(message.into()) }
    }

    /// Creates a warning.
    #[must_use]
    pub fn warn(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), status: HealthCheckStatus::Warn, message: Some(message.into()) }
    }

    #[cfg(test)]
    fn pass(name: impl Into<String>) -> Self {
        Self { name: name.into(), status: HealthCheckStatus::Pass, message: None }
    }
}

/// Health report printed by `mealsub check`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// CLI version.
    pub version: &'static str,
    /// Individual checks.
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Builds a report, deriving the overall status from `checks`.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        Self { status: Self::compute_status(&checks), version: env!("CARGO_PKG_VERSION"), checks }
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns error if JSON serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Determines overall health status from individual checks.
    #[must_use]
    pub fn compute_status(checks: &[HealthCheck]) -> HealthStatus {
        if checks.iter().any(|c| c.status == HealthCheckStatus::Fail) {
            HealthStatus::Unhealthy
        } else if checks.iter().any(|c| c.status == HealthCheckStatus::Warn) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
