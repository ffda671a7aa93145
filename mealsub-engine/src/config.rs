//! Engine configuration.
//!
//! TOML-deserializable settings for the settlement coordinator and the HTTP
//! backends. Every field has a default, so an empty document is valid.
//!
//! # Examples
//!
//! ```
//! use mealsub_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_toml(
//!     r#"
//!     currency = "INR"
//!
//!     [payment]
//!     timeout_secs = 120
//! "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.payment.timeout_secs, 120);
//! assert_eq!(config.max_person_count, 10);
//! ```

use std::{path::Path, time::Duration};

use serde::Deserialize;
use url::Url;

use crate::{
    error::{EngineError, Result},
    reliability::RetryPolicy,
};

const MAX_PAYMENT_TIMEOUT_SECS: u64 = 1800;
const MAX_STORE_TIMEOUT_SECS: u64 = 300;

/// Root engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// ISO 4217 currency code passed to the payment provider.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Upper bound for `person_count` on a selection.
    #[serde(default = "default_max_person_count")]
    pub max_person_count: u8,

    /// Payment capture settings.
    #[serde(default)]
    pub payment: PaymentConfig,

    /// Retry settings for store writes.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Remote store settings; absent when running against in-memory backends.
    #[serde(default)]
    pub store: Option<StoreConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            max_person_count: default_max_person_count(),
            payment: PaymentConfig::default(),
            retry: RetryConfig::default(),
            store: None,
        }
    }
}

fn default_currency() -> String {
    "INR".to_owned()
}

fn default_max_person_count() -> u8 {
    10
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigError`] if the document is malformed or
    /// fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigError`] if the file cannot be read or is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    /// Validates bounds and URLs.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConfigError`] describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(EngineError::ConfigError(format!(
                "currency must be a three-letter ISO 4217 code, got '{}'",
                self.currency
            )));
        }

        if self.max_person_count == 0 {
            return Err(EngineError::ConfigError("max_person_count must be at least 1".into()));
        }

        self.payment.validate()?;
        self.retry.validate()?;

        if let Some(ref store) = self.store {
            store.validate()?;
        }

        Ok(())
    }

    /// Payment capture timeout.
    #[must_use]
    pub const fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment.timeout_secs)
    }

    /// Retry policy for store writes.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }
}

/// Payment capture settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentConfig {
    /// Seconds to wait for the provider to report an outcome (default: 300).
    #[serde(default = "default_payment_timeout")]
    pub timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self { timeout_secs: default_payment_timeout() }
    }
}

fn default_payment_timeout() -> u64 {
    300
}

impl PaymentConfig {
    /// Validates the timeout (1-1800 seconds).
    ///
    /// # Errors
    ///
    /// Returns error if the timeout is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 || self.timeout_secs > MAX_PAYMENT_TIMEOUT_SECS {
            return Err(EngineError::ConfigError(format!(
                "payment.timeout_secs must be between 1 and {MAX_PAYMENT_TIMEOUT_SECS}, got {}",
                self.timeout_secs
            )));
        }
        Ok(())
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds (default: 100).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Delay cap in milliseconds (default: 5000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt (default: 2.0).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl RetryConfig {
    /// Validates retry settings.
    ///
    /// # Errors
    ///
    /// Returns error if `max_attempts` is 0, the multiplier is below 1, or the
    /// initial delay exceeds the cap.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::ConfigError("retry.max_attempts must be at least 1".into()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(EngineError::ConfigError(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(EngineError::ConfigError(format!(
                "retry.initial_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Converts to a [`RetryPolicy`].
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Remote subscription store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Base URL of the store API. Must be HTTPS.
    pub base_url: String,

    /// API version prefix (e.g. "/v1").
    #[serde(default)]
    pub api_prefix: String,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,

    /// Endpoint path overrides.
    #[serde(default)]
    pub endpoints: StoreEndpointConfig,
}

fn default_store_timeout() -> u64 {
    30
}

impl StoreConfig {
    /// Validates the base URL, prefix, timeout and endpoint templates.
    ///
    /// # Errors
    ///
    /// Returns error if any setting is invalid.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            EngineError::ConfigError(format!("invalid store.base_url '{}': {e}", self.base_url))
        })?;

        if url.scheme() != "https" {
            return Err(EngineError::ConfigError(format!(
                "store.base_url must use HTTPS, got: {}",
                url.scheme()
            )));
        }

        if !self.api_prefix.is_empty() {
            validate_endpoint_path("api_prefix", &self.api_prefix)?;
        }

        if self.timeout_secs == 0 || self.timeout_secs > MAX_STORE_TIMEOUT_SECS {
            return Err(EngineError::ConfigError(format!(
                "store.timeout_secs must be between 1 and {MAX_STORE_TIMEOUT_SECS}, got {}",
                self.timeout_secs
            )));
        }

        self.endpoints.validate()
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Endpoint path overrides for the remote store.
///
/// Templates containing `{id}` are expanded with the subscription id.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreEndpointConfig {
    /// Subscriptions collection (default: "/subscriptions").
    pub subscriptions: Option<String>,

    /// Single subscription template (default: "/subscriptions/{id}").
    pub subscription: Option<String>,

    /// Lightweight modify template (default: "/subscriptions/{id}/modify").
    pub modify: Option<String>,

    /// Admin status template (default: "/subscriptions/{id}/status").
    pub status: Option<String>,

    /// Admin extension template (default: "/subscriptions/{id}/extend").
    pub extend: Option<String>,

    /// Plan catalog (default: "/plans").
    pub plans: Option<String>,
}

impl StoreEndpointConfig {
    /// Validates endpoint templates.
    ///
    /// # Errors
    ///
    /// Returns error if any endpoint contains invalid patterns.
    pub fn validate(&self) -> Result<()> {
        let endpoints = [
            ("subscriptions", &self.subscriptions),
            ("subscription", &self.subscription),
            ("modify", &self.modify),
            ("status", &self.status),
            ("extend", &self.extend),
            ("plans", &self.plans),
        ];

        for (name, endpoint) in endpoints {
            if let Some(path) = endpoint {
                validate_endpoint_path(name, path)?;
            }
        }

        Ok(())
    }

    /// Subscriptions collection path.
    #[must_use]
    pub fn subscriptions_path(&self) -> String {
        self.subscriptions.clone().unwrap_or_else(|| "/subscriptions".to_owned())
    }

    /// Path of one subscription.
    #[must_use]
    pub fn subscription_path(&self, id: &str) -> String {
        expand(self.subscription.as_deref(), "/subscriptions/{id}", id)
    }

    /// Modify path of one subscription.
    #[must_use]
    pub fn modify_path(&self, id: &str) -> String {
        expand(self.modify.as_deref(), "/subscriptions/{id}/modify", id)
    }

    /// Status path of one subscription.
    #[must_use]
    pub fn status_path(&self, id: &str) -> String {
        expand(self.status.as_deref(), "/subscriptions/{id}/status", id)
    }

    /// Extension path of one subscription.
    #[must_use]
    pub fn extend_path(&self, id: &str) -> String {
        expand(self.extend.as_deref(), "/subscriptions/{id}/extend", id)
    }

    /// Plan catalog path.
    #[must_use]
    pub fn plans_path(&self) -> String {
        self.plans.clone().unwrap_or_else(|| "/plans".to_owned())
    }
}

fn expand(template: Option<&str>, default: &str, id: &str) -> String {
    template.unwrap_or(default).replace("{id}", id)
}

pub(crate) fn validate_endpoint_path(name: &str, path: &str) -> Result<()> {
    if path.contains("..") {
        return Err(EngineError::ConfigError(format!(
            "endpoint '{name}' contains path traversal sequence '..': {path}"
        )));
    }

    if path.contains("//") {
        return Err(EngineError::ConfigError(format!(
            "endpoint '{name}' contains double slash '//': {path}"
        )));
    }

    if !path.starts_with('/') {
        return Err(EngineError::ConfigError(format!(
            "endpoint '{name}' must start with '/': {path}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.currency, "INR");
        assert_eq!(config.max_person_count, 10);
        assert_eq!(config.payment_timeout(), Duration::from_secs(300));
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert!(config.store.is_none());
    }

    #[test]
    fn test_full_document() {
        let config = EngineConfig::from_toml(
            r#"
            currency = "USD"
            max_person_count = 6

            [payment]
            timeout_secs = 60

            [retry]
            max_attempts = 5
            initial_delay_ms = 50
            max_delay_ms = 1000
            backoff_multiplier = 3.0

            [store]
            base_url = "https://api.example.com"
            api_prefix = "/v1"
            timeout_secs = 10

            [store.endpoints]
            subscription = "/subs/{id}"
            plans = "/catalog/plans"
        "#,
        )
        .unwrap();

        assert_eq!(config.currency, "USD");
        assert_eq!(config.max_person_count, 6);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(50));
        assert_eq!(policy.max_delay, Duration::from_secs(1));

        let store = config.store.unwrap();
        assert_eq!(store.timeout(), Duration::from_secs(10));
        assert_eq!(store.endpoints.subscription_path("sub-1"), "/subs/sub-1");
        assert_eq!(store.endpoints.modify_path("sub-1"), "/subscriptions/sub-1/modify");
        assert_eq!(store.endpoints.plans_path(), "/catalog/plans");
        assert_eq!(store.endpoints.subscriptions_path(), "/subscriptions");
    }

    #[test]
    fn test_rejects_out_of_range_payment_timeout() {
        assert!(EngineConfig::from_toml("[payment]\ntimeout_secs = 0").is_err());
        assert!(EngineConfig::from_toml("[payment]\ntimeout_secs = 1801").is_err());
        assert!(EngineConfig::from_toml("[payment]\ntimeout_secs = 1800").is_ok());
    }

    #[test]
    fn test_rejects_zero_retry_attempts() {
        let err = EngineConfig::from_toml("[retry]\nmax_attempts = 0").unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
    }

    #[test]
    fn test_rejects_http_store() {
        let err = EngineConfig::from_toml("[store]\nbase_url = \"http://api.example.com\"")
            .unwrap_err();
        assert!(err.to_string().contains("HTTPS"));
    }

    #[test]
    fn test_rejects_path_traversal_endpoint() {
        let toml = r#"
            [store]
            base_url = "https://api.example.com"

            [store.endpoints]
            extend = "/subscriptions/../admin"
        "#;
        assert!(EngineConfig::from_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_relative_endpoint() {
        assert!(validate_endpoint_path("plans", "plans").is_err());
        assert!(validate_endpoint_path("plans", "/a//b").is_err());
        assert!(validate_endpoint_path("plans", "/plans").is_ok());
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(EngineConfig::from_toml("currancy = \"INR\"").is_err());
    }

    #[test]
    fn test_rejects_bad_currency() {
        assert!(EngineConfig::from_toml("currency = \"rupees\"").is_err());
    }

    #[test]
    fn test_from_file_missing() {
        let err = EngineConfig::from_file("/nonexistent/mealsub.toml").unwrap_err();
        assert!(matches!(err, EngineError::ConfigError(_)));
    }
}
