//! Subcommand implementations.
//!
//! Every command is offline: it reads JSON inputs, runs the pure pricing
//! functions and prints JSON to stdout.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use mealsub_engine::{
    EngineConfig,
    settlement::{Quote, price_selection},
    subscriptions::{Plan, ResolvedStatus, Subscription, SubscriptionStatus, resolve_status},
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    cli::{QuoteArgs, StatusArgs},
    observability::{HealthCheck, HealthReport, HealthStatus},
};

/// Input of `mealsub quote`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuoteRequest {
    /// Customer's subscriptions in store order.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Selected catalog plan.
    pub plan: Plan,
    /// People to serve.
    pub person_count: u8,
}

/// One line of `mealsub status` output.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusLine {
    /// Subscription identifier.
    pub id: String,
    /// Status as stored.
    pub stored: SubscriptionStatus,
    /// Status as the customer sees it.
    pub resolved: ResolvedStatus,
    /// Stored or derived end date.
    pub end_date: NaiveDate,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Loads the engine configuration, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("invalid configuration in {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Prices a selection.
pub fn quote(config: &EngineConfig, request: QuoteRequest, now: DateTime<Utc>) -> Result<Quote> {
    let max = config.max_person_count;
    anyhow::ensure!(
        (1..=max).contains(&request.person_count),
        "person_count must be between 1 and {max}, got {}",
        request.person_count
    );

    Ok(price_selection(&request.subscriptions, request.plan, request.person_count, now)?)
}

/// Resolves each subscription's display status.
#[must_use]
pub fn statuses(subscriptions: &[Subscription], now: DateTime<Utc>) -> Vec<StatusLine> {
    subscriptions
        .iter()
        .map(|sub| StatusLine {
            id: sub.id.to_string(),
            stored: sub.status,
            resolved: resolve_status(sub, now),
            end_date: sub.effective_end_date(),
        })
        .collect()
}

/// Runs configuration checks.
#[must_use]
pub fn check(config: &EngineConfig) -> HealthReport {
    let mut checks = Vec::new();

    checks.push(match config.validate() {
        Ok(()) => HealthCheck::pass_with_message("config", "configuration is valid"),
        Err(e) => HealthCheck::fail("config", e.to_string()),
    });

    checks.push(match &config.store {
        Some(store) => {
            HealthCheck::pass_with_message("store", format!("remote store at {}", store.base_url))
        }
        None => HealthCheck::warn("store", "no [store] section; only offline commands are usable"),
    });

    checks.push(HealthCheck::pass_with_message(
        "payment",
        format!("capture timeout {}s, currency {}", config.payment.timeout_secs, config.currency),
    ));

    HealthReport::new(checks)
}

#[instrument(skip_all, fields(request = %args.request.display()))]
pub fn run_quote(config: &EngineConfig, args: &QuoteArgs) -> Result<()> {
    let request: QuoteRequest = read_json(&args.request)?;
    let now = args.now.unwrap_or_else(Utc::now);

    let quote = quote(config, request, now)?;
    info!(action = %quote.action, amount = %quote.charge.amount(), "Quote computed");

    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}

#[instrument(skip_all, fields(subscriptions = %args.subscriptions.display()))]
pub fn run_status(args: &StatusArgs) -> Result<()> {
    let subscriptions: Vec<Subscription> = read_json(&args.subscriptions)?;
    let now = args.now.unwrap_or_else(Utc::now);

    let lines = statuses(&subscriptions, now);
    info!(count = lines.len(), "Statuses resolved");

    println!("{}", serde_json::to_string_pretty(&lines)?);
    Ok(())
}

pub fn run_check(config: &EngineConfig) -> Result<()> {
    let report = check(config);
    println!("{}", report.to_json()?);
    anyhow::ensure!(report.status != HealthStatus::Unhealthy, "health check failed");
    Ok(())
}
