//! CLI argument definitions using clap.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "mealsub")]
#[command(version)]
#[command(about = "Quote and inspect meal-plan subscription changes", long_about = None)]
pub struct Cli {
    /// Engine configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify and price a plan selection against a subscription history
    Quote(QuoteArgs),

    /// Resolve the display status of stored subscriptions
    Status(StatusArgs),

    /// Validate the configuration and print a health report
    Check,
}

#[derive(Parser, Debug)]
pub struct QuoteArgs {
    /// JSON request: `{ "subscriptions": [...], "plan": {...}, "person_count": 1 }`
    #[arg(short, long)]
    pub request: PathBuf,

    /// Evaluate at this instant (RFC 3339) instead of the current time
    #[arg(long)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// JSON array of stored subscriptions
    #[arg(short, long)]
    pub subscriptions: PathBuf,

    /// Evaluate at this instant (RFC 3339) instead of the current time
    #[arg(long)]
    pub now: Option<DateTime<Utc>>,
}
