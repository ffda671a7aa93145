//! `mealsub` - operator CLI for the subscription pricing engine.
//!
//! Usage:
//!   mealsub quote --request selection.json
//!   mealsub status --subscriptions subscriptions.json --now 2025-06-15T10:00:00Z
//!   mealsub --config engine.toml check
//!
//! Logging is controlled by `RUST_LOG` and `LOG_FORMAT` (`pretty` or `json`).

#![allow(
    clippy::multiple_crate_versions,
    reason = "transitive dependencies from reqwest and tokio"
)]

mod cli;
mod commands;
mod observability;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use observability::{LogFormat, init_observability};

fn main() -> Result<()> {
    init_observability(LogFormat::from_env());

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Quote(args) => commands::run_quote(&config, &args)?,
        Commands::Status(args) => commands::run_status(&args)?,
        Commands::Check => commands::run_check(&config)?,
    }

    Ok(())
}
