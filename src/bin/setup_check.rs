//! Scenario table checker.
//!
//! Parses a scenario file, prints it as JSON together with the recipients of
//! each subscription, and reports inconsistencies.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use testbed_analytics::scenario::{self, Scenario};

#[derive(Parser)]
#[command(name = "setup-check")]
#[command(about = "Check and print a swarm testbed scenario table")]
#[command(version)]
struct Cli {
    /// Scenario CSV file
    scenario: PathBuf,

    /// Also list every expected (sender, receiver, channel) flow
    #[arg(long)]
    flows: bool,

    /// Exit with an error when the scenario has warnings
    #[arg(long)]
    strict: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
struct SetupOutput<'a> {
    #[serde(flatten)]
    scenario: &'a Scenario,
    recipients: std::collections::BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flows: Option<Vec<String>>,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let scenario = scenario::read_scenario(&cli.scenario)?;

    let output = SetupOutput {
        scenario: &scenario,
        recipients: scenario.recipients(),
        flows: cli
            .flows
            .then(|| scenario.expected_flows().iter().map(|f| f.to_string()).collect()),
    };
    let json = serde_json::to_string_pretty(&output).context("Failed to serialize scenario")?;
    println!("{}", json);

    let warnings = scenario.warnings();
    for warning in &warnings {
        log::warn!("{}", warning);
    }
    if cli.strict && !warnings.is_empty() {
        color_eyre::eyre::bail!("{} scenario warning(s) in {}", warnings.len(), cli.scenario.display());
    }

    Ok(())
}
