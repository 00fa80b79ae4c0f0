//! Analysis orchestrator.
//!
//! Coordinates one analysis run, from configuration validation through log
//! parsing, correlation and aggregation to the output files.

use std::path::PathBuf;

use color_eyre::eyre::{eyre, Result};
use log::{info, warn};

use crate::analysis::types::Flow;
use crate::analysis::{self, AggregationOptions, AnalysisReport, Correlation, CorrelationOptions};
use crate::config::AnalysisConfig;
use crate::scenario::{self, Scenario};

/// Run the analysis described by `config`.
///
/// Fails before any aggregation if the configuration is invalid or an input
/// file cannot be read. Bad rows inside a readable file never fail the run.
pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisReport> {
    config
        .validate()
        .map_err(|e| eyre!("Invalid analysis configuration: {}", e))?;

    let scenario = config
        .scenario
        .as_deref()
        .map(scenario::read_scenario)
        .transpose()?;

    let logs = analysis::parse_all_logs(&config.inputs)?;

    let correlation = analysis::correlate(&logs, CorrelationOptions::from(config));
    info!(
        "Correlated {} message attempts ({} unmatched receives, {} duplicate transmits)",
        correlation.datapoints.len(),
        correlation.diagnostics.unmatched_receives,
        correlation.diagnostics.duplicate_transmits
    );

    let aggregation = analysis::aggregate(&correlation.datapoints, &AggregationOptions::from(config));
    info!("{}", aggregation.totals.summary());

    let mut report = analysis::build_report(config, &correlation, &aggregation);
    if let Some(scenario) = &scenario {
        let missing = missing_flows(scenario, &correlation);
        for flow in &missing {
            warn!("Scenario flow {} never appears in the log", flow);
        }
        report.missing_flows = missing.iter().map(Flow::to_string).collect();
    }

    Ok(report)
}

/// Flows the scenario expects that have no transmit or receive in the log
pub fn missing_flows(scenario: &Scenario, correlation: &Correlation) -> Vec<Flow> {
    scenario
        .expected_flows()
        .into_iter()
        .filter(|flow| !correlation.flow_counters.contains_key(flow))
        .collect()
}

/// Write the report files, or print a summary when no output name is set.
///
/// Returns the paths written.
pub fn write_outputs(report: &AnalysisReport, config: &AnalysisConfig) -> Result<Vec<PathBuf>> {
    let Some(base) = config.write_file.as_deref() else {
        analysis::report::print_summary(report);
        return Ok(Vec::new());
    };

    let mut written = analysis::write_series_files(report, base)?;

    let json_path = PathBuf::from(format!("{}_report.json", base));
    analysis::generate_json_report(report, &json_path)?;
    written.push(json_path);

    let text_path = PathBuf::from(format!("{}_report.txt", base));
    analysis::generate_text_report(report, &text_path)?;
    written.push(text_path);

    analysis::report::print_summary(report);
    Ok(written)
}
