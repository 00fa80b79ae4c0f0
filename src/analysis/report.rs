//! Report generation for swarm telemetry analysis.
//!
//! Builds the chart-ready series documents consumed by the rendering layer,
//! plus JSON and human-readable text reports.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::aggregator::Aggregation;
use super::classifier::ClassificationTotals;
use super::correlator::Correlation;
use super::types::*;
use crate::config::{AnalysisConfig, EpochPolicy, ThroughputMode, TransmitAddressing};

/// Run parameters recorded alongside the results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub dataset_name: String,
    pub analysis_timestamp: String,
    pub inputs: Vec<String>,
    pub max_ms_latency: f64,
    pub bar_period: f64,
    pub throughput_mode: ThroughputMode,
    pub addressing: TransmitAddressing,
    pub epoch: EpochPolicy,
    /// Session epoch in producer clock seconds
    pub t0: Option<SimTime>,
}

/// One series document for the rendering layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Series,
    /// Legend text per series key
    pub legend: BTreeMap<String, String>,
}

impl Chart {
    fn new(title: String, y_label: &str, series: Series, legend: BTreeMap<String, String>) -> Self {
        Self {
            title,
            x_label: "Time in seconds".to_string(),
            y_label: y_label.to_string(),
            series,
            legend,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }
}

/// Per-flow totals for the text report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSummary {
    pub flow: String,
    pub transmitted: usize,
    pub received: usize,
    pub dropped: usize,
    pub outliers: usize,
    pub bytes_received: u64,
    /// Mean latency over delivered messages
    pub mean_latency_ms: Option<f64>,
}

/// Complete result of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub metadata: AnalysisMetadata,
    pub totals: ClassificationTotals,
    pub diagnostics: Diagnostics,
    pub flows: Vec<FlowSummary>,
    /// Scenario flows with no transmit or receive in the log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_flows: Vec<String>,
    pub latency_points: Chart,
    pub latency: Chart,
    pub throughput: Chart,
    pub loss: Chart,
}

impl AnalysisReport {
    /// Charts with their output file suffixes
    pub fn charts(&self) -> [(&'static str, &Chart); 4] {
        [
            ("latency_points", &self.latency_points),
            ("latency", &self.latency),
            ("throughput", &self.throughput),
            ("loss", &self.loss),
        ]
    }
}

fn plain_legend(series: &Series) -> BTreeMap<String, String> {
    series.keys().map(|k| (k.clone(), k.clone())).collect()
}

/// Assemble the report from the correlation and aggregation of one run
pub fn build_report(config: &AnalysisConfig, correlation: &Correlation, aggregation: &Aggregation) -> AnalysisReport {
    let totals = aggregation.totals;
    let dataset = &config.dataset_name;
    let plural = if totals.outlier == 1 { "" } else { "s" };

    let point_legend = aggregation
        .latency_points
        .iter()
        .map(|(k, samples)| (k.clone(), format!("{}, {} datapoints", k, samples.len())))
        .collect();

    let latency_points = Chart::new(
        format!(
            "Latency point graph for {}\n({} of {} messages failed, {} outlier{} dropped)",
            dataset, totals.dropped, totals.total, totals.outlier, plural
        ),
        "Latency in milliseconds",
        aggregation.latency_points.clone(),
        point_legend,
    );

    let latency = Chart::new(
        format!(
            "Latency graph for {}\n({} of {} messages failed)",
            dataset, totals.dropped, totals.total
        ),
        "Latency in milliseconds",
        aggregation.latency.clone(),
        plain_legend(&aggregation.latency),
    );

    let throughput_label = match config.throughput_mode {
        ThroughputMode::BytesPerSecond => "Bytes per second",
        ThroughputMode::ByteSum => "Bytes per bucket",
    };
    let throughput = Chart::new(
        format!("Throughput graph for {}", dataset),
        throughput_label,
        aggregation.throughput.clone(),
        plain_legend(&aggregation.throughput),
    );

    let loss = Chart::new(
        format!("Loss graph for {}", dataset),
        "%Packets lost",
        aggregation.loss.clone(),
        plain_legend(&aggregation.loss),
    );

    let flows = correlation
        .flow_counters
        .iter()
        .map(|(flow, counters)| {
            let cells = aggregation.buckets.get(flow);
            let stats = cells.into_iter().flat_map(|c| c.values());
            let (mut outliers, mut bytes, mut delivered, mut latency_sum) = (0, 0u64, 0, 0.0);
            for cell in stats {
                outliers += cell.outliers;
                bytes = u64::saturating_add(bytes, cell.payload_bytes);
                delivered += cell.delivered;
                latency_sum += cell.latency_sum_ms;
            }
            FlowSummary {
                flow: flow.to_string(),
                transmitted: counters.transmitted,
                received: counters.received,
                dropped: counters.dropped,
                outliers,
                bytes_received: bytes,
                mean_latency_ms: (delivered > 0).then(|| latency_sum / delivered as f64),
            }
        })
        .collect();

    AnalysisReport {
        metadata: AnalysisMetadata {
            dataset_name: dataset.clone(),
            analysis_timestamp: chrono::Utc::now().to_rfc3339(),
            inputs: config.inputs.iter().map(|p| p.display().to_string()).collect(),
            max_ms_latency: config.max_ms_latency,
            bar_period: config.bar_period,
            throughput_mode: config.throughput_mode,
            addressing: config.addressing,
            epoch: config.epoch,
            t0: correlation.t0,
        },
        totals,
        diagnostics: correlation.diagnostics.clone(),
        flows,
        missing_flows: Vec::new(),
        latency_points,
        latency,
        throughput,
        loss,
    }
}

/// Write each chart to `<base>_<kind>.json`
pub fn write_series_files(report: &AnalysisReport, base: &str) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();

    for (suffix, chart) in report.charts() {
        let path = PathBuf::from(format!("{}_{}.json", base, suffix));
        let json = serde_json::to_string_pretty(chart)
            .with_context(|| format!("Failed to serialize {} series", suffix))?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write series to {}", path.display()))?;
        log::info!("{} series ({} samples) written to {}", suffix, chart.sample_count(), path.display());
        written.push(path);
    }

    Ok(written)
}

/// Generate JSON report
pub fn generate_json_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.2} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.2} MB", bytes as f64 / 1_000_000.0)
    } else if bytes >= 1_000 {
        format!("{:.2} KB", bytes as f64 / 1_000.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Render the human-readable text report
pub fn render_text_report(report: &AnalysisReport) -> String {
    let mut lines: Vec<String> = Vec::new();
    let meta = &report.metadata;
    let totals = &report.totals;
    let diag = &report.diagnostics;

    // Header
    lines.push("=".repeat(80));
    lines.push("                     SWARM TELEMETRY ANALYSIS".to_string());
    lines.push("=".repeat(80));
    lines.push(String::new());

    // Metadata
    lines.push(format!("Dataset: {}", meta.dataset_name));
    lines.push(format!("Analysis Date: {}", meta.analysis_timestamp));
    lines.push(format!("Input Files: {}", meta.inputs.join(", ")));
    lines.push(format!("Latency Ceiling: {} ms", meta.max_ms_latency));
    lines.push(format!("Bar Period: {} s", meta.bar_period));
    match meta.t0 {
        Some(t0) => lines.push(format!("Session Epoch (t0): {:.6}", t0)),
        None => lines.push("Session Epoch (t0): none (no transmits)".to_string()),
    }
    lines.push(String::new());

    lines.push("Message Outcomes:".to_string());
    lines.push(format!("  Total:     {}", totals.total));
    lines.push(format!("  Delivered: {}", totals.delivered));
    lines.push(format!("  Outliers:  {} (latency above {} ms)", totals.outlier, meta.max_ms_latency));
    lines.push(format!("  Dropped:   {} ({:.1}%)", totals.dropped, totals.drop_rate()));
    lines.push(String::new());

    lines.push("Excluded Rows:".to_string());
    lines.push(format!("  Malformed rows:      {}", diag.malformed_rows));
    lines.push(format!("  Unmatched receives:  {}", diag.unmatched_receives));
    lines.push(format!("  Duplicate receives:  {}", diag.duplicate_receives));
    lines.push(format!("  Duplicate transmits: {} (later row kept)", diag.duplicate_transmits));
    lines.push(String::new());

    if !report.flows.is_empty() {
        lines.push("=".repeat(80));
        lines.push("                              FLOWS".to_string());
        lines.push("=".repeat(80));
        lines.push(String::new());

        for flow in &report.flows {
            lines.push(format!("{}:", flow.flow));
            lines.push(format!(
                "  {} sent, {} received, {} dropped, {} outliers",
                flow.transmitted, flow.received, flow.dropped, flow.outliers
            ));
            lines.push(format!("  Payload received: {}", format_bytes(flow.bytes_received)));
            if let Some(latency) = flow.mean_latency_ms {
                lines.push(format!("  Mean latency: {:.3} ms", latency));
            }
        }
        lines.push(String::new());
    }

    if !report.missing_flows.is_empty() {
        lines.push(format!("Scenario flows missing from the log ({}):", report.missing_flows.len()));
        for flow in &report.missing_flows {
            lines.push(format!("  {}", flow));
        }
        lines.push(String::new());
    }

    // Footer
    lines.push("=".repeat(80));

    lines.join("\n")
}

/// Generate human-readable text report
pub fn generate_text_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    fs::write(output_path, render_text_report(report))
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

/// Print a summary to stdout
pub fn print_summary(report: &AnalysisReport) {
    println!("\n=== SWARM TELEMETRY SUMMARY: {} ===\n", report.metadata.dataset_name);
    println!("Messages: {}", report.totals.total);
    println!("  Delivered: {}", report.totals.delivered);
    println!("  Outliers: {}", report.totals.outlier);
    println!("  Dropped: {}", report.totals.dropped);
    println!("({})", report.totals.summary());

    if report.diagnostics.excluded_rows() > 0 {
        println!("\nExcluded rows: {}", report.diagnostics.excluded_rows());
        println!("  Malformed: {}", report.diagnostics.malformed_rows);
        println!("  Unmatched receives: {}", report.diagnostics.unmatched_receives);
        println!("  Duplicate receives: {}", report.diagnostics.duplicate_receives);
    }

    if !report.missing_flows.is_empty() {
        println!("\nMissing scenario flows: {}", report.missing_flows.len());
    }

    println!();
    for (name, chart) in report.charts() {
        println!("{}: {} series, {} samples", name, chart.series.len(), chart.sample_count());
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregator::{aggregate, AggregationOptions};
    use crate::analysis::correlator::{correlate_events, CorrelationOptions};

    fn sample_report() -> AnalysisReport {
        let events = vec![
            LogEvent::Transmit(TransmitEvent {
                sender: "r1".to_string(),
                address: "r2".to_string(),
                channel: "odom".to_string(),
                sequence: 1,
                timestamp: 1.0,
            }),
            LogEvent::Receive(ReceiveEvent {
                key: FlowKey::new("r1", "r2", "odom", 1),
                receive_counter: 1,
                payload_size: 1500,
                timestamp: 1.004,
            }),
            LogEvent::Transmit(TransmitEvent {
                sender: "r1".to_string(),
                address: "r2".to_string(),
                channel: "odom".to_string(),
                sequence: 2,
                timestamp: 2.0,
            }),
        ];
        let config = AnalysisConfig {
            inputs: vec![PathBuf::from("run.csv")],
            dataset_name: "unit".to_string(),
            ..Default::default()
        };
        let correlation = correlate_events(events, CorrelationOptions::default());
        let aggregation = aggregate(&correlation.datapoints, &AggregationOptions::from(&config));
        build_report(&config, &correlation, &aggregation)
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1500), "1.50 KB");
        assert_eq!(format_bytes(1_500_000), "1.50 MB");
        assert_eq!(format_bytes(1_500_000_000), "1.50 GB");
    }

    #[test]
    fn test_chart_titles_and_legends() {
        let report = sample_report();
        assert_eq!(
            report.latency_points.title,
            "Latency point graph for unit\n(1 of 2 messages failed, 0 outliers dropped)"
        );
        assert_eq!(report.latency.title, "Latency graph for unit\n(1 of 2 messages failed)");
        assert_eq!(report.throughput.y_label, "Bytes per second");
        assert_eq!(report.loss.y_label, "%Packets lost");
        assert_eq!(
            report.latency_points.legend["r1, r2, odom, 1500 bytes"],
            "r1, r2, odom, 1500 bytes, 1 datapoints"
        );
    }

    #[test]
    fn test_flow_summary() {
        let report = sample_report();
        assert_eq!(report.flows.len(), 1);
        let flow = &report.flows[0];
        assert_eq!(flow.flow, "r1, r2, odom");
        assert_eq!(flow.transmitted, 2);
        assert_eq!(flow.received, 1);
        assert_eq!(flow.dropped, 1);
        assert_eq!(flow.bytes_received, 1500);
        assert!((flow.mean_latency_ms.unwrap() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_text_report_mentions_outcomes() {
        let text = render_text_report(&sample_report());
        assert!(text.contains("Dataset: unit"));
        assert!(text.contains("Dropped:   1 (50.0%)"));
        assert!(text.contains("Payload received: 1.50 KB"));
    }
}
