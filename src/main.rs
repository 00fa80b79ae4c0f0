use clap::Parser;
use color_eyre::eyre::Context;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use testbed_analytics::config::{self, AnalysisConfig, EpochPolicy, ThroughputMode, TransmitAddressing};
use testbed_analytics::orchestrator;

/// Latency, throughput and loss analysis for robot swarm testbed logs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Event log files, read as one log in the given order
    inputs: Vec<PathBuf>,

    /// Label used in chart titles and reports (default: stem of the first input)
    #[arg(short = 'n', long = "name")]
    dataset_name: Option<String>,

    /// YAML file with analysis settings; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Latency above this many milliseconds is an outlier
    #[arg(short = 'm', long)]
    max_ms_latency: Option<f64>,

    /// Bucket width in seconds
    #[arg(short = 'b', long)]
    bar_period: Option<f64>,

    /// Write series and reports to <WRITE_FILE>_<kind>.json instead of printing a summary
    #[arg(short = 'w', long)]
    write_file: Option<String>,

    #[arg(long, value_enum)]
    throughput_mode: Option<ThroughputMode>,

    /// Meaning of the second field of a transmit row
    #[arg(long, value_enum)]
    addressing: Option<TransmitAddressing>,

    /// How the session start time is chosen
    #[arg(long, value_enum)]
    epoch: Option<EpochPolicy>,

    /// Scenario table to check the log's flows against
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

impl Args {
    /// Layer the flags over `base`
    fn apply(self, mut base: AnalysisConfig) -> AnalysisConfig {
        if !self.inputs.is_empty() {
            base.inputs = self.inputs;
        }
        if let Some(name) = self.dataset_name {
            base.dataset_name = name;
        }
        if let Some(m) = self.max_ms_latency {
            base.max_ms_latency = m;
        }
        if let Some(b) = self.bar_period {
            base.bar_period = b;
        }
        if self.write_file.is_some() {
            base.write_file = self.write_file;
        }
        if let Some(mode) = self.throughput_mode {
            base.throughput_mode = mode;
        }
        if let Some(addressing) = self.addressing {
            base.addressing = addressing;
        }
        if let Some(epoch) = self.epoch {
            base.epoch = epoch;
        }
        if self.scenario.is_some() {
            base.scenario = self.scenario;
        }

        if base.dataset_name.is_empty() {
            if let Some(stem) = base.inputs.first().and_then(|p| p.file_stem()) {
                base.dataset_name = stem.to_string_lossy().into_owned();
            }
        }
        base
    }
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let base = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AnalysisConfig::default(),
    };
    let config = args.apply(base);

    info!("Starting testbed analysis of '{}'", config.dataset_name);
    info!("Input files: {:?}", config.inputs);

    let report = orchestrator::run_analysis(&config)?;
    let written = orchestrator::write_outputs(&report, &config)?;

    for path in &written {
        info!("Wrote {}", path.display());
    }
    info!("Analysis completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["testbed-analytics", "run1.csv", "run2.csv", "-n", "circle"]);

        assert_eq!(args.dataset_name.as_deref(), Some("circle"));
        assert_eq!(args.inputs, vec![PathBuf::from("run1.csv"), PathBuf::from("run2.csv")]);
        assert_eq!(args.log_level, "info");
        assert_eq!(args.threads, 0);
        assert!(args.max_ms_latency.is_none());
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::parse_from([
            "testbed-analytics",
            "run.csv",
            "--name",
            "circle",
            "-m",
            "50",
            "-b",
            "5",
            "-w",
            "out/circle",
            "--throughput-mode",
            "byte-sum",
            "--addressing",
            "per-channel",
            "--epoch",
            "earliest-transmit",
        ]);
        let config = args.apply(AnalysisConfig::default());

        assert_eq!(config.max_ms_latency, 50.0);
        assert_eq!(config.bar_period, 5.0);
        assert_eq!(config.write_file.as_deref(), Some("out/circle"));
        assert_eq!(config.throughput_mode, ThroughputMode::ByteSum);
        assert_eq!(config.addressing, TransmitAddressing::PerChannel);
        assert_eq!(config.epoch, EpochPolicy::EarliestTransmit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dataset_name_defaults_to_input_stem() {
        let args = Args::parse_from(["testbed-analytics", "logs/circle.csv"]);
        let config = args.apply(AnalysisConfig::default());

        assert_eq!(config.inputs, vec![PathBuf::from("logs/circle.csv")]);
        assert_eq!(config.dataset_name, "circle");
    }

    #[test]
    fn test_file_values_kept_when_flags_absent() {
        let base = AnalysisConfig {
            inputs: vec![PathBuf::from("from_yaml.csv")],
            bar_period: 10.0,
            ..Default::default()
        };
        let args = Args::parse_from(["testbed-analytics", "--config", "analysis.yaml"]);
        let config = args.apply(base);

        assert_eq!(config.inputs, vec![PathBuf::from("from_yaml.csv")]);
        assert_eq!(config.bar_period, 10.0);
        assert_eq!(config.dataset_name, "from_yaml");
    }
}
