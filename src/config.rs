//! Analysis run configuration.
//!
//! A run is configured from command-line flags, optionally layered on top of a
//! YAML file. Values are validated before any input is read.

use std::fs::File;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use color_eyre::eyre::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Default outlier ceiling in milliseconds
pub const DEFAULT_MAX_MS_LATENCY: f64 = 20.0;

/// Default bucket width in seconds
pub const DEFAULT_BAR_PERIOD: f64 = 25.0;

/// How the throughput series is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ThroughputMode {
    /// Bytes received in a bucket divided by the bucket width
    #[default]
    BytesPerSecond,
    /// Raw bytes received in a bucket
    ByteSum,
}

/// Meaning of the second field of a transmit row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransmitAddressing {
    /// One transmit row per intended recipient; the field names the receiver
    #[default]
    PerRecipient,
    /// One transmit row per publish; the field is a channel placeholder
    PerChannel,
}

/// How the session epoch (t0) is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EpochPolicy {
    /// Timestamp of the first transmit row in file order
    #[default]
    FirstTransmit,
    /// Smallest transmit timestamp in the log
    EarliestTransmit,
}

/// Configuration for one analysis invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Event log files; several files are read as one log in the given order
    pub inputs: Vec<PathBuf>,
    /// Label used in chart titles and reports
    pub dataset_name: String,
    /// Latency above this many milliseconds is an outlier
    pub max_ms_latency: f64,
    /// Bucket width in seconds
    pub bar_period: f64,
    /// Output base name; reports go to `<write_file>_<kind>.json`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_file: Option<String>,
    pub throughput_mode: ThroughputMode,
    pub addressing: TransmitAddressing,
    pub epoch: EpochPolicy,
    /// Scenario table listing the flows the run should contain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            dataset_name: String::new(),
            max_ms_latency: DEFAULT_MAX_MS_LATENCY,
            bar_period: DEFAULT_BAR_PERIOD,
            write_file: None,
            throughput_mode: ThroughputMode::default(),
            addressing: TransmitAddressing::default(),
            epoch: EpochPolicy::default(),
            scenario: None,
        }
    }
}

impl AnalysisConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.inputs.is_empty() {
            return Err(ValidationError::NoInput);
        }

        if !self.max_ms_latency.is_finite() || self.max_ms_latency <= 0.0 {
            return Err(ValidationError::InvalidLatencyCeiling(self.max_ms_latency));
        }

        if !self.bar_period.is_finite() || self.bar_period <= 0.0 {
            return Err(ValidationError::InvalidBarPeriod(self.bar_period));
        }

        if let Some(base) = &self.write_file {
            if base.trim().is_empty() {
                return Err(ValidationError::EmptyOutputName);
            }
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("No input log file given")]
    NoInput,
    #[error("Invalid latency ceiling: {0} ms (must be a positive number)")]
    InvalidLatencyCeiling(f64),
    #[error("Invalid bar period: {0} s (must be a positive number)")]
    InvalidBarPeriod(f64),
    #[error("Output base name cannot be empty")]
    EmptyOutputName,
}

/// Load an analysis configuration from a YAML file.
///
/// Missing keys take their defaults. The result is not validated here since
/// command-line flags may still fill in the inputs.
pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    info!("Loading analysis configuration from: {:?}", path);

    let file = File::open(path)
        .with_context(|| format!("Failed to open configuration file: {}", path.display()))?;

    let config: AnalysisConfig = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse configuration file: {}", path.display()))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_input() -> AnalysisConfig {
        AnalysisConfig {
            inputs: vec![PathBuf::from("run.csv")],
            dataset_name: "test".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config_with_input();
        assert_eq!(config.max_ms_latency, 20.0);
        assert_eq!(config.bar_period, 25.0);
        assert_eq!(config.throughput_mode, ThroughputMode::BytesPerSecond);
        assert_eq!(config.addressing, TransmitAddressing::PerRecipient);
        assert_eq!(config.epoch, EpochPolicy::FirstTransmit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(AnalysisConfig::default().validate(), Err(ValidationError::NoInput));

        let mut config = config_with_input();
        config.bar_period = 0.0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidBarPeriod(0.0)));

        let mut config = config_with_input();
        config.max_ms_latency = -1.0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidLatencyCeiling(-1.0)));

        let mut config = config_with_input();
        config.write_file = Some("  ".to_string());
        assert_eq!(config.validate(), Err(ValidationError::EmptyOutputName));
    }

    #[test]
    fn test_yaml_roundtrip_uses_snake_case() {
        let yaml = r#"
inputs: [robots.csv]
dataset_name: circle
bar_period: 5
throughput_mode: byte_sum
addressing: per_channel
"#;
        let config: AnalysisConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.inputs, vec![PathBuf::from("robots.csv")]);
        assert_eq!(config.bar_period, 5.0);
        assert_eq!(config.max_ms_latency, DEFAULT_MAX_MS_LATENCY);
        assert_eq!(config.throughput_mode, ThroughputMode::ByteSum);
        assert_eq!(config.addressing, TransmitAddressing::PerChannel);
        assert_eq!(config.epoch, EpochPolicy::FirstTransmit);
    }
}
