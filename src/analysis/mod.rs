//! Offline telemetry analysis for swarm testbed runs.
//!
//! This module turns raw transmit/receive event logs into classified,
//! bucketed latency, throughput and loss series.

pub mod types;
pub mod log_parser;
pub mod correlator;
pub mod classifier;
pub mod time_window;
pub mod aggregator;
pub mod report;

pub use types::*;
pub use log_parser::{parse_all_logs, parse_line, parse_log_file, LineOutcome, ParsedLog, RowError};
pub use correlator::{correlate, correlate_events, Correlation, CorrelationOptions, Correlator};
pub use classifier::{classify, Classification, ClassificationTotals, Classifier};
pub use aggregator::{aggregate, Aggregation, AggregationOptions, BucketStats};
pub use report::{build_report, generate_json_report, generate_text_report, write_series_files, AnalysisReport};
