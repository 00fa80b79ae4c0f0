//! # Testbed Analytics - Offline telemetry analysis for robot swarm testbeds
//!
//! This library turns the transmit/receive event logs written during a swarm
//! communication experiment into per-flow latency, throughput and loss series.
//!
//! ## Overview
//!
//! Every robot logs a row when it publishes a message and when it receives
//! one. The analysis pairs those rows into message attempts, classifies each
//! attempt as delivered, outlier or dropped, and buckets the results over
//! fixed time windows. The output is a set of chart-ready series documents
//! plus JSON and text reports.
//!
//! ## Architecture
//!
//! - `analysis`: log parsing, correlation, classification, aggregation and reports
//! - `config`: run configuration, validation and YAML loading
//! - `scenario`: reader for the scenario table (publishers, subscribers, robots)
//! - `orchestrator`: one analysis run from configuration to output files
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use testbed_analytics::{config::AnalysisConfig, orchestrator};
//!
//! let config = AnalysisConfig {
//!     inputs: vec![PathBuf::from("robots.csv")],
//!     dataset_name: "circle".to_string(),
//!     write_file: Some("results/circle".to_string()),
//!     ..Default::default()
//! };
//!
//! let report = orchestrator::run_analysis(&config)?;
//! orchestrator::write_outputs(&report, &config)?;
//!
//! // results/ now contains circle_latency_points.json, circle_latency.json,
//! // circle_throughput.json, circle_loss.json, circle_report.json and
//! // circle_report.txt
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Log Format
//!
//! ```text
//! # transmit: sender,receiver,channel,sequence,timestamp
//! A,B,odom,1,10.0
//! # receive: sender,receiver,channel,sequence,counter,payload_bytes,timestamp
//! A,B,odom,1,1,100,10.02
//! ```
//!
//! ## Error Handling
//!
//! Bad rows never stop a run; they are logged and counted. Invalid
//! configuration and unreadable input files are reported through `color_eyre`
//! before anything is aggregated.

pub mod analysis;
pub mod config;
pub mod orchestrator;
pub mod scenario;
