//! Event record parsing for testbed robot logs.
//!
//! Each data line is a comma-separated transmit (5 fields) or receive
//! (7 fields) record. Label rows, console chatter and malformed rows are
//! skipped so that one bad line never aborts a run.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use color_eyre::eyre::{Context, Result};
use rayon::prelude::*;
use regex::Regex;

use super::types::*;

/// Field count of a transmit row: sender, address, channel, sequence, timestamp
pub const TRANSMIT_FIELDS: usize = 5;

/// Field count of a receive row: sender, receiver, channel, sequence, rx count, size, timestamp
pub const RECEIVE_FIELDS: usize = 7;

/// Compiled regex patterns for non-data rows
pub struct LogPatterns {
    /// Match: "Row: ..." table labels
    pub label_row: Regex,
    /// Match: "[INFO] [1690000000.123] [r1]: " console prefix before the first field
    pub console_prefix: Regex,
}

impl LogPatterns {
    pub fn new() -> Self {
        Self {
            label_row: Regex::new(r"^Row:").expect("Invalid label_row regex"),
            console_prefix: Regex::new(r"^.*?: ").expect("Invalid console_prefix regex"),
        }
    }
}

impl Default for LogPatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// Global patterns instance
pub static PATTERNS: LazyLock<LogPatterns> = LazyLock::new(LogPatterns::new);

/// Why a row could not be turned into an event
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RowError {
    #[error("expected 5 (transmit) or 7 (receive) fields, found {0}")]
    FieldCount(usize),
    #[error("non-numeric {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("unreadable row: {0}")]
    Unreadable(String),
}

/// Result of interpreting one row
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Event(LogEvent),
    /// Label or console row, skipped silently
    Label,
    Blank,
    Malformed(RowError),
}

fn parse_sequence(value: &str) -> Result<u64, RowError> {
    value.parse().map_err(|_| RowError::InvalidNumber {
        field: "sequence number",
        value: value.to_string(),
    })
}

fn parse_counter(value: &str) -> Result<u64, RowError> {
    value.parse().map_err(|_| RowError::InvalidNumber {
        field: "receive counter",
        value: value.to_string(),
    })
}

fn parse_timestamp(value: &str) -> Result<SimTime, RowError> {
    match value.parse::<f64>() {
        Ok(ts) if ts.is_finite() => Ok(ts),
        _ => Err(RowError::InvalidNumber {
            field: "timestamp",
            value: value.to_string(),
        }),
    }
}

/// Payload sizes are integral byte counts, sometimes written as "100.0"
fn parse_payload_size(value: &str) -> Result<u64, RowError> {
    if let Ok(size) = value.parse::<u64>() {
        return Ok(size);
    }
    match value.parse::<f64>() {
        // u64::MAX as f64 rounds up to 2^64, which is already out of range
        Ok(size) if size >= 0.0 && size < u64::MAX as f64 && size.fract() == 0.0 => Ok(size as u64),
        _ => Err(RowError::InvalidNumber {
            field: "payload size",
            value: value.to_string(),
        }),
    }
}

fn parse_transmit(sender: &str, fields: &[&str]) -> Result<LogEvent, RowError> {
    Ok(LogEvent::Transmit(TransmitEvent {
        sender: sender.to_string(),
        address: fields[1].to_string(),
        channel: fields[2].to_string(),
        sequence: parse_sequence(fields[3])?,
        timestamp: parse_timestamp(fields[4])?,
    }))
}

fn parse_receive(sender: &str, fields: &[&str]) -> Result<LogEvent, RowError> {
    Ok(LogEvent::Receive(ReceiveEvent {
        key: FlowKey::new(sender, fields[1], fields[2], parse_sequence(fields[3])?),
        receive_counter: parse_counter(fields[4])?,
        payload_size: parse_payload_size(fields[5])?,
        timestamp: parse_timestamp(fields[6])?,
    }))
}

/// Interpret the (already split and trimmed) fields of one row
pub fn parse_fields(fields: &[&str]) -> LineOutcome {
    if fields.iter().all(|f| f.is_empty()) {
        return LineOutcome::Blank;
    }

    if PATTERNS.label_row.is_match(fields[0]) {
        return LineOutcome::Label;
    }

    // Strip a console log prefix glued to the first field
    let (sender, prefixed) = match PATTERNS.console_prefix.find(fields[0]) {
        Some(m) => (fields[0][m.end()..].trim(), true),
        None => (fields[0], false),
    };

    if prefixed && PATTERNS.label_row.is_match(sender) {
        return LineOutcome::Label;
    }

    let parsed = match fields.len() {
        TRANSMIT_FIELDS => parse_transmit(sender, fields),
        RECEIVE_FIELDS => parse_receive(sender, fields),
        // Console chatter from the robot processes carries the same prefix
        _ if prefixed => return LineOutcome::Label,
        n => Err(RowError::FieldCount(n)),
    };

    match parsed {
        Ok(event) => LineOutcome::Event(event),
        Err(e) => LineOutcome::Malformed(e),
    }
}

/// Interpret one csv record
pub fn parse_record(record: &csv::StringRecord) -> LineOutcome {
    let fields: Vec<&str> = record.iter().collect();
    parse_fields(&fields)
}

/// Interpret one raw log line
pub fn parse_line(line: &str) -> LineOutcome {
    let mut reader = row_reader(line.as_bytes());
    match reader.records().next() {
        None => LineOutcome::Blank,
        Some(Ok(record)) => parse_record(&record),
        Some(Err(e)) => LineOutcome::Malformed(RowError::Unreadable(e.to_string())),
    }
}

/// Rows are never quoted by the producer, and a truncated line must not
/// swallow the lines after it, so quoting is disabled.
fn row_reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(rdr)
}

/// Events parsed from one log file, in file order
#[derive(Debug, Clone, Default)]
pub struct ParsedLog {
    pub path: PathBuf,
    pub events: Vec<LogEvent>,
    /// Only the row-level counters are filled in here
    pub diagnostics: Diagnostics,
}

impl ParsedLog {
    pub fn transmit_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, LogEvent::Transmit(_)))
            .count()
    }

    pub fn receive_count(&self) -> usize {
        self.events.len() - self.transmit_count()
    }
}

/// Parse a single log file.
///
/// Malformed rows are reported and skipped. Only failing to open or read the
/// file is an error.
pub fn parse_log_file(path: &Path) -> Result<ParsedLog> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;
    let mut reader = row_reader(BufReader::with_capacity(64 * 1024, file));

    let mut parsed = ParsedLog {
        path: path.to_path_buf(),
        ..Default::default()
    };

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => {
                return Err(e).with_context(|| format!("Failed to read log file: {}", path.display()));
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                log::warn!("{}:{}: skipping unreadable row: {}", path.display(), line, e);
                parsed.diagnostics.malformed_rows += 1;
                continue;
            }
        };

        match parse_record(&record) {
            LineOutcome::Event(event) => parsed.events.push(event),
            LineOutcome::Label => parsed.diagnostics.label_rows += 1,
            LineOutcome::Blank => {}
            LineOutcome::Malformed(err) => {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                let raw: Vec<&str> = record.iter().collect();
                log::warn!(
                    "{}:{}: skipping malformed row ({}): {}",
                    path.display(),
                    line,
                    err,
                    raw.join(",")
                );
                parsed.diagnostics.malformed_rows += 1;
            }
        }
    }

    Ok(parsed)
}

/// Parse all log files in parallel.
///
/// Results are returned in the order of `paths` so downstream correlation
/// sees a deterministic event order.
pub fn parse_all_logs(paths: &[PathBuf]) -> Result<Vec<ParsedLog>> {
    log::info!("Parsing {} log file(s) in parallel...", paths.len());

    let logs: Vec<ParsedLog> = paths
        .par_iter()
        .map(|path| -> Result<ParsedLog> {
            let parsed = parse_log_file(path)?;
            log::debug!(
                "Parsed {}: {} transmits, {} receives, {} malformed rows",
                path.display(),
                parsed.transmit_count(),
                parsed.receive_count(),
                parsed.diagnostics.malformed_rows
            );
            Ok(parsed)
        })
        .collect::<Result<Vec<_>>>()?;

    let total_events: usize = logs.iter().map(|l| l.events.len()).sum();
    log::info!("Parsed {} file(s), {} events", logs.len(), total_events);

    Ok(logs)
}
