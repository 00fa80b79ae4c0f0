//! Core data types for swarm telemetry analysis.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Producer timestamp in seconds (monotonic clock, process-local epoch)
pub type SimTime = f64;

/// A logical communication path: one sender publishing on one channel to one receiver
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Flow {
    pub sender: String,
    pub receiver: String,
    pub channel: String,
}

impl Flow {
    pub fn new(sender: &str, receiver: &str, channel: &str) -> Self {
        Self {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            channel: channel.to_string(),
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.sender, self.receiver, self.channel)
    }
}

/// Identifies one message attempt within a flow.
///
/// The sequence number is assigned by the sender per (sender, channel) pair,
/// so it is only unique together with the rest of the key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub flow: Flow,
    pub sequence: u64,
}

impl FlowKey {
    pub fn new(sender: &str, receiver: &str, channel: &str, sequence: u64) -> Self {
        Self {
            flow: Flow::new(sender, receiver, channel),
            sequence,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.flow, self.sequence)
    }
}

/// A publish record written by the sending endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitEvent {
    pub sender: String,
    /// Receiver name for per-recipient logs, a channel placeholder otherwise
    pub address: String,
    pub channel: String,
    pub sequence: u64,
    pub timestamp: SimTime,
}

/// A delivery record written by the receiving endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveEvent {
    pub key: FlowKey,
    /// Receiver-side running count for the subscription
    pub receive_counter: u64,
    pub payload_size: u64,
    pub timestamp: SimTime,
}

/// One parsed data row of the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEvent {
    Transmit(TransmitEvent),
    Receive(ReceiveEvent),
}

/// A transmit joined with its receive, if any.
///
/// Times are relative to the session epoch (t0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedDatapoint {
    pub key: FlowKey,
    pub transmit_time: SimTime,
    pub receive_time: Option<SimTime>,
    pub payload_size: u64,
    pub latency_ms: f64,
    /// 0 when delivered, 100 when lost
    pub loss_flag: u8,
}

impl CorrelatedDatapoint {
    pub fn resolved(key: FlowKey, transmit_time: SimTime, receive_time: SimTime, payload_size: u64) -> Self {
        Self {
            key,
            transmit_time,
            receive_time: Some(receive_time),
            payload_size,
            latency_ms: (receive_time - transmit_time) * 1000.0,
            loss_flag: 0,
        }
    }

    pub fn unresolved(key: FlowKey, transmit_time: SimTime) -> Self {
        Self {
            key,
            transmit_time,
            receive_time: None,
            payload_size: 0,
            latency_ms: 0.0,
            loss_flag: 100,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.receive_time.is_some()
    }
}

/// Counts of rows and events excluded or repaired during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Rows with a wrong field count or non-numeric required field
    pub malformed_rows: usize,
    /// Label and console rows skipped without a diagnostic
    pub label_rows: usize,
    /// Receives whose transmit never appeared in the log
    pub unmatched_receives: usize,
    /// Transmits that overwrote an earlier transmit with the same key
    pub duplicate_transmits: usize,
    /// Receives repeated for an already-received key
    pub duplicate_receives: usize,
    /// Receives that were logged before their transmit
    pub early_receives: usize,
}

impl Diagnostics {
    pub fn merge(&mut self, other: &Diagnostics) {
        self.malformed_rows += other.malformed_rows;
        self.label_rows += other.label_rows;
        self.unmatched_receives += other.unmatched_receives;
        self.duplicate_transmits += other.duplicate_transmits;
        self.duplicate_receives += other.duplicate_receives;
        self.early_receives += other.early_receives;
    }

    /// Rows that could not contribute to the analysis
    pub fn excluded_rows(&self) -> usize {
        self.malformed_rows + self.unmatched_receives + self.duplicate_receives
    }
}

/// Per-flow message counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounters {
    pub transmitted: usize,
    pub received: usize,
    pub dropped: usize,
}

/// One (x, y) sample of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub x: f64,
    pub y: f64,
}

/// Samples keyed by flow label, in label order
pub type Series = BTreeMap<String, Vec<Sample>>;
