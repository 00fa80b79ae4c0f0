//! Transmit/receive correlation.
//!
//! Events are observed once, in file order. Receives whose transmit has not
//! been indexed yet wait in a pending buffer and are promoted when the
//! transmit shows up. Latencies are computed in [`Correlator::finish`], after
//! every duplicate transmit has had its chance to overwrite the index, so the
//! result only depends on the final transmit per key.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use super::log_parser::ParsedLog;
use super::types::*;
use crate::config::{AnalysisConfig, EpochPolicy, TransmitAddressing};

/// Index key of a transmit.
///
/// `receiver` is `None` for per-channel logs where one transmit serves every
/// subscriber of the channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct TransmitKey {
    sender: String,
    channel: String,
    sequence: u64,
    receiver: Option<String>,
}

/// Receives attached to one transmit key, by full flow key
type ReceiveSet = BTreeMap<FlowKey, ReceiveEvent>;

/// Options that change how events are joined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationOptions {
    pub addressing: TransmitAddressing,
    pub epoch: EpochPolicy,
}

impl From<&AnalysisConfig> for CorrelationOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            addressing: config.addressing,
            epoch: config.epoch,
        }
    }
}

/// Result of correlating one event log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    /// Session epoch; `None` when the log holds no transmit
    pub t0: Option<SimTime>,
    /// One datapoint per message attempt, ordered by flow key
    pub datapoints: Vec<CorrelatedDatapoint>,
    pub flow_counters: BTreeMap<Flow, FlowCounters>,
    pub diagnostics: Diagnostics,
}

/// Single-pass transmit/receive correlator
#[derive(Debug, Default)]
pub struct Correlator {
    options: CorrelationOptions,
    first_transmit: Option<SimTime>,
    earliest_transmit: Option<SimTime>,
    transmits: HashMap<TransmitKey, TransmitEvent>,
    matched: HashMap<TransmitKey, ReceiveSet>,
    pending: HashMap<TransmitKey, ReceiveSet>,
    diagnostics: Diagnostics,
}

impl Correlator {
    pub fn new(options: CorrelationOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    fn transmit_key(&self, tx: &TransmitEvent) -> TransmitKey {
        TransmitKey {
            sender: tx.sender.clone(),
            channel: tx.channel.clone(),
            sequence: tx.sequence,
            receiver: match self.options.addressing {
                TransmitAddressing::PerRecipient => Some(tx.address.clone()),
                TransmitAddressing::PerChannel => None,
            },
        }
    }

    fn receive_key(&self, rx: &ReceiveEvent) -> TransmitKey {
        TransmitKey {
            sender: rx.key.flow.sender.clone(),
            channel: rx.key.flow.channel.clone(),
            sequence: rx.key.sequence,
            receiver: match self.options.addressing {
                TransmitAddressing::PerRecipient => Some(rx.key.flow.receiver.clone()),
                TransmitAddressing::PerChannel => None,
            },
        }
    }

    /// Feed every event of a parsed log, keeping its row-level counters
    pub fn observe_log(&mut self, log: &ParsedLog) {
        self.diagnostics.merge(&log.diagnostics);
        for event in &log.events {
            self.observe(event.clone());
        }
    }

    /// Feed one event in log order
    pub fn observe(&mut self, event: LogEvent) {
        match event {
            LogEvent::Transmit(tx) => self.observe_transmit(tx),
            LogEvent::Receive(rx) => self.observe_receive(rx),
        }
    }

    fn observe_transmit(&mut self, tx: TransmitEvent) {
        if self.first_transmit.is_none() {
            self.first_transmit = Some(tx.timestamp);
        }
        self.earliest_transmit = Some(match self.earliest_transmit {
            Some(earliest) => earliest.min(tx.timestamp),
            None => tx.timestamp,
        });

        let key = self.transmit_key(&tx);

        // Receives that were logged before this transmit
        if let Some(waiting) = self.pending.remove(&key) {
            self.matched.entry(key.clone()).or_default().extend(waiting);
        }

        if let Some(previous) = self.transmits.insert(key, tx) {
            warn!(
                "Duplicate transmit for {}, {}, {} #{}: timestamp {} replaced by later row",
                previous.sender, previous.address, previous.channel, previous.sequence, previous.timestamp
            );
            self.diagnostics.duplicate_transmits += 1;
        }
    }

    fn observe_receive(&mut self, rx: ReceiveEvent) {
        let key = self.receive_key(&rx);

        let already_seen = self
            .matched
            .get(&key)
            .into_iter()
            .chain(self.pending.get(&key))
            .any(|set| set.contains_key(&rx.key));
        if already_seen {
            warn!("Duplicate receive for {}: keeping the first one", rx.key);
            self.diagnostics.duplicate_receives += 1;
            return;
        }

        if self.transmits.contains_key(&key) {
            self.matched.entry(key).or_default().insert(rx.key.clone(), rx);
        } else {
            debug!("Receive for {} logged before its transmit", rx.key);
            self.diagnostics.early_receives += 1;
            self.pending.entry(key).or_default().insert(rx.key.clone(), rx);
        }
    }

    /// Session epoch under the configured policy
    pub fn t0(&self) -> Option<SimTime> {
        match self.options.epoch {
            EpochPolicy::FirstTransmit => self.first_transmit,
            EpochPolicy::EarliestTransmit => self.earliest_transmit,
        }
    }

    /// Reconcile pending receives and emit one datapoint per message attempt
    pub fn finish(mut self) -> Correlation {
        // Whatever is still pending never found its transmit
        let mut unmatched: Vec<&FlowKey> = self.pending.values().flat_map(|set| set.keys()).collect();
        unmatched.sort();
        for key in &unmatched {
            warn!("Unmatched receive for {}: no transmit with this key in the log", key);
        }
        self.diagnostics.unmatched_receives += unmatched.len();

        let t0 = self.t0();
        let epoch = t0.unwrap_or(0.0);
        let mut datapoints: BTreeMap<FlowKey, CorrelatedDatapoint> = BTreeMap::new();

        for (key, tx) in &self.transmits {
            let transmit_time = tx.timestamp - epoch;

            match self.matched.get(key).filter(|set| !set.is_empty()) {
                Some(receives) => {
                    for (flow_key, rx) in receives {
                        let datapoint = CorrelatedDatapoint::resolved(
                            flow_key.clone(),
                            transmit_time,
                            rx.timestamp - epoch,
                            rx.payload_size,
                        );
                        datapoints.insert(flow_key.clone(), datapoint);
                    }
                }
                None => {
                    let flow_key = FlowKey::new(&tx.sender, &tx.address, &tx.channel, tx.sequence);
                    datapoints.insert(flow_key.clone(), CorrelatedDatapoint::unresolved(flow_key, transmit_time));
                }
            }
        }

        let mut flow_counters: BTreeMap<Flow, FlowCounters> = BTreeMap::new();
        for datapoint in datapoints.values() {
            let counters = flow_counters.entry(datapoint.key.flow.clone()).or_default();
            counters.transmitted += 1;
            if datapoint.is_resolved() {
                counters.received += 1;
            } else {
                counters.dropped += 1;
            }
        }

        debug!(
            "Correlated {} datapoints across {} flows ({} unmatched receives)",
            datapoints.len(),
            flow_counters.len(),
            self.diagnostics.unmatched_receives
        );

        Correlation {
            t0,
            datapoints: datapoints.into_values().collect(),
            flow_counters,
            diagnostics: self.diagnostics,
        }
    }
}

/// Correlate parsed logs, read in the given order as one log
pub fn correlate(logs: &[ParsedLog], options: CorrelationOptions) -> Correlation {
    let mut correlator = Correlator::new(options);
    for log in logs {
        correlator.observe_log(log);
    }
    correlator.finish()
}

/// Correlate a sequence of events
pub fn correlate_events<I>(events: I, options: CorrelationOptions) -> Correlation
where
    I: IntoIterator<Item = LogEvent>,
{
    let mut correlator = Correlator::new(options);
    for event in events {
        correlator.observe(event);
    }
    correlator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(sender: &str, address: &str, channel: &str, sequence: u64, timestamp: f64) -> LogEvent {
        LogEvent::Transmit(TransmitEvent {
            sender: sender.to_string(),
            address: address.to_string(),
            channel: channel.to_string(),
            sequence,
            timestamp,
        })
    }

    fn rx(sender: &str, receiver: &str, channel: &str, sequence: u64, size: u64, timestamp: f64) -> LogEvent {
        LogEvent::Receive(ReceiveEvent {
            key: FlowKey::new(sender, receiver, channel, sequence),
            receive_counter: sequence,
            payload_size: size,
            timestamp,
        })
    }

    #[test]
    fn test_receive_resolves_transmit() {
        let result = correlate_events(
            vec![tx("A", "B", "topicX", 1, 10.0), rx("A", "B", "topicX", 1, 100, 10.02)],
            CorrelationOptions::default(),
        );

        assert_eq!(result.t0, Some(10.0));
        assert_eq!(result.datapoints.len(), 1);
        let dp = &result.datapoints[0];
        assert!(dp.is_resolved());
        assert_eq!(dp.transmit_time, 0.0);
        assert_eq!(dp.payload_size, 100);
        assert_eq!(dp.loss_flag, 0);
        assert!((dp.latency_ms - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_receive_before_transmit_is_buffered() {
        let result = correlate_events(
            vec![
                tx("A", "B", "t", 1, 1.0),
                rx("A", "B", "t", 2, 10, 2.5),
                tx("A", "B", "t", 2, 2.0),
            ],
            CorrelationOptions::default(),
        );

        assert_eq!(result.diagnostics.early_receives, 1);
        assert_eq!(result.diagnostics.unmatched_receives, 0);
        let second = &result.datapoints[1];
        assert_eq!(second.key.sequence, 2);
        assert!((second.latency_ms - 500.0).abs() < 1e-6);
        // The first transmit was never received
        assert!(!result.datapoints[0].is_resolved());
    }

    #[test]
    fn test_lone_transmit_is_dropped() {
        let result = correlate_events(vec![tx("A", "B", "t", 1, 3.0)], CorrelationOptions::default());

        let dp = &result.datapoints[0];
        assert_eq!(dp.loss_flag, 100);
        assert_eq!(dp.latency_ms, 0.0);
        assert_eq!(dp.payload_size, 0);
        assert_eq!(dp.receive_time, None);
        assert_eq!(result.flow_counters[&Flow::new("A", "B", "t")].dropped, 1);
    }

    #[test]
    fn test_unmatched_receive_is_reported_and_skipped() {
        let result = correlate_events(
            vec![tx("A", "B", "t", 1, 0.0), rx("A", "C", "t", 1, 10, 0.1)],
            CorrelationOptions::default(),
        );

        assert_eq!(result.diagnostics.unmatched_receives, 1);
        assert_eq!(result.datapoints.len(), 1);
        assert_eq!(result.datapoints[0].key.flow.receiver, "B");
        assert!(!result.datapoints[0].is_resolved());
    }

    #[test]
    fn test_duplicate_transmit_last_write_wins() {
        let result = correlate_events(
            vec![
                tx("A", "B", "t", 1, 1.0),
                tx("A", "B", "t", 1, 2.0),
                rx("A", "B", "t", 1, 10, 2.01),
            ],
            CorrelationOptions::default(),
        );

        assert_eq!(result.diagnostics.duplicate_transmits, 1);
        assert_eq!(result.datapoints.len(), 1);
        // t0 is still the first transmit in file order
        assert_eq!(result.t0, Some(1.0));
        assert!((result.datapoints[0].latency_ms - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_transmit_after_receive_still_wins() {
        let result = correlate_events(
            vec![
                tx("A", "B", "t", 1, 1.0),
                rx("A", "B", "t", 1, 10, 2.01),
                tx("A", "B", "t", 1, 2.0),
            ],
            CorrelationOptions::default(),
        );

        assert!((result.datapoints[0].latency_ms - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_duplicate_receive_keeps_first() {
        let result = correlate_events(
            vec![
                tx("A", "B", "t", 1, 1.0),
                rx("A", "B", "t", 1, 10, 1.005),
                rx("A", "B", "t", 1, 10, 1.5),
            ],
            CorrelationOptions::default(),
        );

        assert_eq!(result.diagnostics.duplicate_receives, 1);
        assert!((result.datapoints[0].latency_ms - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_epoch_policies() {
        let events = vec![tx("A", "B", "t", 2, 5.0), tx("A", "B", "t", 1, 4.0)];

        let first = correlate_events(events.clone(), CorrelationOptions::default());
        assert_eq!(first.t0, Some(5.0));
        assert_eq!(first.datapoints[0].transmit_time, -1.0);

        let earliest = correlate_events(
            events,
            CorrelationOptions {
                epoch: EpochPolicy::EarliestTransmit,
                ..Default::default()
            },
        );
        assert_eq!(earliest.t0, Some(4.0));
        assert_eq!(earliest.datapoints[0].transmit_time, 0.0);
    }

    #[test]
    fn test_per_channel_addressing_fans_out() {
        let options = CorrelationOptions {
            addressing: TransmitAddressing::PerChannel,
            ..Default::default()
        };
        let result = correlate_events(
            vec![
                tx("A", "odom", "odom", 1, 0.0),
                rx("A", "B", "odom", 1, 8, 0.01),
                rx("A", "C", "odom", 1, 8, 0.02),
                tx("A", "odom", "odom", 2, 1.0),
            ],
            options,
        );

        assert_eq!(result.datapoints.len(), 3);
        let receivers: Vec<&str> = result.datapoints.iter().map(|d| d.key.flow.receiver.as_str()).collect();
        assert_eq!(receivers, vec!["B", "C", "odom"]);
        assert!(!result.datapoints[2].is_resolved());
    }

    #[test]
    fn test_empty_log() {
        let result = correlate_events(Vec::new(), CorrelationOptions::default());
        assert_eq!(result.t0, None);
        assert!(result.datapoints.is_empty());
    }
}
