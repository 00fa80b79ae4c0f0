//! Bucketed latency, throughput and loss series per flow.
//!
//! Datapoints are grouped by flow (sequence number ignored), then by the
//! bucket of their transmit time. Delivered datapoints are also kept one by
//! one in the latency point series.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::classifier::{Classification, Classifier, ClassificationTotals};
use super::time_window::{bucket_index, TimeWindow};
use super::types::*;
use crate::config::{AnalysisConfig, ThroughputMode};

/// Parameters of one aggregation pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationOptions {
    pub max_ms_latency: f64,
    pub bar_period: f64,
    pub throughput_mode: ThroughputMode,
}

impl From<&AnalysisConfig> for AggregationOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_ms_latency: config.max_ms_latency,
            bar_period: config.bar_period,
            throughput_mode: config.throughput_mode,
        }
    }
}

/// Accumulated state of one (flow, bucket) cell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    pub datapoints: usize,
    pub delivered: usize,
    pub outliers: usize,
    pub dropped: usize,
    /// Sum of latencies of delivered datapoints
    pub latency_sum_ms: f64,
    /// Bytes received, saturating at `u64::MAX`; dropped datapoints add nothing
    pub payload_bytes: u64,
    /// Sum of per-datapoint loss flags (0 or 100)
    pub loss_sum: u64,
}

impl BucketStats {
    pub fn add(&mut self, datapoint: &CorrelatedDatapoint, class: Classification) {
        self.datapoints += 1;
        self.payload_bytes = self.payload_bytes.saturating_add(datapoint.payload_size);
        self.loss_sum += u64::from(datapoint.loss_flag);

        match class {
            Classification::Delivered => {
                self.delivered += 1;
                self.latency_sum_ms += datapoint.latency_ms;
            }
            Classification::Outlier => self.outliers += 1,
            Classification::Dropped => self.dropped += 1,
        }
    }

    /// Mean latency of delivered datapoints, `None` if there were none
    pub fn mean_latency_ms(&self) -> Option<f64> {
        if self.delivered == 0 {
            None
        } else {
            Some(self.latency_sum_ms / self.delivered as f64)
        }
    }

    pub fn throughput(&self, window: &TimeWindow, mode: ThroughputMode) -> f64 {
        match mode {
            ThroughputMode::BytesPerSecond => self.payload_bytes as f64 / window.duration(),
            ThroughputMode::ByteSum => self.payload_bytes as f64,
        }
    }

    /// Mean loss flag, in [0, 100]
    pub fn loss_percent(&self) -> f64 {
        if self.datapoints == 0 {
            0.0
        } else {
            self.loss_sum as f64 / self.datapoints as f64
        }
    }
}

/// Output of one aggregation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub totals: ClassificationTotals,
    /// Per-flow bucket cells, keyed by bucket index
    pub buckets: BTreeMap<Flow, BTreeMap<i64, BucketStats>>,
    /// (transmit time, latency) of every delivered datapoint
    pub latency_points: Series,
    /// Mean latency per bucket
    pub latency: Series,
    pub throughput: Series,
    pub loss: Series,
}

/// Label of a point series: flow plus payload size
pub fn point_series_label(datapoint: &CorrelatedDatapoint) -> String {
    format!("{}, {} bytes", datapoint.key.flow, datapoint.payload_size)
}

/// Classify, bucket and aggregate correlated datapoints
pub fn aggregate(datapoints: &[CorrelatedDatapoint], options: &AggregationOptions) -> Aggregation {
    let mut classifier = Classifier::new(options.max_ms_latency);
    let mut buckets: BTreeMap<Flow, BTreeMap<i64, BucketStats>> = BTreeMap::new();
    let mut latency_points = Series::new();

    for datapoint in datapoints {
        let class = classifier.classify(datapoint);
        let index = bucket_index(datapoint.transmit_time, options.bar_period);

        buckets
            .entry(datapoint.key.flow.clone())
            .or_default()
            .entry(index)
            .or_default()
            .add(datapoint, class);

        if class.counts_for_latency() {
            latency_points
                .entry(point_series_label(datapoint))
                .or_default()
                .push(Sample {
                    x: datapoint.transmit_time,
                    y: datapoint.latency_ms,
                });
        }
    }

    for samples in latency_points.values_mut() {
        samples.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    }

    let mut latency = Series::new();
    let mut throughput = Series::new();
    let mut loss = Series::new();

    for (flow, cells) in &buckets {
        let label = flow.to_string();

        for (&index, stats) in cells {
            let window = TimeWindow::of_bucket(index, options.bar_period);
            let x = window.start;

            // Buckets where every message was lost or late have no latency point
            if let Some(mean) = stats.mean_latency_ms() {
                latency.entry(label.clone()).or_default().push(Sample { x, y: mean });
            }
            throughput.entry(label.clone()).or_default().push(Sample {
                x,
                y: stats.throughput(&window, options.throughput_mode),
            });
            loss.entry(label.clone()).or_default().push(Sample {
                x,
                y: stats.loss_percent(),
            });
        }
    }

    let totals = classifier.totals();
    log::debug!(
        "Aggregated {} datapoints into {} flows: {}",
        totals.total,
        buckets.len(),
        totals.summary()
    );

    Aggregation {
        totals,
        buckets,
        latency_points,
        latency,
        throughput,
        loss,
    }
}
