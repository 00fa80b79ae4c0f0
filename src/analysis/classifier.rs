//! Datapoint classification.
//!
//! Every datapoint is exactly one of delivered, outlier or dropped. Outliers
//! keep their payload for throughput and loss but are left out of every
//! latency view.

use serde::{Deserialize, Serialize};

use super::types::CorrelatedDatapoint;

/// Outcome of one message attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Delivered,
    /// Received, but slower than the latency ceiling
    Outlier,
    /// Never received
    Dropped,
}

impl Classification {
    /// Whether the latency of this datapoint feeds latency series
    pub fn counts_for_latency(self) -> bool {
        self == Classification::Delivered
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Delivered => write!(f, "delivered"),
            Classification::Outlier => write!(f, "outlier"),
            Classification::Dropped => write!(f, "dropped"),
        }
    }
}

/// Classify a datapoint against a latency ceiling in milliseconds.
///
/// A latency equal to the ceiling is still delivered.
pub fn classify(datapoint: &CorrelatedDatapoint, max_ms_latency: f64) -> Classification {
    if !datapoint.is_resolved() {
        Classification::Dropped
    } else if datapoint.latency_ms > max_ms_latency {
        Classification::Outlier
    } else {
        Classification::Delivered
    }
}

/// Run-wide classification counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationTotals {
    pub total: usize,
    pub delivered: usize,
    pub outlier: usize,
    pub dropped: usize,
}

impl ClassificationTotals {
    pub fn record(&mut self, class: Classification) {
        self.total += 1;
        match class {
            Classification::Delivered => self.delivered += 1,
            Classification::Outlier => self.outlier += 1,
            Classification::Dropped => self.dropped += 1,
        }
    }

    /// Percentage of attempts that were never received
    pub fn drop_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.dropped as f64 * 100.0 / self.total as f64
        }
    }

    /// e.g. "12 of 400 messages failed, 3 outliers excluded"
    pub fn summary(&self) -> String {
        let plural = if self.outlier == 1 { "" } else { "s" };
        format!(
            "{} of {} messages failed, {} outlier{} excluded",
            self.dropped, self.total, self.outlier, plural
        )
    }
}

/// Classifies datapoints and keeps the running totals
#[derive(Debug, Clone)]
pub struct Classifier {
    max_ms_latency: f64,
    totals: ClassificationTotals,
}

impl Classifier {
    pub fn new(max_ms_latency: f64) -> Self {
        Self {
            max_ms_latency,
            totals: ClassificationTotals::default(),
        }
    }

    pub fn classify(&mut self, datapoint: &CorrelatedDatapoint) -> Classification {
        let class = classify(datapoint, self.max_ms_latency);
        self.totals.record(class);
        class
    }

    pub fn totals(&self) -> ClassificationTotals {
        self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::FlowKey;

    fn delivered_after(latency_ms: f64) -> CorrelatedDatapoint {
        CorrelatedDatapoint::resolved(FlowKey::new("A", "B", "t", 1), 1.0, 1.0 + latency_ms / 1000.0, 64)
    }

    #[test]
    fn test_classification_order() {
        let dropped = CorrelatedDatapoint::unresolved(FlowKey::new("A", "B", "t", 2), 1.0);
        assert_eq!(classify(&dropped, 20.0), Classification::Dropped);
        assert_eq!(classify(&delivered_after(5.0), 20.0), Classification::Delivered);
        assert_eq!(classify(&delivered_after(35.0), 20.0), Classification::Outlier);
    }

    #[test]
    fn test_ceiling_is_inclusive() {
        let mut at_ceiling = delivered_after(0.0);
        at_ceiling.latency_ms = 20.0;
        assert_eq!(classify(&at_ceiling, 20.0), Classification::Delivered);

        at_ceiling.latency_ms = 20.000001;
        assert_eq!(classify(&at_ceiling, 20.0), Classification::Outlier);
    }

    #[test]
    fn test_totals_add_up() {
        let mut classifier = Classifier::new(20.0);
        classifier.classify(&delivered_after(1.0));
        classifier.classify(&delivered_after(50.0));
        classifier.classify(&CorrelatedDatapoint::unresolved(FlowKey::new("A", "B", "t", 3), 2.0));

        let totals = classifier.totals();
        assert_eq!(totals.total, 3);
        assert_eq!(totals.delivered + totals.outlier + totals.dropped, totals.total);
        assert_eq!(totals.summary(), "1 of 3 messages failed, 1 outlier excluded");
    }
}
