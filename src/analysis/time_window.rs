//! Fixed-width time buckets over the session timeline.
//!
//! Bucket `n` covers `[n * period, (n + 1) * period)` in seconds relative to
//! t0. Boundaries depend only on the timestamp and the period.

use serde::{Deserialize, Serialize};

use super::types::SimTime;

/// A half-open time window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: SimTime,
    pub end: SimTime,
}

impl TimeWindow {
    pub fn new(start: SimTime, end: SimTime) -> Self {
        Self { start, end }
    }

    /// The window of bucket `index` for a given period
    pub fn of_bucket(index: i64, period: f64) -> Self {
        let start = index as f64 * period;
        Self::new(start, start + period)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Index of the bucket containing `t`: floor(t / period)
pub fn bucket_index(t: SimTime, period: f64) -> i64 {
    (t / period).floor() as i64
}
