//! Flush output types.
//!
//! Everything here is an immutable value produced by
//! [`BucketAggregator::flush`](super::BucketAggregator::flush).

use crate::core::{MetricKind, Tags};
use std::time::SystemTime;

/// Percentile reported for histograms and timers.
pub const HISTOGRAM_PERCENTILE: f64 = 0.95;

/// Derived statistics of one histogram or timer window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramSummary {
    /// Largest observed value
    pub max: f64,
    /// Middle value, or mean of the two middle values
    pub median: f64,
    /// Arithmetic mean of observed values
    pub avg: f64,
    /// Observations corrected by sample rate
    pub count: f64,
    /// 95th percentile
    pub p95: f64,
}

impl HistogramSummary {
    /// Summarize raw observations. `values` is sorted in place.
    /// Returns `None` for an empty window.
    pub fn from_samples(values: &mut [f64], count: f64) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        values.sort_unstable_by(f64::total_cmp);

        let n = values.len();
        let median = if n % 2 == 0 {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        } else {
            values[n / 2]
        };

        Some(Self {
            max: values[n - 1],
            median,
            avg: values.iter().sum::<f64>() / n as f64,
            count,
            p95: percentile(values, HISTOGRAM_PERCENTILE),
        })
    }

    /// Sub-metric suffixes with their values, in reporting order.
    pub fn components(&self) -> [(&'static str, f64); 5] {
        [
            ("max", self.max),
            ("median", self.median),
            ("avg", self.avg),
            ("count", self.count),
            ("95percentile", self.p95),
        ]
    }
}

/// Nearest-rank percentile of sorted values: the element at
/// `ceil(q * n) - 1`, clamped into the slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let n = sorted.len();
    let rank = (q * n as f64).ceil() as usize;
    let index = rank.saturating_sub(1).min(n - 1);
    sorted[index]
}

/// Flushed value of one accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatedValue {
    /// Rate-corrected sum for the window
    Counter(f64),
    /// Last known value
    Gauge(f64),
    /// Number of distinct members
    Set(usize),
    /// Derived distribution statistics
    Histogram(HistogramSummary),
}

impl AggregatedValue {
    /// Metric family of the value
    pub fn kind(&self) -> MetricKind {
        match self {
            AggregatedValue::Counter(_) => MetricKind::Counter,
            AggregatedValue::Gauge(_) => MetricKind::Gauge,
            AggregatedValue::Set(_) => MetricKind::Set,
            AggregatedValue::Histogram(_) => MetricKind::Histogram,
        }
    }
}

/// One flushed metric.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedMetric {
    pub name: String,
    pub tags: Tags,
    pub value: AggregatedValue,
}

/// Everything emitted by one flush.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// When the flush happened
    pub flushed_at: SystemTime,
    /// One entry per accumulator, ordered by name, kind and tags
    pub metrics: Vec<AggregatedMetric>,
}

impl Snapshot {
    /// Number of metrics in the snapshot
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True if nothing was flushed
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Find a metric by name and kind, ignoring tags
    pub fn find(&self, name: &str, kind: MetricKind) -> Option<&AggregatedMetric> {
        self.metrics
            .iter()
            .find(|m| m.name == name && m.value.kind() == kind)
    }
}
