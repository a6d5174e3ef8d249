//! Bucket aggregator.
//!
//! Folds decoded samples into one accumulator per `(name, kind, tags)` and
//! turns them into a [`Snapshot`] on every flush. Submission and flush are
//! serialized by a single lock; each flush sees every sample submitted
//! before it and none submitted after.

use super::types::{AggregatedMetric, AggregatedValue, HistogramSummary, Snapshot};
use crate::core::{GaugeValue, MetricKind, MetricSample, SampleValue, Tags};
use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use std::time::{Duration, Instant, SystemTime};

type BucketKey = (String, MetricKind, Tags);

/// Window state for one bucket key.
#[derive(Debug)]
enum Accumulator {
    Counter {
        sum: f64,
    },
    Gauge {
        value: f64,
        updated: Instant,
    },
    Histogram {
        samples: Vec<f64>,
        count: f64,
    },
    Set {
        members: AHashSet<String>,
    },
}

impl Accumulator {
    fn empty(kind: MetricKind, now: Instant) -> Self {
        match kind {
            MetricKind::Counter => Accumulator::Counter { sum: 0.0 },
            MetricKind::Gauge => Accumulator::Gauge {
                value: 0.0,
                updated: now,
            },
            MetricKind::Histogram => Accumulator::Histogram {
                samples: Vec::new(),
                count: 0.0,
            },
            MetricKind::Set => Accumulator::Set {
                members: AHashSet::new(),
            },
        }
    }

    fn apply(&mut self, value: SampleValue, rate: f64, now: Instant) {
        match (self, value) {
            (Accumulator::Counter { sum }, SampleValue::Counter(v)) => {
                *sum += v / rate;
            },
            (Accumulator::Gauge { value, updated }, SampleValue::Gauge(reading)) => {
                match reading {
                    GaugeValue::Absolute(v) => *value = v,
                    GaugeValue::Delta(d) => *value += d,
                }
                *updated = now;
            },
            (Accumulator::Histogram { samples, count }, SampleValue::Histogram(v)) => {
                samples.push(v);
                *count += 1.0 / rate;
            },
            (Accumulator::Set { members }, SampleValue::Set(member)) => {
                members.insert(member);
            },
            // Keys include the kind, so a mismatch cannot be reached.
            (acc, value) => {
                tracing::error!(?acc, ?value, "sample kind does not match accumulator");
            },
        }
    }

    /// Value to report, or `None` if the window is empty.
    fn report(&mut self) -> Option<AggregatedValue> {
        match self {
            Accumulator::Counter { sum } => Some(AggregatedValue::Counter(*sum)),
            Accumulator::Gauge { value, .. } => Some(AggregatedValue::Gauge(*value)),
            Accumulator::Histogram { samples, count } => {
                HistogramSummary::from_samples(samples, *count).map(AggregatedValue::Histogram)
            },
            Accumulator::Set { members } => Some(AggregatedValue::Set(members.len())),
        }
    }
}

fn fold(buckets: &mut AHashMap<BucketKey, Accumulator>, sample: MetricSample, now: Instant) {
    let MetricSample {
        name,
        value,
        sample_rate,
        tags,
    } = sample;

    if !(sample_rate > 0.0 && sample_rate <= 1.0) {
        tracing::warn!(metric = %name, sample_rate, "ignoring sample with invalid rate");
        return;
    }

    let kind = value.kind();
    buckets
        .entry((name, kind, tags))
        .or_insert_with(|| Accumulator::empty(kind, now))
        .apply(value, sample_rate, now);
}

/// Aggregates statsd samples into per-interval buckets.
#[derive(Debug)]
pub struct BucketAggregator {
    buckets: Mutex<AHashMap<BucketKey, Accumulator>>,
    gauge_expiry: Option<Duration>,
}

impl BucketAggregator {
    /// Create an aggregator. Gauges are carried forward forever unless
    /// `gauge_expiry` is set, in which case a gauge that has not been
    /// updated for that long is dropped, unreported, at the next flush.
    pub fn new(gauge_expiry: Option<Duration>) -> Self {
        Self {
            buckets: Mutex::new(AHashMap::new()),
            gauge_expiry,
        }
    }

    /// Fold one sample into its bucket.
    pub fn submit(&self, sample: MetricSample) {
        self.submit_at(sample, Instant::now());
    }

    fn submit_at(&self, sample: MetricSample, now: Instant) {
        fold(&mut self.buckets.lock(), sample, now);
    }

    /// Fold a batch of samples under one lock acquisition.
    pub fn submit_all(&self, samples: impl IntoIterator<Item = MetricSample>) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        for sample in samples {
            fold(&mut buckets, sample, now);
        }
    }

    /// Emit the current window and reset it.
    ///
    /// Counters, histograms and sets start empty afterwards. Gauges keep
    /// their value for the next window.
    pub fn flush(&self) -> Snapshot {
        self.flush_at(Instant::now())
    }

    fn flush_at(&self, now: Instant) -> Snapshot {
        let flushed_at = SystemTime::now();
        let mut buckets = self.buckets.lock();

        if let Some(ttl) = self.gauge_expiry {
            buckets.retain(|_, acc| match acc {
                Accumulator::Gauge { updated, .. } => now.saturating_duration_since(*updated) < ttl,
                _ => true,
            });
        }

        let mut metrics = Vec::with_capacity(buckets.len());

        for ((name, _, tags), acc) in buckets.iter_mut() {
            if let Some(value) = acc.report() {
                metrics.push(AggregatedMetric {
                    name: name.clone(),
                    tags: tags.clone(),
                    value,
                });
            }
        }

        buckets.retain(|_, acc| matches!(acc, Accumulator::Gauge { .. }));
        drop(buckets);

        metrics.sort_by(|a, b| {
            (&a.name, a.value.kind(), &a.tags).cmp(&(&b.name, b.value.kind(), &b.tags))
        });

        tracing::debug!(metrics = metrics.len(), "flushed aggregation window");

        Snapshot {
            flushed_at,
            metrics,
        }
    }

    /// Number of live accumulators
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// True if no accumulators are live
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }
}

impl Default for BucketAggregator {
    fn default() -> Self {
        Self::new(None)
    }
}
